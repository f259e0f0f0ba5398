//! Error types for grammar compilation, parsing, and allocation.
//!
//! Compile errors are permanent properties of a (grammar, backend) pair and
//! are returned synchronously from [`Parser::compile`](crate::backend::Parser::compile);
//! a failed compile leaves the parser uncompiled. Parse errors are
//! self-contained: they carry the failure position and the set of terminals
//! that would have been acceptable there, and touch no state outside the
//! parse call. Allocation failure unwinds the parse immediately; everything
//! the parse allocated is still released wholesale when its arena drops.
//!
//! With the `diagnostics` feature enabled, errors additionally derive
//! [`miette::Diagnostic`] for structured error codes.

use std::fmt;

use thiserror::Error;

use crate::grammar::{ByteSet, NodeId};

#[cfg(feature = "diagnostics")]
use miette::Diagnostic;

/// Errors surfaced while binding a grammar to a backend.
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum CompileError {
    /// Two productions of the same non-terminal share a k-token lookahead,
    /// so no predictive table exists.
    #[error("grammar is not LL({k}): productions of {nonterminal} collide on lookahead {lookahead}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::grammar_not_llk)))]
    GrammarNotLlk {
        /// Lookahead depth the table was built for.
        k: usize,
        /// Display name of the conflicting non-terminal.
        nonterminal: String,
        /// The shared lookahead string, rendered for display.
        lookahead: String,
    },

    /// The LALR(1) construction found a shift/reduce or reduce/reduce
    /// conflict. Conflicts are never silently resolved; the offending state
    /// and its items are reported instead.
    #[error("grammar is ambiguous under LALR(1): conflict in state {state}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::grammar_ambiguous)))]
    GrammarAmbiguous {
        /// Automaton state containing the conflict.
        state: usize,
        /// Rendered items participating in the conflict.
        items: Vec<String>,
    },

    /// An `indirect` node was never bound with [`GrammarBuilder::bind`](crate::grammar::GrammarBuilder::bind).
    #[error("indirect node {node:?} was never bound")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::unbound_indirect)))]
    UnboundIndirect {
        /// The offending indirect node.
        node: NodeId,
    },

    /// Zero-width lookahead (`followed_by` / `not_followed_by`) reached a
    /// CFG backend. Only the packrat backend can execute these.
    #[error("{construct} is a PEG-only construct and cannot be compiled by a CFG backend")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::peg_only_construct)))]
    PegOnlyConstructInCfg {
        /// The offending grammar node.
        node: NodeId,
        /// Which construct was encountered.
        construct: &'static str,
    },

    /// The regular backend was asked to compile a recursive grammar.
    #[error("grammar recurses through node {node:?}; the regular backend requires a recursion-free grammar")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::grammar_not_regular)))]
    GrammarNotRegular {
        /// A node on the detected cycle.
        node: NodeId,
    },
}

/// Errors surfaced by a parse call.
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum ParseError {
    /// The input was rejected. `position` is the byte offset of the failure
    /// and `expected` the terminals acceptable at that offset.
    #[error("parse failed at byte {position}: expected {expected}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::parse_failed)))]
    Failed {
        /// Byte offset of the failure.
        position: usize,
        /// Terminals that would have been accepted at `position`.
        expected: ExpectedSet,
    },

    /// A unique result was requested from the GLR backend but more than one
    /// parse survived.
    #[error("parse was ambiguous but a unique result was required")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::ambiguous_result)))]
    AmbiguousResult,

    /// The arena's underlying allocator refused an allocation.
    #[error("allocation failed during parse")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(manifold::allocation_failed)))]
    Allocation(#[from] AllocError),

    /// The grammar could not be compiled. Only reachable when parsing
    /// through an uncompiled parser, which binds the packrat backend lazily.
    #[error(transparent)]
    Grammar(#[from] CompileError),
}

/// Allocation failure reported by an [`Allocator`](crate::arena::Allocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("allocator exhausted")]
pub struct AllocError;

/// The set of terminals a parser would have accepted at a failure position.
///
/// Terminals are raw bytes plus the end-of-input marker. The `Display`
/// rendering collapses contiguous byte ranges (`'0'-'9'`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectedSet {
    bytes: ByteSet,
    eof: bool,
}

impl ExpectedSet {
    /// An empty expected set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: ByteSet::new(),
            eof: false,
        }
    }

    /// Expected bytes.
    #[must_use]
    pub const fn bytes(&self) -> &ByteSet {
        &self.bytes
    }

    /// Whether end-of-input was acceptable.
    #[must_use]
    pub const fn eof(&self) -> bool {
        self.eof
    }

    /// True if nothing at all was expected (e.g. failure under `nothing()`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.eof && self.bytes.is_empty()
    }

    pub(crate) fn insert_byte(&mut self, byte: u8) {
        self.bytes.insert(byte);
    }

    pub(crate) fn insert_set(&mut self, set: &ByteSet) {
        self.bytes.union_with(set);
    }

    pub(crate) fn insert_eof(&mut self) {
        self.eof = true;
    }

    pub(crate) fn clear(&mut self) {
        self.bytes = ByteSet::new();
        self.eof = false;
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.bytes.union_with(&other.bytes);
        self.eof |= other.eof;
    }
}

impl fmt::Display for ExpectedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "nothing");
        }
        let mut first = true;
        let mut iter = self.bytes.iter().peekable();
        while let Some(lo) = iter.next() {
            // Collapse a run of contiguous bytes into a range.
            let mut hi = lo;
            while iter.peek() == Some(&(hi.wrapping_add(1))) && hi < u8::MAX {
                hi = iter.next().unwrap();
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            if lo == hi {
                write!(f, "{}", render_byte(lo))?;
            } else {
                write!(f, "{}-{}", render_byte(lo), render_byte(hi))?;
            }
        }
        if self.eof {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "end of input")?;
        }
        Ok(())
    }
}

fn render_byte(b: u8) -> String {
    if b.is_ascii_graphic() || b == b' ' {
        format!("'{}'", b as char)
    } else {
        format!("0x{b:02x}")
    }
}
