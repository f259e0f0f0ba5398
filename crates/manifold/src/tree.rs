//! Parse trees, the per-parse arena, and semantic actions.
//!
//! Every value a parse call produces lives in that call's [`ParseArena`]:
//! nodes, child lists, copied byte scratch, and user action results are all
//! region-allocated and freed together when the arena drops. The returned
//! tree borrows the arena, so it cannot outlive it.
//!
//! Parse-tree payloads are `Copy` by construction — the region never runs
//! destructors.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::arena::{AllocError, Allocator, Region, RegionStats};
use crate::grammar::NodeId;

/// Arena owning every allocation of a single parse call.
///
/// Backends thread `&'a ParseArena` through the whole parse; the `'a` on
/// [`ParseNode`] is this borrow. Dropping the arena releases all memory the
/// parse touched at once.
pub struct ParseArena {
    region: Region,
}

impl ParseArena {
    /// Create an arena over the system allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            region: Region::new(),
        }
    }

    /// Create an arena over a caller-provided allocator (quota enforcement,
    /// instrumentation). Allocation failures surface as
    /// [`ParseError::Allocation`](crate::error::ParseError::Allocation).
    #[must_use]
    pub fn with_allocator(alloc: Arc<dyn Allocator>) -> Self {
        Self {
            region: Region::with_allocator(alloc),
        }
    }

    /// Memory statistics for this parse call.
    #[must_use]
    pub fn stats(&self) -> RegionStats {
        self.region.stats()
    }

    /// Allocate a parse-tree node.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator is exhausted.
    pub fn node<'a>(
        &'a self,
        value: ParseValue<'a>,
        start: usize,
        end: usize,
        node: NodeId,
    ) -> Result<&'a ParseNode<'a>, AllocError> {
        self.region.alloc(ParseNode {
            value,
            start,
            end,
            node,
        })
    }

    /// Allocate a sequence value from collected children.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator is exhausted.
    pub fn seq<'a>(
        &'a self,
        items: &[&'a ParseNode<'a>],
    ) -> Result<ParseValue<'a>, AllocError> {
        Ok(ParseValue::Seq(self.region.alloc_slice(items)?))
    }

    /// Allocate a slice of alternatives for an ambiguity node.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator is exhausted.
    pub fn ambiguous<'a>(
        &'a self,
        alternatives: &[&'a ParseNode<'a>],
    ) -> Result<ParseValue<'a>, AllocError> {
        Ok(ParseValue::Ambiguous(self.region.alloc_slice(alternatives)?))
    }

    /// Store an opaque user value produced by a semantic action.
    ///
    /// The value must be `Copy`: the arena frees wholesale without running
    /// destructors.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator is exhausted.
    pub fn user<'a, T: Any + Send + Sync + Copy>(
        &'a self,
        value: T,
    ) -> Result<ParseValue<'a>, AllocError> {
        let stored = self.region.alloc(value)?;
        Ok(ParseValue::User(stored))
    }

    /// Copy bytes into the arena (scratch for bit-shifted reads).
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the underlying allocator is exhausted.
    pub fn bytes<'a>(&'a self, bytes: &[u8]) -> Result<&'a [u8], AllocError> {
        self.region.alloc_bytes(bytes)
    }

    /// A zero-width node (epsilon, `end`, empty repetition) at `pos`.
    pub(crate) fn empty_node<'a>(
        &'a self,
        node: NodeId,
        pos: usize,
    ) -> Result<&'a ParseNode<'a>, AllocError> {
        self.node(ParseValue::Seq(&[]), pos, pos, node)
    }
}

impl Default for ParseArena {
    fn default() -> Self {
        Self::new()
    }
}

/// One node of a parse tree.
///
/// `start..end` is the byte range of input the node consumed; `node` points
/// back at the grammar node that produced it.
#[derive(Clone, Copy)]
pub struct ParseNode<'a> {
    /// The node's payload.
    pub value: ParseValue<'a>,
    /// First input byte covered, inclusive.
    pub start: usize,
    /// One past the last input byte covered.
    pub end: usize,
    /// The grammar node that recognized this range.
    pub node: NodeId,
}

/// Payload of a [`ParseNode`]. All variants are `Copy`; slices and user
/// values live in the parse arena.
#[derive(Clone, Copy)]
pub enum ParseValue<'a> {
    /// Raw bytes, as matched by a character class or `anything`.
    Bytes(&'a [u8]),
    /// A matched literal token.
    Token(&'a [u8]),
    /// An ordered list of children.
    Seq(&'a [&'a ParseNode<'a>]),
    /// Unsigned integer produced by a semantic action.
    Uint(u64),
    /// Signed integer produced by a semantic action.
    Sint(i64),
    /// Opaque user value produced by a semantic action.
    User(&'a (dyn Any + Send + Sync)),
    /// Surviving GLR alternatives covering the same range.
    Ambiguous(&'a [&'a ParseNode<'a>]),
    /// Result of an `ignore` wrapper; sequence builders skip these.
    Ignored,
}

impl<'a> ParseNode<'a> {
    /// Number of input bytes this node consumed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// True if the node consumed no input.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Children of a sequence node, or an empty slice.
    #[must_use]
    pub fn children(&self) -> &'a [&'a ParseNode<'a>] {
        match self.value {
            ParseValue::Seq(items) => items,
            _ => &[],
        }
    }

    /// Alternatives of an ambiguity node, or an empty slice.
    #[must_use]
    pub fn alternatives(&self) -> &'a [&'a ParseNode<'a>] {
        match self.value {
            ParseValue::Ambiguous(alts) => alts,
            _ => &[],
        }
    }

    /// The matched bytes of a `Bytes` or `Token` leaf.
    #[must_use]
    pub fn bytes(&self) -> Option<&'a [u8]> {
        match self.value {
            ParseValue::Bytes(b) | ParseValue::Token(b) => Some(b),
            _ => None,
        }
    }

    /// The unsigned integer of a `Uint` node.
    #[must_use]
    pub const fn uint(&self) -> Option<u64> {
        match self.value {
            ParseValue::Uint(v) => Some(v),
            _ => None,
        }
    }

    /// The signed integer of a `Sint` node.
    #[must_use]
    pub const fn sint(&self) -> Option<i64> {
        match self.value {
            ParseValue::Sint(v) => Some(v),
            _ => None,
        }
    }

    /// Downcast the opaque value of a `User` node.
    #[must_use]
    pub fn user<T: Any>(&self) -> Option<&'a T> {
        match self.value {
            ParseValue::User(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Structural equality: same payload shape, byte ranges, and leaf
    /// values, recursively. Grammar node identity is ignored so trees from
    /// different backends compare equal.
    #[must_use]
    pub fn structural_eq(&self, other: &ParseNode<'_>) -> bool {
        if self.start != other.start || self.end != other.end {
            return false;
        }
        match (self.value, other.value) {
            (ParseValue::Bytes(a), ParseValue::Bytes(b))
            | (ParseValue::Token(a), ParseValue::Token(b)) => a == b,
            (ParseValue::Seq(a), ParseValue::Seq(b))
            | (ParseValue::Ambiguous(a), ParseValue::Ambiguous(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (ParseValue::Uint(a), ParseValue::Uint(b)) => a == b,
            (ParseValue::Sint(a), ParseValue::Sint(b)) => a == b,
            (ParseValue::Ignored, ParseValue::Ignored) => true,
            // Opaque user values have no general equality.
            _ => false,
        }
    }
}

impl fmt::Debug for ParseNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{}] {:?}", self.start, self.end, self.value)
    }
}

impl fmt::Debug for ParseValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "Bytes({:?})", String::from_utf8_lossy(b)),
            Self::Token(b) => write!(f, "Token({:?})", String::from_utf8_lossy(b)),
            Self::Seq(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Uint(v) => write!(f, "Uint({v})"),
            Self::Sint(v) => write!(f, "Sint({v})"),
            Self::User(_) => write!(f, "User(..)"),
            Self::Ambiguous(alts) => {
                write!(f, "Ambiguous")?;
                f.debug_list().entries(alts.iter()).finish()
            }
            Self::Ignored => write!(f, "Ignored"),
        }
    }
}

/// Context handed to semantic actions: the parse arena (for allocating the
/// action's result) and the full input buffer.
pub struct ActionContext<'a> {
    /// The arena of the current parse call.
    pub arena: &'a ParseArena,
    /// The input buffer being parsed.
    pub input: &'a [u8],
}

/// Returned by a semantic action to turn the enclosing match into a parse
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

/// A semantic action: transforms the child's parse-tree node into a new
/// value, or rejects.
pub type UserAction = dyn for<'a> Fn(&ActionContext<'a>, &'a ParseNode<'a>) -> Result<ParseValue<'a>, Rejected>
    + Send
    + Sync;

/// A boolean predicate over the child's parse-tree node.
pub type UserPredicate = dyn for<'a> Fn(&'a ParseNode<'a>) -> bool + Send + Sync;
