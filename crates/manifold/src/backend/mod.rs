//! The backend framework: one grammar, interchangeable parsing algorithms.
//!
//! Every backend binds the same two operations — `compile` associates
//! backend-specific state with a grammar, `parse` runs that state over a
//! byte input — behind the object-safe [`Backend`] trait. The process-wide
//! [`REGISTRY`] maps a stable [`BackendId`] to its implementation; it is
//! built from a compile-time list and never mutated.
//!
//! [`Parser`] is the user-facing handle tying a grammar to its currently
//! compiled backend. A parser that was never compiled parses through the
//! packrat backend, which needs no precomputed state.

pub mod glr;
pub mod lalr;
pub mod llk;
pub mod packrat;
pub mod regular;

use std::any::Any;
use std::sync::Arc;

use crate::cfg::Cfg;
use crate::error::{CompileError, ParseError};
use crate::grammar::{Grammar, GrammarNode, NodeId};
use crate::tree::{ParseArena, ParseNode};

/// Stable backend identifiers. The numeric values index [`REGISTRY`] and do
/// not change across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BackendId {
    /// Memoizing recursive descent over the combinator graph.
    Packrat = 0,
    /// Recursion-free grammars driven through the LALR machinery.
    Regular = 1,
    /// Predictive table parser with k-token lookahead.
    Llk = 2,
    /// LALR(1) shift-reduce parser.
    Lalr = 3,
    /// Generalized LR over a graph-structured stack.
    Glr = 4,
}

impl BackendId {
    /// Number of registered backends.
    pub const COUNT: usize = 5;

    /// Index into [`REGISTRY`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// All backend identifiers, in registry order.
    #[must_use]
    pub const fn all() -> [Self; Self::COUNT] {
        [Self::Packrat, Self::Regular, Self::Llk, Self::Lalr, Self::Glr]
    }
}

/// The process-wide dispatch table, indexed by [`BackendId`]. Initialized
/// from this compile-time list and never mutated.
pub static REGISTRY: [&dyn Backend; BackendId::COUNT] = [
    &packrat::PackratBackend,
    &regular::RegularBackend,
    &llk::LlkBackend,
    &lalr::LalrBackend,
    &glr::GlrBackend,
];

/// Options consulted at compile time.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Lookahead depth for the LL(k) backend. Ignored by the others.
    pub lookahead: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { lookahead: 1 }
    }
}

/// What a backend can and cannot do.
#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    /// Human-readable backend name.
    pub name: &'static str,
    /// Whether left-recursive grammars are handled.
    pub supports_left_recursion: bool,
    /// Whether ambiguous grammars parse (into a forest).
    pub supports_ambiguity: bool,
    /// Whether zero-width PEG lookahead nodes are executable.
    pub supports_peg_lookahead: bool,
    /// Upper bound on lookahead, if the algorithm has one.
    pub max_lookahead: Option<usize>,
}

/// Backend-specific state produced by `compile`, plus the normalized CFG
/// when the backend builds one (retained for introspection).
pub struct Compiled {
    pub(crate) backend: BackendId,
    pub(crate) state: Box<dyn Any + Send + Sync>,
    pub(crate) cfg: Option<Arc<Cfg>>,
}

/// Outcome of a successful parse.
pub struct Parse<'a> {
    /// Root of the parse tree (or forest).
    pub root: &'a ParseNode<'a>,
    /// True when the GLR backend merged surviving alternatives anywhere in
    /// the tree.
    pub ambiguous: bool,
    /// Counters collected during the parse.
    pub metrics: ParseMetrics,
}

/// Counters collected during a parse call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseMetrics {
    /// Bytes of input consumed by the result.
    pub bytes_consumed: usize,
    /// Memo-table hits (packrat only).
    pub memo_hits: usize,
}

/// A parsing algorithm.
///
/// Implementations are stateless unit structs; per-grammar state lives in
/// the [`Compiled`] value and per-call state in the parse arena, which is
/// what makes one compiled grammar usable from many threads at once.
pub trait Backend: Send + Sync {
    /// This backend's identifier.
    fn id(&self) -> BackendId;

    /// Capability description.
    fn capabilities(&self) -> BackendCapabilities;

    /// Build backend state for `grammar`.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] describing why the grammar is outside
    /// this backend's class. A failed compile has no side effects.
    fn compile(&self, grammar: &Grammar, options: &CompileOptions)
        -> Result<Compiled, CompileError>;

    /// Parse `input`, allocating every result from `arena`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Failed`] with position and expected set on
    /// rejection, or [`ParseError::Allocation`] if the arena's allocator
    /// gives out.
    fn parse<'a>(
        &self,
        compiled: &Compiled,
        grammar: &Grammar,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<Parse<'a>, ParseError>;
}

/// A grammar bound to (at most) one compiled backend.
pub struct Parser {
    grammar: Grammar,
    compiled: Option<Compiled>,
}

impl std::fmt::Debug for Parser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("backend", &self.backend())
            .finish()
    }
}

impl Parser {
    /// Wrap a grammar. Until [`compile`](Self::compile) is called, parses
    /// run through the packrat backend.
    #[must_use]
    pub fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            compiled: None,
        }
    }

    /// The wrapped grammar.
    #[must_use]
    pub const fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// The currently bound backend.
    #[must_use]
    pub fn backend(&self) -> BackendId {
        self.compiled
            .as_ref()
            .map_or(BackendId::Packrat, |c| c.backend)
    }

    /// The normalized CFG of the last compile, when the backend built one.
    #[must_use]
    pub fn cfg(&self) -> Option<&Cfg> {
        self.compiled.as_ref().and_then(|c| c.cfg.as_deref())
    }

    /// Compile the grammar for `backend`, replacing any previous state.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`CompileError`]; on error the previous state
    /// is kept and the parser is otherwise unchanged.
    pub fn compile(
        &mut self,
        backend: BackendId,
        options: &CompileOptions,
    ) -> Result<(), CompileError> {
        let compiled = REGISTRY[backend.index()].compile(&self.grammar, options)?;
        self.compiled = Some(compiled);
        Ok(())
    }

    /// Parse `input`, returning the root of the resulting tree (for GLR, a
    /// forest root when alternatives survived).
    ///
    /// # Errors
    ///
    /// See [`Backend::parse`].
    pub fn parse<'a>(
        &self,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<&'a ParseNode<'a>, ParseError> {
        Ok(self.run(arena, input)?.root)
    }

    /// Parse `input`, failing with [`ParseError::AmbiguousResult`] if the
    /// backend produced more than one surviving alternative.
    ///
    /// # Errors
    ///
    /// See [`Backend::parse`].
    pub fn parse_unique<'a>(
        &self,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<&'a ParseNode<'a>, ParseError> {
        let parse = self.run(arena, input)?;
        if parse.ambiguous {
            return Err(ParseError::AmbiguousResult);
        }
        Ok(parse.root)
    }

    /// Parse `input` and return the full [`Parse`] record, metrics
    /// included.
    ///
    /// # Errors
    ///
    /// See [`Backend::parse`].
    pub fn parse_detailed<'a>(
        &self,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<Parse<'a>, ParseError> {
        self.run(arena, input)
    }

    fn run<'a>(
        &self,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<Parse<'a>, ParseError> {
        match &self.compiled {
            Some(compiled) => REGISTRY[compiled.backend.index()].parse(
                compiled,
                &self.grammar,
                arena,
                input,
            ),
            None => {
                // Default backend: packrat, whose compile is validation only.
                let backend = &packrat::PackratBackend;
                let compiled = backend
                    .compile(&self.grammar, &CompileOptions::default())
                    .map_err(ParseError::Grammar)?;
                backend.parse(&compiled, &self.grammar, arena, input)
            }
        }
    }
}

/// Check that every indirect node reachable from the start is bound.
pub(crate) fn validate_bindings(grammar: &Grammar) -> Result<(), CompileError> {
    let mut seen = vec![false; grammar.len()];
    let mut stack = vec![grammar.start()];
    let mut children = Vec::new();
    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut seen[id.index()], true) {
            continue;
        }
        if let GrammarNode::Indirect(None) = grammar.node(id) {
            return Err(CompileError::UnboundIndirect { node: id });
        }
        grammar.node(id).children(&mut children);
        stack.extend_from_slice(&children);
    }
    Ok(())
}

/// Depth-first cycle check used by the regular backend; returns a node on
/// the first cycle found.
pub(crate) fn find_cycle(grammar: &Grammar) -> Option<NodeId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    fn visit(
        grammar: &Grammar,
        id: NodeId,
        colors: &mut [Color],
        children: &mut Vec<NodeId>,
    ) -> Option<NodeId> {
        match colors[id.index()] {
            Color::Grey => return Some(id),
            Color::Black => return None,
            Color::White => {}
        }
        colors[id.index()] = Color::Grey;
        grammar.node(id).children(children);
        let local: Vec<NodeId> = children.clone();
        for child in local {
            if let Some(hit) = visit(grammar, child, colors, children) {
                return Some(hit);
            }
        }
        colors[id.index()] = Color::Black;
        None
    }

    let mut colors = vec![Color::White; grammar.len()];
    let mut children = Vec::new();
    visit(grammar, grammar.start(), &mut colors, &mut children)
}
