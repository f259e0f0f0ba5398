//! # Manifold
//!
//! Parser combinators with interchangeable backends.
//!
//! A grammar is built once, as a graph of combinator nodes (literals,
//! character classes, sequences, ordered choices, repetitions, semantic
//! actions), and can then be executed by any of several parsing algorithms
//! over a byte input:
//!
//! - **packrat** — memoizing recursive descent with PEG semantics,
//!   zero-width lookahead, and left-recursion support; the default.
//! - **LL(k)** — predictive table parsing with configurable lookahead.
//! - **LALR(1)** — table-driven shift-reduce parsing; conflicts are
//!   compile errors, never silently resolved.
//! - **GLR** — generalized LR over a graph-structured stack, returning a
//!   parse forest for ambiguous grammars.
//! - **regular** — recursion-free grammars through the LALR machinery.
//!
//! Backends differ in expressive power and cost; the grammar stays the
//! same. Pick the one matching your grammar class and latency budget.
//!
//! ## Example
//!
//! ```
//! use manifold::backend::{BackendId, CompileOptions, Parser};
//! use manifold::grammar::GrammarBuilder;
//! use manifold::tree::ParseArena;
//!
//! // digits := [0-9]+
//! let mut g = GrammarBuilder::new();
//! let digit = g.ch_range(b'0'..=b'9');
//! let digits = g.many1(digit);
//! let grammar = g.build(digits);
//!
//! // An uncompiled parser runs the packrat backend.
//! let mut parser = Parser::new(grammar);
//! let arena = ParseArena::new();
//! let tree = parser.parse(&arena, b"42")?;
//! assert_eq!(tree.children().len(), 2);
//! assert_eq!((tree.start, tree.end), (0, 2));
//!
//! // The same grammar, table-driven.
//! parser.compile(BackendId::Lalr, &CompileOptions::default())?;
//! let lalr_tree = parser.parse(&arena, b"42")?;
//! assert!(tree.structural_eq(lalr_tree));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Memory discipline
//!
//! Every value a parse call produces lives in the [`tree::ParseArena`]
//! passed to it: a bump region that frees wholesale when dropped. The
//! returned tree borrows the arena, so the borrow checker enforces the
//! lifetime rule. Custom [`arena::Allocator`]s can cap memory; exhaustion
//! surfaces as a parse error, never an abort.
//!
//! ## Modules
//!
//! - [`grammar`] — combinator graph construction
//! - [`backend`] — the backend registry and [`backend::Parser`]
//! - [`cfg`] — the normalized sum-of-products grammar and its analyses
//! - [`tree`] — parse trees, arenas, semantic actions
//! - [`arena`] — the allocator contract and the region allocator
//! - [`error`] — compile and parse errors

pub mod arena;
pub mod backend;
pub mod cfg;
pub mod cursor;
pub mod error;
pub mod grammar;
pub mod tree;

pub use backend::{Backend, BackendId, CompileOptions, Parse, Parser};
pub use error::{AllocError, CompileError, ExpectedSet, ParseError};
pub use grammar::{ByteSet, Grammar, GrammarBuilder, NodeId};
pub use tree::{ActionContext, ParseArena, ParseNode, ParseValue, Rejected};
