//! Grammar definition: the user-facing combinator graph.
//!
//! Users build an immutable graph of [`GrammarNode`]s through
//! [`GrammarBuilder`], then hand the resulting [`Grammar`] to a
//! [`Parser`](crate::backend::Parser). The graph is the single source of
//! truth: the packrat backend interprets it directly, while CFG backends
//! lower it to the normalized representation in [`crate::cfg`] first.

mod builder;
mod byteset;
mod node;

pub use builder::GrammarBuilder;
pub use byteset::ByteSet;
pub use node::{Grammar, GrammarNode, NodeId};
