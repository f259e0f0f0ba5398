//! The user-facing grammar intermediate representation.
//!
//! A grammar is a dense array of tagged nodes addressed by [`NodeId`].
//! Consumers dispatch with a `match` per use site; nodes carry no vtables.
//! Identity is the arena-assigned index, never an address, so memoization
//! keys and GSS keys stay stable and comparable.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::grammar::ByteSet;
use crate::tree::{UserAction, UserPredicate};

/// Index of a node within its [`Grammar`](crate::grammar::Grammar).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[must_use]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A grammar node. Graphs may contain cycles only through [`Indirect`],
/// and every `Indirect` must be bound exactly once before compilation.
///
/// [`Indirect`]: GrammarNode::Indirect
pub enum GrammarNode {
    /// A literal byte string.
    Token(Box<[u8]>),
    /// One byte drawn from a class.
    CharSet(ByteSet),
    /// One arbitrary byte.
    Anything,
    /// Matches only at end of input, consuming nothing.
    End,
    /// Never matches.
    Nothing,
    /// Matches the empty string.
    Epsilon,
    /// Ordered concatenation of children.
    Sequence(Vec<NodeId>),
    /// Ordered alternatives. The packrat backend commits to the first
    /// success; CFG backends treat all alternatives as equal.
    Choice(Vec<NodeId>),
    /// Zero or one occurrence.
    Optional(NodeId),
    /// Zero or more occurrences, greedy.
    Many(NodeId),
    /// One or more occurrences, greedy.
    Many1(NodeId),
    /// Zero or more `item`s separated by `sep`; yields the items only.
    SepBy { item: NodeId, sep: NodeId },
    /// One or more `item`s separated by `sep`; yields the items only.
    SepBy1 { item: NodeId, sep: NodeId },
    /// Zero-width positive lookahead. Packrat only.
    FollowedBy(NodeId),
    /// Zero-width negative lookahead. Packrat only.
    NotFollowedBy(NodeId),
    /// Late-bound reference enabling recursion. `None` until bound.
    Indirect(Option<NodeId>),
    /// Child grammar plus a semantic function applied to its result.
    /// The function may reject, turning the match into a failure.
    Action {
        child: NodeId,
        action: Arc<UserAction>,
    },
    /// Child grammar plus a predicate that must accept its result.
    Attr {
        child: NodeId,
        pred: Arc<UserPredicate>,
    },
    /// Child grammar whose result is discarded by enclosing sequences.
    Ignore(NodeId),
}

impl GrammarNode {
    /// Children of this node, in grammar order. Unbound indirects have none.
    pub(crate) fn children(&self, out: &mut Vec<NodeId>) {
        out.clear();
        match self {
            Self::Token(_)
            | Self::CharSet(_)
            | Self::Anything
            | Self::End
            | Self::Nothing
            | Self::Epsilon
            | Self::Indirect(None) => {}
            Self::Sequence(items) | Self::Choice(items) => out.extend_from_slice(items),
            Self::Optional(c)
            | Self::Many(c)
            | Self::Many1(c)
            | Self::FollowedBy(c)
            | Self::NotFollowedBy(c)
            | Self::Indirect(Some(c))
            | Self::Action { child: c, .. }
            | Self::Attr { child: c, .. }
            | Self::Ignore(c) => out.push(*c),
            Self::SepBy { item, sep } | Self::SepBy1 { item, sep } => {
                out.push(*item);
                out.push(*sep);
            }
        }
    }

    pub(crate) const fn kind_name(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::CharSet(_) => "charset",
            Self::Anything => "anything",
            Self::End => "end",
            Self::Nothing => "nothing",
            Self::Epsilon => "epsilon",
            Self::Sequence(_) => "sequence",
            Self::Choice(_) => "choice",
            Self::Optional(_) => "optional",
            Self::Many(_) => "many",
            Self::Many1(_) => "many1",
            Self::SepBy { .. } => "sep_by",
            Self::SepBy1 { .. } => "sep_by1",
            Self::FollowedBy(_) => "followed_by",
            Self::NotFollowedBy(_) => "not_followed_by",
            Self::Indirect(_) => "indirect",
            Self::Action { .. } => "action",
            Self::Attr { .. } => "attr",
            Self::Ignore(_) => "ignore",
        }
    }
}

impl fmt::Debug for GrammarNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(bytes) => write!(f, "Token({:?})", String::from_utf8_lossy(bytes)),
            Self::CharSet(set) => write!(f, "CharSet({set:?})"),
            Self::Sequence(items) => write!(f, "Sequence({items:?})"),
            Self::Choice(items) => write!(f, "Choice({items:?})"),
            Self::Optional(c) => write!(f, "Optional({c:?})"),
            Self::Many(c) => write!(f, "Many({c:?})"),
            Self::Many1(c) => write!(f, "Many1({c:?})"),
            Self::SepBy { item, sep } => write!(f, "SepBy({item:?}, {sep:?})"),
            Self::SepBy1 { item, sep } => write!(f, "SepBy1({item:?}, {sep:?})"),
            Self::FollowedBy(c) => write!(f, "FollowedBy({c:?})"),
            Self::NotFollowedBy(c) => write!(f, "NotFollowedBy({c:?})"),
            Self::Indirect(target) => write!(f, "Indirect({target:?})"),
            Self::Action { child, .. } => write!(f, "Action({child:?})"),
            Self::Attr { child, .. } => write!(f, "Attr({child:?})"),
            Self::Ignore(c) => write!(f, "Ignore({c:?})"),
            Self::Anything => write!(f, "Anything"),
            Self::End => write!(f, "End"),
            Self::Nothing => write!(f, "Nothing"),
            Self::Epsilon => write!(f, "Epsilon"),
        }
    }
}

/// An immutable grammar: the node graph plus its start node.
///
/// Built by [`GrammarBuilder`](crate::grammar::GrammarBuilder); never
/// mutated afterwards, which is what makes compiled grammars shareable
/// across concurrent parse calls.
pub struct Grammar {
    pub(crate) nodes: Vec<GrammarNode>,
    pub(crate) user_data: Vec<Option<Arc<dyn Any + Send + Sync>>>,
    pub(crate) start: NodeId,
}

impl Grammar {
    /// The start node.
    #[must_use]
    pub const fn start(&self) -> NodeId {
        self.start
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the grammar has no nodes. Unreachable through the builder,
    /// which always records a start node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &GrammarNode {
        &self.nodes[id.index()]
    }

    /// User data attached to a node, downcast to `T`.
    #[must_use]
    pub fn user_data<T: Any + Send + Sync>(&self, id: NodeId) -> Option<&T> {
        self.user_data[id.index()]
            .as_ref()
            .and_then(|d| d.downcast_ref::<T>())
    }

    /// Resolve an indirect node to its binding, if any.
    pub(crate) fn resolve(&self, id: NodeId) -> Option<NodeId> {
        match self.node(id) {
            GrammarNode::Indirect(target) => *target,
            _ => Some(id),
        }
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("nodes", &self.nodes.len())
            .field("start", &self.start)
            .finish()
    }
}
