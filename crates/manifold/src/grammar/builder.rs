//! Construction surface for grammar graphs.

use std::any::Any;
use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::grammar::{ByteSet, Grammar, GrammarNode, NodeId};
use crate::tree::{ActionContext, ParseNode, ParseValue, Rejected};

/// Builds a [`Grammar`] one node at a time.
///
/// Node constructors return a [`NodeId`] that later constructors compose.
/// Recursion goes through [`indirect`](Self::indirect) plus
/// [`bind`](Self::bind); everything else forms a DAG.
///
/// ```
/// use manifold::grammar::GrammarBuilder;
///
/// let mut g = GrammarBuilder::new();
/// let digit = g.ch_range(b'0'..=b'9');
/// let digits = g.many1(digit);
/// let grammar = g.build(digits);
/// assert_eq!(grammar.start(), digits);
/// ```
#[derive(Default)]
pub struct GrammarBuilder {
    nodes: Vec<GrammarNode>,
    user_data: Vec<Option<Arc<dyn Any + Send + Sync>>>,
}

impl GrammarBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: GrammarNode) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("grammar node count overflow"));
        self.nodes.push(node);
        self.user_data.push(None);
        id
    }

    /// A literal byte string.
    pub fn token(&mut self, bytes: impl AsRef<[u8]>) -> NodeId {
        self.push(GrammarNode::Token(bytes.as_ref().into()))
    }

    /// A single byte.
    pub fn ch(&mut self, byte: u8) -> NodeId {
        self.push(GrammarNode::CharSet(ByteSet::single(byte)))
    }

    /// One byte drawn from an inclusive range.
    pub fn ch_range(&mut self, range: RangeInclusive<u8>) -> NodeId {
        self.push(GrammarNode::CharSet(ByteSet::range(range)))
    }

    /// One byte drawn from an arbitrary class.
    pub fn charset(&mut self, set: ByteSet) -> NodeId {
        self.push(GrammarNode::CharSet(set))
    }

    /// One arbitrary byte.
    pub fn anything(&mut self) -> NodeId {
        self.push(GrammarNode::Anything)
    }

    /// Matches only at end of input.
    pub fn end(&mut self) -> NodeId {
        self.push(GrammarNode::End)
    }

    /// Never matches.
    pub fn nothing(&mut self) -> NodeId {
        self.push(GrammarNode::Nothing)
    }

    /// Matches the empty string.
    pub fn epsilon(&mut self) -> NodeId {
        self.push(GrammarNode::Epsilon)
    }

    /// Ordered concatenation.
    pub fn sequence(&mut self, items: &[NodeId]) -> NodeId {
        self.push(GrammarNode::Sequence(items.to_vec()))
    }

    /// Ordered alternatives.
    pub fn choice(&mut self, items: &[NodeId]) -> NodeId {
        self.push(GrammarNode::Choice(items.to_vec()))
    }

    /// Zero or one occurrence.
    pub fn optional(&mut self, child: NodeId) -> NodeId {
        self.push(GrammarNode::Optional(child))
    }

    /// Zero or more occurrences.
    pub fn many(&mut self, child: NodeId) -> NodeId {
        self.push(GrammarNode::Many(child))
    }

    /// One or more occurrences.
    pub fn many1(&mut self, child: NodeId) -> NodeId {
        self.push(GrammarNode::Many1(child))
    }

    /// Zero or more `item`s separated by `sep`.
    pub fn sep_by(&mut self, item: NodeId, sep: NodeId) -> NodeId {
        self.push(GrammarNode::SepBy { item, sep })
    }

    /// One or more `item`s separated by `sep`.
    pub fn sep_by1(&mut self, item: NodeId, sep: NodeId) -> NodeId {
        self.push(GrammarNode::SepBy1 { item, sep })
    }

    /// Zero-width positive lookahead (packrat only).
    pub fn followed_by(&mut self, child: NodeId) -> NodeId {
        self.push(GrammarNode::FollowedBy(child))
    }

    /// Zero-width negative lookahead (packrat only).
    pub fn not_followed_by(&mut self, child: NodeId) -> NodeId {
        self.push(GrammarNode::NotFollowedBy(child))
    }

    /// A late-bound reference. Must be bound exactly once with
    /// [`bind`](Self::bind) before the grammar is compiled.
    pub fn indirect(&mut self) -> NodeId {
        self.push(GrammarNode::Indirect(None))
    }

    /// Bind an indirect node to its target, closing a recursive loop.
    ///
    /// # Panics
    ///
    /// Panics if `indirect` is not an indirect node or was already bound;
    /// both are construction bugs in the calling grammar.
    pub fn bind(&mut self, indirect: NodeId, target: NodeId) {
        match &mut self.nodes[indirect.index()] {
            GrammarNode::Indirect(slot @ None) => *slot = Some(target),
            GrammarNode::Indirect(Some(_)) => {
                panic!("indirect node {indirect:?} is already bound")
            }
            other => panic!("bind target {indirect:?} is a {} node", other.kind_name()),
        }
    }

    /// Wrap `child` with a semantic action. On success the action receives
    /// the child's parse-tree node and produces the value stored in the
    /// tree; returning `Err(Rejected)` turns the match into a failure.
    pub fn action<F>(&mut self, child: NodeId, action: F) -> NodeId
    where
        F: for<'a> Fn(&ActionContext<'a>, &'a ParseNode<'a>) -> Result<ParseValue<'a>, Rejected>
            + Send
            + Sync
            + 'static,
    {
        self.push(GrammarNode::Action {
            child,
            action: Arc::new(action),
        })
    }

    /// Wrap `child` with a boolean predicate on its result.
    pub fn attr<F>(&mut self, child: NodeId, pred: F) -> NodeId
    where
        F: for<'a> Fn(&'a ParseNode<'a>) -> bool + Send + Sync + 'static,
    {
        self.push(GrammarNode::Attr {
            child,
            pred: Arc::new(pred),
        })
    }

    /// Wrap `child` so its result is discarded by enclosing sequences.
    pub fn ignore(&mut self, child: NodeId) -> NodeId {
        self.push(GrammarNode::Ignore(child))
    }

    /// Attach opaque user data to a node.
    pub fn set_user_data(&mut self, id: NodeId, data: Arc<dyn Any + Send + Sync>) {
        self.user_data[id.index()] = Some(data);
    }

    /// Freeze the graph with `start` as the start node.
    ///
    /// The graph is immutable from here on. Binding validation happens at
    /// compile time, where unbound indirects surface as
    /// [`CompileError::UnboundIndirect`](crate::error::CompileError::UnboundIndirect).
    #[must_use]
    pub fn build(self, start: NodeId) -> Grammar {
        assert!(start.index() < self.nodes.len(), "start node out of range");
        Grammar {
            nodes: self.nodes,
            user_data: self.user_data,
            start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assigns_dense_ids() {
        let mut g = GrammarBuilder::new();
        let a = g.token("a");
        let b = g.token("b");
        let seq = g.sequence(&[a, b]);
        let grammar = g.build(seq);
        assert_eq!(grammar.len(), 3);
        assert_eq!(grammar.start(), seq);
    }

    #[test]
    fn bind_closes_recursion() {
        let mut g = GrammarBuilder::new();
        let rec = g.indirect();
        let a = g.ch(b'a');
        let eps = g.epsilon();
        let body = g.sequence(&[a, rec]);
        let alt = g.choice(&[body, eps]);
        g.bind(rec, alt);
        let grammar = g.build(alt);
        assert_eq!(grammar.resolve(rec), Some(alt));
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn double_bind_panics() {
        let mut g = GrammarBuilder::new();
        let rec = g.indirect();
        let a = g.ch(b'a');
        g.bind(rec, a);
        g.bind(rec, a);
    }

    #[test]
    fn user_data_round_trips() {
        let mut g = GrammarBuilder::new();
        let a = g.token("a");
        g.set_user_data(a, Arc::new(42u32));
        let grammar = g.build(a);
        assert_eq!(grammar.user_data::<u32>(a), Some(&42));
        assert_eq!(grammar.user_data::<String>(a), None);
    }
}
