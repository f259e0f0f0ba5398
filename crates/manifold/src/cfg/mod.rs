//! The normalized sum-of-products grammar.
//!
//! CFG backends never interpret the combinator graph directly; they lower
//! it into this representation first (see [`desugar`]), run the set
//! analyses over it (see [`analysis`]), and build their tables from the
//! result. Terminals are singleton byte classes after decomposition, plus
//! the end-of-input marker.
//!
//! Reduction semantics live here too: every non-terminal remembers the
//! grammar node it came from and how its children reassemble into a parse
//! tree, so table-driven backends produce trees structurally identical to
//! the packrat backend's.

pub(crate) mod analysis;
pub(crate) mod desugar;

use std::fmt;

use smallvec::SmallVec;

use crate::arena::AllocError;
use crate::grammar::{ByteSet, Grammar, GrammarNode, NodeId};
use crate::tree::{ActionContext, ParseArena, ParseNode, ParseValue};

/// A terminal: a byte `0..=255`, or [`TERM_EOF`].
pub(crate) type Term = u16;

/// The end-of-input terminal `⊣`.
pub(crate) const TERM_EOF: Term = 256;

/// Index of a non-terminal within its [`Cfg`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NtId(pub(crate) u32);

impl NtId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// A grammar symbol: terminal or non-terminal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub(crate) enum Symbol {
    T(Term),
    Nt(NtId),
}

/// One production `lhs → rhs`.
#[derive(Clone, Debug)]
pub(crate) struct Production {
    pub lhs: NtId,
    pub rhs: SmallVec<[Symbol; 4]>,
}

/// How a non-terminal's children reassemble at reduce time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NtShape {
    /// Re-fuse the covered bytes into a `Token` leaf.
    Token,
    /// A single covered byte becomes a `Bytes` leaf.
    Byte,
    /// Children become a `Seq` node (ignored children skipped).
    Seq,
    /// A lone child passes through unchanged; an empty body yields an
    /// empty `Seq` node. Used by choice, optional, indirect, and the
    /// augmented start symbol.
    Passthrough,
    /// Repetition spine: flatten the recursive tail into one `Seq`.
    ManyTail,
    /// Head of a separated list: item plus flattened tail.
    SepHead,
    /// Tail of a separated list: drop the separator, keep the items.
    SepTail,
    /// Zero-width result (`end`, `epsilon`): an empty `Seq` node.
    Empty,
    /// Invoke the origin node's semantic action on the lone child.
    Action,
    /// Test the origin node's predicate against the lone child.
    Attr,
    /// Replace the child with the ignored sentinel.
    Ignore,
}

/// Per-non-terminal data.
#[derive(Clone, Debug)]
pub(crate) struct NtData {
    /// Productions of this non-terminal, in grammar order.
    pub prods: SmallVec<[u32; 2]>,
    /// The grammar node this non-terminal was derived from.
    pub origin: NodeId,
    /// Reduce-time reassembly discipline.
    pub shape: NtShape,
}

/// A set of terminals, with an explicit ε flag for the analyses.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct TermSet {
    pub(crate) bytes: ByteSet,
    pub(crate) eof: bool,
    pub(crate) epsilon: bool,
}

impl TermSet {
    pub(crate) const fn new() -> Self {
        Self {
            bytes: ByteSet::new(),
            eof: false,
            epsilon: false,
        }
    }

    pub(crate) fn insert_term(&mut self, term: Term) {
        if term == TERM_EOF {
            self.eof = true;
        } else {
            self.bytes.insert(term as u8);
        }
    }

    pub(crate) fn contains_term(&self, term: Term) -> bool {
        if term == TERM_EOF {
            self.eof
        } else {
            self.bytes.contains(term as u8)
        }
    }

    /// Union of the terminal members (ε excluded). Returns true on growth.
    pub(crate) fn union_terms(&mut self, other: &Self) -> bool {
        let mut grew = self.bytes.union_with(&other.bytes);
        if other.eof && !self.eof {
            self.eof = true;
            grew = true;
        }
        grew
    }

    /// Terminal members in ascending order, EOF last.
    pub(crate) fn iter_terms(&self) -> impl Iterator<Item = Term> + '_ {
        self.bytes
            .iter()
            .map(Term::from)
            .chain(self.eof.then_some(TERM_EOF))
    }

    /// Byte members of the set.
    #[must_use]
    pub const fn bytes(&self) -> &ByteSet {
        &self.bytes
    }

    /// Whether the end marker is a member.
    #[must_use]
    pub const fn has_eof(&self) -> bool {
        self.eof
    }

    /// Whether ε is a member.
    #[must_use]
    pub const fn has_epsilon(&self) -> bool {
        self.epsilon
    }
}

impl fmt::Debug for TermSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermSet({:?}", self.bytes)?;
        if self.eof {
            write!(f, " ⊣")?;
        }
        if self.epsilon {
            write!(f, " ε")?;
        }
        write!(f, ")")
    }
}

/// The normalized context-free grammar, with its analyses.
///
/// Retained on the parser after a CFG backend compiles, for introspection
/// (see [`Parser::cfg`](crate::backend::Parser::cfg)).
pub struct Cfg {
    pub(crate) nts: Vec<NtData>,
    pub(crate) prods: Vec<Production>,
    /// The augmented start symbol `S'`.
    pub(crate) start: NtId,
    pub(crate) nullable: Vec<bool>,
    pub(crate) first: Vec<TermSet>,
    pub(crate) follow: Vec<TermSet>,
}

impl Cfg {
    /// Number of non-terminals, including the augmented start symbol.
    #[must_use]
    pub fn nonterminal_count(&self) -> usize {
        self.nts.len()
    }

    /// Number of productions.
    #[must_use]
    pub fn production_count(&self) -> usize {
        self.prods.len()
    }

    /// The augmented start symbol.
    #[must_use]
    pub const fn start(&self) -> NtId {
        self.start
    }

    /// Whether a non-terminal derives ε.
    #[must_use]
    pub fn is_nullable(&self, nt: NtId) -> bool {
        self.nullable[nt.index()]
    }

    /// FIRST set of a non-terminal.
    #[must_use]
    pub fn first(&self, nt: NtId) -> &TermSet {
        &self.first[nt.index()]
    }

    /// FOLLOW set of a non-terminal.
    #[must_use]
    pub fn follow(&self, nt: NtId) -> &TermSet {
        &self.follow[nt.index()]
    }

    /// The grammar node a non-terminal was lowered from.
    #[must_use]
    pub fn origin(&self, nt: NtId) -> NodeId {
        self.nts[nt.index()].origin
    }

    /// True if re-running the analyses grows no set. They are fixed points,
    /// so this always holds; exposed for regression tests.
    #[doc(hidden)]
    #[must_use]
    pub fn analyses_are_stable(&self) -> bool {
        analysis::analyses_are_stable(self)
    }

    pub(crate) fn nt(&self, nt: NtId) -> &NtData {
        &self.nts[nt.index()]
    }

    pub(crate) fn prod(&self, idx: u32) -> &Production {
        &self.prods[idx as usize]
    }

    /// Render a production for conflict reports.
    pub(crate) fn render_production(&self, idx: u32, dot: Option<usize>) -> String {
        use std::fmt::Write;

        let prod = self.prod(idx);
        let mut out = format!("{:?} →", prod.lhs);
        for (i, sym) in prod.rhs.iter().enumerate() {
            if dot == Some(i) {
                out.push_str(" ·");
            }
            match sym {
                Symbol::T(TERM_EOF) => out.push_str(" ⊣"),
                Symbol::T(t) => {
                    let b = *t as u8;
                    if b.is_ascii_graphic() {
                        let _ = write!(out, " '{}'", b as char);
                    } else {
                        let _ = write!(out, " 0x{b:02x}");
                    }
                }
                Symbol::Nt(nt) => {
                    let _ = write!(out, " {nt:?}");
                }
            }
        }
        if dot == Some(prod.rhs.len()) {
            out.push_str(" ·");
        }
        out
    }
}

impl fmt::Debug for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cfg")
            .field("nonterminals", &self.nts.len())
            .field("productions", &self.prods.len())
            .field("start", &self.start)
            .finish()
    }
}

/// Outcome of a reduction: a tree node, or death of the branch because a
/// semantic action or predicate rejected.
pub(crate) enum Reduced<'a> {
    Node(&'a ParseNode<'a>),
    Rejected,
}

/// Build the parse-tree value for one reduction.
///
/// `children` holds the value of every right-hand-side symbol, in input
/// order; `pos` is the input position of the reduction, used as the range
/// of zero-width results.
pub(crate) fn reduce<'a>(
    grammar: &Grammar,
    cfg: &Cfg,
    prod_idx: u32,
    children: &[&'a ParseNode<'a>],
    pos: usize,
    arena: &'a ParseArena,
    input: &'a [u8],
) -> Result<Reduced<'a>, AllocError> {
    let prod = cfg.prod(prod_idx);
    let nt = cfg.nt(prod.lhs);
    let origin = nt.origin;
    let (start, end) = match (children.first(), children.last()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => (pos, pos),
    };

    let node = match nt.shape {
        NtShape::Token => arena.node(ParseValue::Token(&input[start..end]), start, end, origin)?,
        NtShape::Byte => arena.node(ParseValue::Bytes(&input[start..end]), start, end, origin)?,
        NtShape::Seq => {
            let kept: SmallVec<[&ParseNode<'a>; 8]> = children
                .iter()
                .copied()
                .filter(|c| !matches!(c.value, ParseValue::Ignored))
                .collect();
            let value = arena.seq(&kept)?;
            arena.node(value, start, end, origin)?
        }
        NtShape::Passthrough => match children {
            [child] => *child,
            _ => arena.empty_node(origin, pos)?,
        },
        NtShape::ManyTail | NtShape::SepHead => {
            let items = flatten_spine(children);
            let value = arena.seq(&items)?;
            arena.node(value, start, end, origin)?
        }
        NtShape::SepTail => {
            // children = [separator, item, tail]; the separator is dropped.
            let items = flatten_spine(children.get(1..).unwrap_or(&[]));
            let value = arena.seq(&items)?;
            arena.node(value, start, end, origin)?
        }
        NtShape::Empty => arena.empty_node(origin, start)?,
        NtShape::Action => {
            let child = children[0];
            let GrammarNode::Action { action, .. } = grammar.node(origin) else {
                unreachable!("action shape always originates from an action node");
            };
            let ctx = ActionContext { arena, input };
            match (action.as_ref())(&ctx, child) {
                Ok(value) => arena.node(value, child.start, child.end, origin)?,
                Err(_) => return Ok(Reduced::Rejected),
            }
        }
        NtShape::Attr => {
            let child = children[0];
            let GrammarNode::Attr { pred, .. } = grammar.node(origin) else {
                unreachable!("attr shape always originates from an attr node");
            };
            if (pred.as_ref())(child) {
                child
            } else {
                return Ok(Reduced::Rejected);
            }
        }
        NtShape::Ignore => {
            let child = children[0];
            arena.node(ParseValue::Ignored, child.start, child.end, origin)?
        }
    };
    Ok(Reduced::Node(node))
}

/// Collect `[item, tail?]`-shaped children into a flat item list, skipping
/// ignored results. The tail, when present, is always a `Seq` built by a
/// previous reduction of the same spine.
fn flatten_spine<'a>(children: &[&'a ParseNode<'a>]) -> SmallVec<[&'a ParseNode<'a>; 8]> {
    let mut items = SmallVec::new();
    if let Some((item, tail)) = children.split_first() {
        if !matches!(item.value, ParseValue::Ignored) {
            items.push(*item);
        }
        if let Some(tail) = tail.first() {
            items.extend_from_slice(tail.children());
        }
    }
    items
}
