//! Lowering the combinator graph to the normalized CFG.
//!
//! One rule per node kind; the transformation is memoized on node identity
//! so shared subgraphs share non-terminals, and non-terminals are assigned
//! before their productions are filled so recursion through `indirect`
//! terminates.

use hashbrown::HashMap;
use smallvec::{smallvec, SmallVec};

use crate::cfg::{analysis, Cfg, NtData, NtId, NtShape, Production, Symbol, Term, TERM_EOF};
use crate::error::CompileError;
use crate::grammar::{Grammar, GrammarNode, NodeId};

/// Lower a grammar to its normalized CFG and run the set analyses.
///
/// # Errors
///
/// Returns [`CompileError::UnboundIndirect`] for unbound indirect nodes and
/// [`CompileError::PegOnlyConstructInCfg`] for lookahead nodes, which only
/// the packrat backend can execute.
pub(crate) fn lower(grammar: &Grammar) -> Result<Cfg, CompileError> {
    let mut lowering = Lowering {
        grammar,
        map: HashMap::default(),
        nts: Vec::new(),
        prods: Vec::new(),
    };
    let user_start = lowering.lower_node(grammar.start())?;

    // Augment: S' → S, accepted under end-of-input lookahead.
    let start = lowering.fresh_nt(grammar.start(), NtShape::Passthrough);
    lowering.push_prod(start, smallvec![Symbol::Nt(user_start)]);

    let mut cfg = Cfg {
        nts: lowering.nts,
        prods: lowering.prods,
        start,
        nullable: Vec::new(),
        first: Vec::new(),
        follow: Vec::new(),
    };
    analysis::compute(&mut cfg);
    Ok(cfg)
}

struct Lowering<'g> {
    grammar: &'g Grammar,
    map: HashMap<NodeId, NtId, ahash::RandomState>,
    nts: Vec<NtData>,
    prods: Vec<Production>,
}

impl Lowering<'_> {
    fn fresh_nt(&mut self, origin: NodeId, shape: NtShape) -> NtId {
        let id = NtId(u32::try_from(self.nts.len()).expect("non-terminal count overflow"));
        self.nts.push(NtData {
            prods: SmallVec::new(),
            origin,
            shape,
        });
        id
    }

    fn push_prod(&mut self, lhs: NtId, rhs: SmallVec<[Symbol; 4]>) {
        let idx = u32::try_from(self.prods.len()).expect("production count overflow");
        self.prods.push(Production { lhs, rhs });
        self.nts[lhs.index()].prods.push(idx);
    }

    fn lower_node(&mut self, id: NodeId) -> Result<NtId, CompileError> {
        if let Some(&nt) = self.map.get(&id) {
            return Ok(nt);
        }

        let shape = match self.grammar.node(id) {
            GrammarNode::Token(_) => NtShape::Token,
            GrammarNode::CharSet(_) | GrammarNode::Anything => NtShape::Byte,
            GrammarNode::End | GrammarNode::Epsilon | GrammarNode::Nothing => NtShape::Empty,
            GrammarNode::Sequence(_) => NtShape::Seq,
            GrammarNode::Choice(_) | GrammarNode::Optional(_) | GrammarNode::Indirect(_) => {
                NtShape::Passthrough
            }
            GrammarNode::Many(_) | GrammarNode::Many1(_) => NtShape::ManyTail,
            GrammarNode::SepBy { .. } | GrammarNode::SepBy1 { .. } => NtShape::SepHead,
            GrammarNode::FollowedBy(_) => {
                return Err(CompileError::PegOnlyConstructInCfg {
                    node: id,
                    construct: "followed_by",
                })
            }
            GrammarNode::NotFollowedBy(_) => {
                return Err(CompileError::PegOnlyConstructInCfg {
                    node: id,
                    construct: "not_followed_by",
                })
            }
            GrammarNode::Action { .. } => NtShape::Action,
            GrammarNode::Attr { .. } => NtShape::Attr,
            GrammarNode::Ignore(_) => NtShape::Ignore,
        };

        // Assign the non-terminal before filling productions so recursive
        // references resolve to it.
        let nt = self.fresh_nt(id, shape);
        self.map.insert(id, nt);

        match self.grammar.node(id) {
            GrammarNode::Token(bytes) => {
                let rhs = bytes.iter().map(|&b| Symbol::T(Term::from(b))).collect();
                self.push_prod(nt, rhs);
            }
            GrammarNode::CharSet(set) => {
                for b in set.iter() {
                    self.push_prod(nt, smallvec![Symbol::T(Term::from(b))]);
                }
            }
            GrammarNode::Anything => {
                for b in 0..=u8::MAX {
                    self.push_prod(nt, smallvec![Symbol::T(Term::from(b))]);
                }
            }
            GrammarNode::End => {
                self.push_prod(nt, smallvec![Symbol::T(TERM_EOF)]);
            }
            GrammarNode::Epsilon => {
                self.push_prod(nt, SmallVec::new());
            }
            GrammarNode::Nothing => {
                // No productions: the non-terminal derives nothing.
            }
            GrammarNode::Sequence(items) => {
                let items = items.clone();
                let mut rhs = SmallVec::with_capacity(items.len());
                for child in items {
                    rhs.push(Symbol::Nt(self.lower_node(child)?));
                }
                self.push_prod(nt, rhs);
            }
            GrammarNode::Choice(items) => {
                let items = items.clone();
                for child in items {
                    let child_nt = self.lower_node(child)?;
                    self.push_prod(nt, smallvec![Symbol::Nt(child_nt)]);
                }
            }
            GrammarNode::Optional(child) => {
                let child = *child;
                let child_nt = self.lower_node(child)?;
                self.push_prod(nt, smallvec![Symbol::Nt(child_nt)]);
                self.push_prod(nt, SmallVec::new());
            }
            GrammarNode::Many(child) => {
                // A → C A | ε
                let child = *child;
                let child_nt = self.lower_node(child)?;
                self.push_prod(nt, smallvec![Symbol::Nt(child_nt), Symbol::Nt(nt)]);
                self.push_prod(nt, SmallVec::new());
            }
            GrammarNode::Many1(child) => {
                // A → C A | C
                let child = *child;
                let child_nt = self.lower_node(child)?;
                self.push_prod(nt, smallvec![Symbol::Nt(child_nt), Symbol::Nt(nt)]);
                self.push_prod(nt, smallvec![Symbol::Nt(child_nt)]);
            }
            GrammarNode::SepBy { item, sep } | GrammarNode::SepBy1 { item, sep } => {
                let optional = matches!(self.grammar.node(id), GrammarNode::SepBy { .. });
                let (item, sep) = (*item, *sep);
                let item_nt = self.lower_node(item)?;
                let sep_nt = self.lower_node(sep)?;
                // A → C T | (ε)   T → S C T | ε
                let tail = self.fresh_nt(id, NtShape::SepTail);
                self.push_prod(
                    tail,
                    smallvec![Symbol::Nt(sep_nt), Symbol::Nt(item_nt), Symbol::Nt(tail)],
                );
                self.push_prod(tail, SmallVec::new());
                self.push_prod(nt, smallvec![Symbol::Nt(item_nt), Symbol::Nt(tail)]);
                if optional {
                    self.push_prod(nt, SmallVec::new());
                }
            }
            GrammarNode::Indirect(Some(target)) => {
                let target = *target;
                let target_nt = self.lower_node(target)?;
                self.push_prod(nt, smallvec![Symbol::Nt(target_nt)]);
            }
            GrammarNode::Indirect(None) => {
                return Err(CompileError::UnboundIndirect { node: id });
            }
            GrammarNode::Action { child, .. }
            | GrammarNode::Attr { child, .. }
            | GrammarNode::Ignore(child) => {
                let child = *child;
                let child_nt = self.lower_node(child)?;
                self.push_prod(nt, smallvec![Symbol::Nt(child_nt)]);
            }
            GrammarNode::FollowedBy(_) | GrammarNode::NotFollowedBy(_) => {
                unreachable!("lookahead nodes are rejected before assignment")
            }
        }

        Ok(nt)
    }
}
