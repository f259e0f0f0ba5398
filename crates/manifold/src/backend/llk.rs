//! Predictive LL(k) table parser.
//!
//! Compile lowers the grammar to its CFG, computes FIRST_k and FOLLOW_k,
//! and fills a table mapping (non-terminal, lookahead string) to at most
//! one production. Two productions of the same non-terminal whose
//! `FIRST_k(β · FOLLOW_k(A))` sets overlap make the grammar not LL(k) and
//! compilation fails.
//!
//! The driver keeps an explicit symbol stack. Expanding a non-terminal
//! pushes its right-hand side in reverse under a reduce marker; popping the
//! marker assembles the children into a tree node. Acceptance requires the
//! stack to empty with the input exhausted.

use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::backend::{
    Backend, BackendCapabilities, BackendId, Compiled, CompileOptions, Parse, ParseMetrics,
};
use crate::cfg::analysis::{self, LookStr};
use crate::cfg::{desugar, reduce, Cfg, NtId, Reduced, Symbol, Term, TERM_EOF};
use crate::error::{CompileError, ExpectedSet, ParseError};
use crate::grammar::Grammar;
use crate::tree::{ParseArena, ParseNode, ParseValue};

/// The LL(k) backend.
pub struct LlkBackend;

struct LlkState {
    cfg: Arc<Cfg>,
    k: usize,
    table: HashMap<(NtId, LookStr), u32, ahash::RandomState>,
}

impl Backend for LlkBackend {
    fn id(&self) -> BackendId {
        BackendId::Llk
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "LL(k)",
            supports_left_recursion: false,
            supports_ambiguity: false,
            supports_peg_lookahead: false,
            max_lookahead: None,
        }
    }

    fn compile(
        &self,
        grammar: &Grammar,
        options: &CompileOptions,
    ) -> Result<Compiled, CompileError> {
        let cfg = Arc::new(desugar::lower(grammar)?);
        let k = options.lookahead.max(1);
        let table = build_table(&cfg, k)?;
        Ok(Compiled {
            backend: BackendId::Llk,
            state: Box::new(LlkState {
                cfg: cfg.clone(),
                k,
                table,
            }),
            cfg: Some(cfg),
        })
    }

    fn parse<'a>(
        &self,
        compiled: &Compiled,
        grammar: &Grammar,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<Parse<'a>, ParseError> {
        let state = compiled
            .state
            .downcast_ref::<LlkState>()
            .expect("LL state attached by compile");
        drive(state, grammar, arena, input)
    }
}

fn build_table(
    cfg: &Cfg,
    k: usize,
) -> Result<HashMap<(NtId, LookStr), u32, ahash::RandomState>, CompileError> {
    let first_k = analysis::first_k_sets(cfg, k);
    let follow_k = analysis::follow_k_sets(cfg, k, &first_k);

    let mut table: HashMap<(NtId, LookStr), u32, ahash::RandomState> = HashMap::default();
    for (idx, prod) in cfg.prods.iter().enumerate() {
        let idx = u32::try_from(idx).expect("production count overflow");
        let rhs_first = analysis::first_k_of_string(&prod.rhs, k, &first_k);
        let predict = analysis::concat_k(&rhs_first, &follow_k[prod.lhs.index()], k);
        for lookahead in predict {
            match table.get(&(prod.lhs, lookahead.clone())) {
                Some(&other) if other != idx => {
                    return Err(CompileError::GrammarNotLlk {
                        k,
                        nonterminal: format!("{:?}", prod.lhs),
                        lookahead: render_lookahead(&lookahead),
                    });
                }
                Some(_) => {}
                None => {
                    table.insert((prod.lhs, lookahead), idx);
                }
            }
        }
    }
    Ok(table)
}

fn render_lookahead(lookahead: &LookStr) -> String {
    let mut out = String::new();
    for &term in lookahead {
        if term == TERM_EOF {
            out.push('⊣');
        } else {
            let b = term as u8;
            if b.is_ascii_graphic() {
                out.push(b as char);
            } else {
                out.push_str(&format!("\\x{b:02x}"));
            }
        }
    }
    out
}

enum Op {
    Sym(Symbol),
    Finish { prod: u32, count: usize },
}

fn drive<'a>(
    state: &LlkState,
    grammar: &Grammar,
    arena: &'a ParseArena,
    input: &'a [u8],
) -> Result<Parse<'a>, ParseError> {
    let cfg = &*state.cfg;
    let mut ops = vec![Op::Sym(Symbol::Nt(cfg.start()))];
    let mut values: Vec<&'a ParseNode<'a>> = Vec::new();
    let mut pos = 0usize;

    while let Some(op) = ops.pop() {
        match op {
            Op::Sym(Symbol::T(TERM_EOF)) => {
                if pos < input.len() {
                    let mut expected = ExpectedSet::new();
                    expected.insert_eof();
                    return Err(ParseError::Failed {
                        position: pos,
                        expected,
                    });
                }
                values.push(arena.empty_node(grammar.start(), pos)?);
            }
            Op::Sym(Symbol::T(term)) => match input.get(pos) {
                Some(&b) if Term::from(b) == term => {
                    let leaf = arena.node(
                        ParseValue::Bytes(&input[pos..pos + 1]),
                        pos,
                        pos + 1,
                        grammar.start(),
                    )?;
                    values.push(leaf);
                    pos += 1;
                }
                _ => {
                    let mut expected = ExpectedSet::new();
                    expected.insert_byte(term as u8);
                    return Err(ParseError::Failed {
                        position: pos,
                        expected,
                    });
                }
            },
            Op::Sym(Symbol::Nt(nt)) => {
                let lookahead = analysis::input_lookahead(input, pos, state.k);
                let Some(&prod_idx) = state.table.get(&(nt, lookahead)) else {
                    return Err(ParseError::Failed {
                        position: pos,
                        expected: expected_for(state, nt),
                    });
                };
                let prod = cfg.prod(prod_idx);
                ops.push(Op::Finish {
                    prod: prod_idx,
                    count: prod.rhs.len(),
                });
                for sym in prod.rhs.iter().rev() {
                    ops.push(Op::Sym(*sym));
                }
            }
            Op::Finish { prod, count } => {
                let children: SmallVec<[&ParseNode<'a>; 8]> =
                    values.drain(values.len() - count..).collect();
                match reduce(grammar, cfg, prod, &children, pos, arena, input)? {
                    Reduced::Node(node) => values.push(node),
                    Reduced::Rejected => {
                        return Err(ParseError::Failed {
                            position: pos,
                            expected: ExpectedSet::new(),
                        });
                    }
                }
            }
        }
    }

    if pos < input.len() {
        let mut expected = ExpectedSet::new();
        expected.insert_eof();
        return Err(ParseError::Failed {
            position: pos,
            expected,
        });
    }

    let root = values.pop().expect("accepting stack holds the start value");
    Ok(Parse {
        root,
        ambiguous: false,
        metrics: ParseMetrics {
            bytes_consumed: pos,
            memo_hits: 0,
        },
    })
}

/// Terminals that begin any viable lookahead for `nt`, for error reports.
fn expected_for(state: &LlkState, nt: NtId) -> ExpectedSet {
    let mut expected = ExpectedSet::new();
    for (key_nt, lookahead) in state.table.keys() {
        if *key_nt != nt {
            continue;
        }
        match lookahead.first() {
            Some(&TERM_EOF) | None => expected.insert_eof(),
            Some(&term) => expected.insert_byte(term as u8),
        }
    }
    expected
}
