//! LALR(1) backend: table construction plus the shift-reduce driver.
//!
//! The driver keeps a stack of (state, value) pairs. Shifting pushes a
//! terminal leaf; reducing pops one frame per right-hand-side symbol,
//! rebuilds the non-terminal's tree value (invoking its semantic action if
//! it has one), and follows GOTO. Errors carry the input position and the
//! exact set of terminals the current state would have accepted.

pub(crate) mod table;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::{
    Backend, BackendCapabilities, BackendId, Compiled, CompileOptions, Parse, ParseMetrics,
};
use crate::cfg::{desugar, reduce, Cfg, Reduced, Term, TERM_EOF};
use crate::error::{CompileError, ExpectedSet, ParseError};
use crate::grammar::Grammar;
use crate::tree::{ParseArena, ParseNode, ParseValue};

use self::table::{ConflictPolicy, LrAction, LrTable};

/// The LALR(1) backend.
pub struct LalrBackend;

pub(crate) struct LalrState {
    pub(crate) cfg: Arc<Cfg>,
    pub(crate) table: LrTable,
}

impl Backend for LalrBackend {
    fn id(&self) -> BackendId {
        BackendId::Lalr
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "LALR(1)",
            supports_left_recursion: true,
            supports_ambiguity: false,
            supports_peg_lookahead: false,
            max_lookahead: Some(1),
        }
    }

    fn compile(
        &self,
        grammar: &Grammar,
        _options: &CompileOptions,
    ) -> Result<Compiled, CompileError> {
        let cfg = Arc::new(desugar::lower(grammar)?);
        let table = table::build(&cfg, ConflictPolicy::Reject)?;
        Ok(Compiled {
            backend: BackendId::Lalr,
            state: Box::new(LalrState {
                cfg: cfg.clone(),
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
            .downcast_ref::<LalrState>()
            .expect("LALR state attached by compile");
        drive(&state.cfg, &state.table, grammar, arena, input)
    }
}

/// The shift-reduce loop, shared with the regular backend.
pub(crate) fn drive<'a>(
    cfg: &Cfg,
    table: &LrTable,
    grammar: &Grammar,
    arena: &'a ParseArena,
    input: &'a [u8],
) -> Result<Parse<'a>, ParseError> {
    let mut states: Vec<u32> = vec![0];
    let mut values: Vec<&'a ParseNode<'a>> = Vec::new();
    let mut pos = 0usize;

    // Bound on steps that consume no input at a single position; exceeding
    // it means a degenerate end-marker cycle.
    let fuel_per_pos = (table.state_count() + 1) * (cfg.production_count() + 2);
    let mut fuel = fuel_per_pos;

    loop {
        let term = input.get(pos).map_or(TERM_EOF, |&b| Term::from(b));
        let state = *states.last().expect("state stack is never empty");

        if fuel == 0 {
            return Err(ParseError::Failed {
                position: pos,
                expected: expected_set(table, state),
            });
        }
        fuel -= 1;

        let action = table.actions[state as usize]
            .get(&term)
            .and_then(|set| set.first())
            .copied();
        let Some(action) = action else {
            return Err(ParseError::Failed {
                position: pos,
                expected: expected_set(table, state),
            });
        };

        match action {
            LrAction::Shift(target) => {
                let leaf = if term == TERM_EOF {
                    arena.empty_node(grammar.start(), pos)?
                } else {
                    let leaf = arena.node(
                        ParseValue::Bytes(&input[pos..pos + 1]),
                        pos,
                        pos + 1,
                        grammar.start(),
                    )?;
                    pos += 1;
                    fuel = fuel_per_pos;
                    leaf
                };
                values.push(leaf);
                states.push(target);
            }
            LrAction::Reduce(prod_idx) => {
                let count = cfg.prod(prod_idx).rhs.len();
                let children: SmallVec<[&ParseNode<'a>; 8]> =
                    values.drain(values.len() - count..).collect();
                states.truncate(states.len() - count);
                let node = match reduce(grammar, cfg, prod_idx, &children, pos, arena, input)? {
                    Reduced::Node(node) => node,
                    Reduced::Rejected => {
                        return Err(ParseError::Failed {
                            position: pos,
                            expected: ExpectedSet::new(),
                        });
                    }
                };
                let top = *states.last().expect("state stack is never empty");
                let lhs = cfg.prod(prod_idx).lhs;
                let target = table.gotos[top as usize]
                    .get(&lhs)
                    .copied()
                    .expect("GOTO exists for every reduced non-terminal");
                values.push(node);
                states.push(target);
            }
            LrAction::Accept => {
                let root = values.pop().expect("accepting stack holds the start value");
                return Ok(Parse {
                    root,
                    ambiguous: false,
                    metrics: ParseMetrics {
                        bytes_consumed: pos,
                        memo_hits: 0,
                    },
                });
            }
        }
    }
}

pub(crate) fn expected_set(table: &LrTable, state: u32) -> ExpectedSet {
    let mut expected = ExpectedSet::new();
    for term in table.expected_in(state) {
        if term == TERM_EOF {
            expected.insert_eof();
        } else {
            expected.insert_byte(term as u8);
        }
    }
    expected
}
