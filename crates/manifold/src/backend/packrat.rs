//! Memoizing recursive descent (packrat) over the combinator graph.
//!
//! No lowering happens here: the driver interprets grammar nodes directly,
//! so compile is a validation pass and nothing more. The memo table is keyed
//! by (node identity, cursor) and owned by the parse call; ordered choice
//! plus memoization gives PEG semantics with unbounded lookahead in linear
//! time and space per (node, position).
//!
//! Left recursion is handled with memo seeding: a key whose computation is
//! still in progress answers failure, and when the rule later succeeds
//! through another alternative, the result is planted as the seed and the
//! rule re-evaluated until a pass stops consuming strictly more input.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::backend::{
    validate_bindings, Backend, BackendCapabilities, BackendId, Compiled, CompileOptions, Parse,
    ParseMetrics,
};
use crate::cursor::Cursor;
use crate::error::{CompileError, ExpectedSet, ParseError};
use crate::grammar::{ByteSet, Grammar, GrammarNode, NodeId};
use crate::tree::{ActionContext, ParseArena, ParseNode, ParseValue};

/// The packrat backend.
pub struct PackratBackend;

impl Backend for PackratBackend {
    fn id(&self) -> BackendId {
        BackendId::Packrat
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "packrat",
            supports_left_recursion: true,
            supports_ambiguity: false,
            supports_peg_lookahead: true,
            max_lookahead: None,
        }
    }

    fn compile(
        &self,
        grammar: &Grammar,
        _options: &CompileOptions,
    ) -> Result<Compiled, CompileError> {
        validate_bindings(grammar)?;
        Ok(Compiled {
            backend: BackendId::Packrat,
            state: Box::new(()),
            cfg: None,
        })
    }

    fn parse<'a>(
        &self,
        _compiled: &Compiled,
        grammar: &Grammar,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<Parse<'a>, ParseError> {
        let mut driver = Driver {
            grammar,
            input,
            arena,
            memo: HashMap::default(),
            log: Vec::new(),
            fail_pos: 0,
            expected: ExpectedSet::new(),
            memo_hits: 0,
        };
        match driver.apply(grammar.start(), Cursor::new())? {
            Some(step) => Ok(Parse {
                root: step.node,
                ambiguous: false,
                metrics: ParseMetrics {
                    bytes_consumed: step.cur.byte(),
                    memo_hits: driver.memo_hits,
                },
            }),
            None => Err(ParseError::Failed {
                position: driver.fail_pos,
                expected: driver.expected,
            }),
        }
    }
}

/// A successful match: the cursor after it and the produced tree node.
#[derive(Clone, Copy)]
struct Step<'a> {
    cur: Cursor,
    node: &'a ParseNode<'a>,
}

type EvalResult<'a> = Result<Option<Step<'a>>, crate::arena::AllocError>;

enum Memo<'a> {
    InProgress { recursed: bool },
    Done(Option<Step<'a>>),
}

struct Driver<'g, 'a> {
    grammar: &'g Grammar,
    input: &'a [u8],
    arena: &'a ParseArena,
    memo: HashMap<(NodeId, Cursor), Memo<'a>, ahash::RandomState>,
    /// Keys inserted as `Done`, in insertion order; used to wipe results
    /// computed under a stale left-recursion seed.
    log: Vec<(NodeId, Cursor)>,
    fail_pos: usize,
    expected: ExpectedSet,
    memo_hits: usize,
}

impl<'g, 'a> Driver<'g, 'a> {
    fn apply(&mut self, id: NodeId, cur: Cursor) -> EvalResult<'a> {
        let key = (id, cur);
        match self.memo.get_mut(&key) {
            Some(Memo::Done(res)) => {
                self.memo_hits += 1;
                return Ok(*res);
            }
            Some(Memo::InProgress { recursed }) => {
                // Left recursion: the in-progress computation is seeded as
                // failure on this pass.
                *recursed = true;
                return Ok(None);
            }
            None => {}
        }

        self.memo.insert(key, Memo::InProgress { recursed: false });
        let log_start = self.log.len();
        let mut res = self.eval(id, cur)?;

        let recursed = matches!(
            self.memo.get(&key),
            Some(Memo::InProgress { recursed: true })
        );
        if recursed && res.is_some() {
            // Grow the seed to a fixed point. Each pass starts from a clean
            // slate: results memoized under the previous seed are stale.
            loop {
                self.wipe(log_start);
                self.memo.insert(key, Memo::Done(res));
                let next = self.eval(id, cur)?;
                match (next, res) {
                    (Some(grown), Some(best)) if grown.cur.byte() > best.cur.byte() => {
                        res = next;
                    }
                    _ => break,
                }
            }
            self.wipe(log_start);
        }

        self.memo.insert(key, Memo::Done(res));
        self.log.push(key);
        Ok(res)
    }

    fn wipe(&mut self, from: usize) {
        for key in self.log.drain(from..) {
            self.memo.remove(&key);
        }
    }

    fn fail_at(&mut self, pos: usize, add: impl FnOnce(&mut ExpectedSet)) {
        if pos > self.fail_pos {
            self.fail_pos = pos;
            self.expected.clear();
        }
        if pos == self.fail_pos {
            add(&mut self.expected);
        }
    }

    #[allow(clippy::too_many_lines)]
    fn eval(&mut self, id: NodeId, cur: Cursor) -> EvalResult<'a> {
        match self.grammar.node(id) {
            GrammarNode::Token(bytes) => {
                let mut end = cur;
                for &b in bytes.iter() {
                    match end.peek(self.input) {
                        Some(got) if got == b => end = end.advance_byte(),
                        _ => {
                            self.fail_at(end.byte(), |e| e.insert_byte(b));
                            return Ok(None);
                        }
                    }
                }
                let value = ParseValue::Token(&self.input[cur.byte()..end.byte()]);
                let node = self.arena.node(value, cur.byte(), end.byte(), id)?;
                Ok(Some(Step { cur: end, node }))
            }
            GrammarNode::CharSet(set) => match cur.peek(self.input) {
                Some(b) if set.contains(b) => {
                    let end = cur.advance_byte();
                    let value = ParseValue::Bytes(&self.input[cur.byte()..end.byte()]);
                    let node = self.arena.node(value, cur.byte(), end.byte(), id)?;
                    Ok(Some(Step { cur: end, node }))
                }
                _ => {
                    let set = *set;
                    self.fail_at(cur.byte(), |e| e.insert_set(&set));
                    Ok(None)
                }
            },
            GrammarNode::Anything => match cur.peek(self.input) {
                Some(_) => {
                    let end = cur.advance_byte();
                    let value = ParseValue::Bytes(&self.input[cur.byte()..end.byte()]);
                    let node = self.arena.node(value, cur.byte(), end.byte(), id)?;
                    Ok(Some(Step { cur: end, node }))
                }
                None => {
                    self.fail_at(cur.byte(), |e| e.insert_set(&ByteSet::full()));
                    Ok(None)
                }
            },
            GrammarNode::End => {
                if cur.at_end(self.input) {
                    let node = self.arena.empty_node(id, cur.byte())?;
                    Ok(Some(Step { cur, node }))
                } else {
                    self.fail_at(cur.byte(), ExpectedSet::insert_eof);
                    Ok(None)
                }
            }
            GrammarNode::Nothing => {
                self.fail_at(cur.byte(), |_| {});
                Ok(None)
            }
            GrammarNode::Epsilon => {
                let node = self.arena.empty_node(id, cur.byte())?;
                Ok(Some(Step { cur, node }))
            }
            GrammarNode::Sequence(items) => {
                let items = items.as_slice();
                let mut kept: SmallVec<[&ParseNode<'a>; 8]> = SmallVec::new();
                let mut end = cur;
                for &child in items {
                    let Some(step) = self.apply(child, end)? else {
                        return Ok(None);
                    };
                    if !matches!(step.node.value, ParseValue::Ignored) {
                        kept.push(step.node);
                    }
                    end = step.cur;
                }
                let value = self.arena.seq(&kept)?;
                let node = self.arena.node(value, cur.byte(), end.byte(), id)?;
                Ok(Some(Step { cur: end, node }))
            }
            GrammarNode::Choice(items) => {
                let items = items.as_slice();
                for &alt in items {
                    if let Some(step) = self.apply(alt, cur)? {
                        return Ok(Some(step));
                    }
                }
                Ok(None)
            }
            GrammarNode::Optional(child) => {
                let child = *child;
                if let Some(step) = self.apply(child, cur)? {
                    return Ok(Some(step));
                }
                let node = self.arena.empty_node(id, cur.byte())?;
                Ok(Some(Step { cur, node }))
            }
            GrammarNode::Many(child) => {
                let child = *child;
                self.repeat(id, child, cur, false)
            }
            GrammarNode::Many1(child) => {
                let child = *child;
                self.repeat(id, child, cur, true)
            }
            GrammarNode::SepBy { item, sep } => {
                let (item, sep) = (*item, *sep);
                self.separated(id, item, sep, cur, false)
            }
            GrammarNode::SepBy1 { item, sep } => {
                let (item, sep) = (*item, *sep);
                self.separated(id, item, sep, cur, true)
            }
            GrammarNode::FollowedBy(child) => {
                let child = *child;
                if self.apply(child, cur)?.is_some() {
                    let node = self.arena.empty_node(id, cur.byte())?;
                    Ok(Some(Step { cur, node }))
                } else {
                    Ok(None)
                }
            }
            GrammarNode::NotFollowedBy(child) => {
                let child = *child;
                if self.apply(child, cur)?.is_some() {
                    self.fail_at(cur.byte(), |_| {});
                    Ok(None)
                } else {
                    let node = self.arena.empty_node(id, cur.byte())?;
                    Ok(Some(Step { cur, node }))
                }
            }
            GrammarNode::Indirect(target) => {
                // Bound before compile; validation guarantees Some.
                let Some(target) = *target else {
                    return Ok(None);
                };
                self.apply(target, cur)
            }
            GrammarNode::Action { child, action } => {
                let child = *child;
                let action = action.clone();
                let Some(step) = self.apply(child, cur)? else {
                    return Ok(None);
                };
                let ctx = ActionContext {
                    arena: self.arena,
                    input: self.input,
                };
                match (action.as_ref())(&ctx, step.node) {
                    Ok(value) => {
                        let node =
                            self.arena
                                .node(value, step.node.start, step.node.end, id)?;
                        Ok(Some(Step {
                            cur: step.cur,
                            node,
                        }))
                    }
                    Err(_) => {
                        self.fail_at(cur.byte(), |_| {});
                        Ok(None)
                    }
                }
            }
            GrammarNode::Attr { child, pred } => {
                let child = *child;
                let pred = pred.clone();
                let Some(step) = self.apply(child, cur)? else {
                    return Ok(None);
                };
                if (pred.as_ref())(step.node) {
                    Ok(Some(step))
                } else {
                    self.fail_at(cur.byte(), |_| {});
                    Ok(None)
                }
            }
            GrammarNode::Ignore(child) => {
                let child = *child;
                let Some(step) = self.apply(child, cur)? else {
                    return Ok(None);
                };
                let node = self.arena.node(
                    ParseValue::Ignored,
                    step.node.start,
                    step.node.end,
                    id,
                )?;
                Ok(Some(Step {
                    cur: step.cur,
                    node,
                }))
            }
        }
    }

    /// Greedy repetition: the longest prefix of repeated matches. A match
    /// that consumes nothing ends the loop to guarantee termination.
    fn repeat(&mut self, id: NodeId, child: NodeId, cur: Cursor, at_least_one: bool) -> EvalResult<'a> {
        let mut items: SmallVec<[&ParseNode<'a>; 8]> = SmallVec::new();
        let mut end = cur;
        let mut count = 0usize;
        while let Some(step) = self.apply(child, end)? {
            let advanced = step.cur > end;
            if !matches!(step.node.value, ParseValue::Ignored) {
                items.push(step.node);
            }
            end = step.cur;
            count += 1;
            if !advanced {
                break;
            }
        }
        if at_least_one && count == 0 {
            return Ok(None);
        }
        let value = self.arena.seq(&items)?;
        let node = self.arena.node(value, cur.byte(), end.byte(), id)?;
        Ok(Some(Step { cur: end, node }))
    }

    /// Separated repetition; yields the items, not the separators. A
    /// trailing separator with no following item is left unconsumed.
    fn separated(
        &mut self,
        id: NodeId,
        item: NodeId,
        sep: NodeId,
        cur: Cursor,
        at_least_one: bool,
    ) -> EvalResult<'a> {
        let mut items: SmallVec<[&ParseNode<'a>; 8]> = SmallVec::new();
        let Some(first) = self.apply(item, cur)? else {
            if at_least_one {
                return Ok(None);
            }
            let node = self.arena.empty_node(id, cur.byte())?;
            return Ok(Some(Step { cur, node }));
        };
        if !matches!(first.node.value, ParseValue::Ignored) {
            items.push(first.node);
        }
        let mut end = first.cur;
        loop {
            let Some(sep_step) = self.apply(sep, end)? else {
                break;
            };
            let Some(item_step) = self.apply(item, sep_step.cur)? else {
                break;
            };
            if item_step.cur <= end {
                // Neither separator nor item consumed anything.
                break;
            }
            if !matches!(item_step.node.value, ParseValue::Ignored) {
                items.push(item_step.node);
            }
            end = item_step.cur;
        }
        let value = self.arena.seq(&items)?;
        let node = self.arena.node(value, cur.byte(), end.byte(), id)?;
        Ok(Some(Step { cur: end, node }))
    }
}
