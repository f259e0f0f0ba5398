//! Generalized LR over a graph-structured stack.
//!
//! Table construction is shared with the LALR backend, but conflicts stay
//! in the table: a cell may hold several actions and every one of them is
//! explored. Stacks live in a GSS — a DAG of (state) nodes with
//! value-labelled edges to their predecessors — so parallel stacks share
//! common prefixes and converging stacks merge. When two derivations reach
//! the same GSS edge with different values, the edge's label becomes an
//! ambiguity node carrying both.
//!
//! At every input position all applicable reductions run before any shift.
//! Tops with neither action die. Acceptance is probed at each position
//! under end-of-input lookahead, so a branch that completes the start
//! symbol after consuming a prefix contributes that prefix parse to the
//! returned forest.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::backend::lalr::table::{self, ConflictPolicy, LrAction, LrTable};
use crate::backend::lalr::expected_set;
use crate::backend::{
    Backend, BackendCapabilities, BackendId, Compiled, CompileOptions, Parse, ParseMetrics,
};
use crate::cfg::{desugar, reduce, Cfg, Reduced, Term, TERM_EOF};
use crate::error::{CompileError, ExpectedSet, ParseError};
use crate::grammar::Grammar;
use crate::tree::{ParseArena, ParseNode, ParseValue};

/// The GLR backend.
pub struct GlrBackend;

struct GlrState {
    cfg: Arc<Cfg>,
    table: LrTable,
}

impl Backend for GlrBackend {
    fn id(&self) -> BackendId {
        BackendId::Glr
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "GLR",
            supports_left_recursion: true,
            supports_ambiguity: true,
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
        let table = table::build(&cfg, ConflictPolicy::Keep)?;
        Ok(Compiled {
            backend: BackendId::Glr,
            state: Box::new(GlrState {
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
            .downcast_ref::<GlrState>()
            .expect("GLR state attached by compile");
        Engine {
            cfg: &state.cfg,
            table: &state.table,
            grammar,
            arena,
            input,
            gss: Vec::new(),
            accepts: Vec::new(),
            ambiguous: false,
        }
        .drive()
    }
}

/// One GSS node: an automaton state plus value-labelled edges to the stack
/// frames beneath it. Node identity is the index into the per-parse node
/// vector.
#[derive(Clone)]
struct GssNode<'a> {
    state: u32,
    edges: SmallVec<[(u32, &'a ParseNode<'a>); 2]>,
}

/// Frontier: live stack tops at the current position, keyed by state so
/// converging stacks merge into one node.
type Frontier = HashMap<u32, u32, ahash::RandomState>;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Task {
    node: u32,
    prod: u32,
    /// When set, only reduction paths entering through this edge index are
    /// explored; used after a new edge joins an already-reduced node.
    via_edge: Option<usize>,
}

struct Engine<'a, 'g> {
    cfg: &'g Cfg,
    table: &'g LrTable,
    grammar: &'g Grammar,
    arena: &'a ParseArena,
    input: &'a [u8],
    gss: Vec<GssNode<'a>>,
    accepts: Vec<&'a ParseNode<'a>>,
    ambiguous: bool,
}

enum EdgeOutcome {
    Added(usize),
    Merged,
    Duplicate,
}

impl<'a> Engine<'a, '_> {
    fn drive(mut self) -> Result<Parse<'a>, ParseError> {
        self.gss.push(GssNode {
            state: 0,
            edges: SmallVec::new(),
        });
        let mut frontier = Frontier::default();
        frontier.insert(0, 0);

        let mut death: (usize, ExpectedSet) = (0, ExpectedSet::new());

        for pos in 0..=self.input.len() {
            if frontier.is_empty() {
                break;
            }

            // Probe for completed prefix parses under end-of-input
            // lookahead before this position's own token is considered.
            let has_eof_entry = frontier
                .keys()
                .any(|&st| self.table.actions[st as usize].contains_key(&TERM_EOF));
            if has_eof_entry {
                self.probe_accepts(&frontier, pos)?;
            }

            let Some(&byte) = self.input.get(pos) else {
                death = (pos, self.union_expected(&frontier));
                break;
            };
            let term = Term::from(byte);

            // All reductions applicable under `term` precede the shifts.
            self.closure(&mut frontier, term, pos, 0)?;

            let mut next = Frontier::default();
            for (&state, &node) in &frontier {
                let Some(actions) = self.table.actions[state as usize].get(&term) else {
                    continue;
                };
                let shifts: SmallVec<[u32; 2]> = actions
                    .iter()
                    .filter_map(|a| match a {
                        LrAction::Shift(t) => Some(*t),
                        _ => None,
                    })
                    .collect();
                for target in shifts {
                    let leaf = self.arena.node(
                        ParseValue::Bytes(&self.input[pos..pos + 1]),
                        pos,
                        pos + 1,
                        self.grammar.start(),
                    )?;
                    if let Some(&existing) = next.get(&target) {
                        self.gss[existing as usize].edges.push((node, leaf));
                    } else {
                        let idx = self.push_node(target);
                        self.gss[idx as usize].edges.push((node, leaf));
                        next.insert(target, idx);
                    }
                }
            }

            if next.is_empty() {
                death = (pos, self.union_expected(&frontier));
                frontier.clear();
                break;
            }
            frontier = next;
        }

        self.finish(death)
    }

    fn finish(self, death: (usize, ExpectedSet)) -> Result<Parse<'a>, ParseError> {
        let Engine {
            arena,
            grammar,
            accepts,
            mut ambiguous,
            ..
        } = self;
        let root = match accepts.len() {
            0 => {
                return Err(ParseError::Failed {
                    position: death.0,
                    expected: death.1,
                })
            }
            1 => accepts[0],
            _ => {
                ambiguous = true;
                let end = accepts.iter().map(|n| n.end).max().unwrap_or(0);
                let value = arena.ambiguous(&accepts)?;
                arena.node(value, 0, end, grammar.start())?
            }
        };
        Ok(Parse {
            root,
            ambiguous,
            metrics: ParseMetrics {
                bytes_consumed: root.end,
                memo_hits: 0,
            },
        })
    }

    fn push_node(&mut self, state: u32) -> u32 {
        let idx = u32::try_from(self.gss.len()).expect("GSS node count overflow");
        self.gss.push(GssNode {
            state,
            edges: SmallVec::new(),
        });
        idx
    }

    fn union_expected(&self, frontier: &Frontier) -> ExpectedSet {
        let mut expected = ExpectedSet::new();
        for &state in frontier.keys() {
            expected.merge(&expected_set(self.table, state));
        }
        expected
    }

    /// Run the reduce closure under end-of-input lookahead on scratch
    /// copies of the live frontier, collecting accepted values. Nodes that
    /// existed before the probe are cloned before mutation and the scratch
    /// tail of the GSS is discarded afterwards.
    fn probe_accepts(&mut self, frontier: &Frontier, pos: usize) -> Result<(), ParseError> {
        let floor = self.gss.len();
        let mut scratch = frontier.clone();
        self.closure(&mut scratch, TERM_EOF, pos, floor)?;

        for (&state, &node) in &scratch {
            let Some(actions) = self.table.actions[state as usize].get(&TERM_EOF) else {
                continue;
            };
            if actions.iter().any(|a| matches!(a, LrAction::Accept)) {
                for &(_, value) in &self.gss[node as usize].edges {
                    if !self.accepts.iter().any(|v| std::ptr::eq(*v, value)) {
                        self.accepts.push(value);
                    }
                }
            }
        }

        self.gss.truncate(floor);
        Ok(())
    }

    /// Perform every reduction applicable under `term` at `pos`, growing
    /// the frontier with the goto targets. Under end-of-input lookahead the
    /// zero-width end-marker shifts participate in the same fixed point.
    ///
    /// Nodes below `floor` are copy-on-write: the probe must not disturb
    /// the live GSS.
    fn closure(
        &mut self,
        frontier: &mut Frontier,
        term: Term,
        pos: usize,
        floor: usize,
    ) -> Result<(), ParseError> {
        let mut remap: HashMap<u32, u32, ahash::RandomState> = HashMap::default();
        let mut queue: Vec<Task> = Vec::new();
        let mut seen: HashSet<Task, ahash::RandomState> = HashSet::default();

        let snapshot: Vec<u32> = frontier.values().copied().collect();
        for node in snapshot {
            self.enqueue_reduces(node, term, None, &mut queue);
        }

        loop {
            while let Some(task) = queue.pop() {
                if !seen.insert(task) {
                    continue;
                }
                let rhs_len = self.cfg.prod(task.prod).rhs.len();
                let lhs = self.cfg.prod(task.prod).lhs;
                let paths = collect_paths(&self.gss, task.node, rhs_len, task.via_edge);
                for (pred, children) in paths {
                    let value = match reduce(
                        self.grammar,
                        self.cfg,
                        task.prod,
                        &children,
                        pos,
                        self.arena,
                        self.input,
                    )? {
                        Reduced::Node(node) => node,
                        // A rejecting action or predicate kills this branch.
                        Reduced::Rejected => continue,
                    };
                    let pred_state = self.gss[pred as usize].state;
                    let Some(&target) = self.table.gotos[pred_state as usize].get(&lhs) else {
                        continue;
                    };
                    if let Some(&existing) = frontier.get(&target) {
                        let existing = self.materialize(existing, floor, &mut remap, frontier);
                        match self.add_edge(existing, pred, value)? {
                            EdgeOutcome::Added(edge) => {
                                self.enqueue_reduces(existing, term, Some(edge), &mut queue);
                            }
                            EdgeOutcome::Merged | EdgeOutcome::Duplicate => {}
                        }
                    } else {
                        let idx = self.push_node(target);
                        self.gss[idx as usize].edges.push((pred, value));
                        frontier.insert(target, idx);
                        self.enqueue_reduces(idx, term, None, &mut queue);
                    }
                }
            }

            // End-marker shifts consume the real end of input; a probe at
            // an interior position reduces under hypothetical end-of-input
            // lookahead but must not satisfy an explicit end assertion.
            if term != TERM_EOF || pos != self.input.len() {
                break;
            }

            // The shifts are zero-width: fold them into the fixed point
            // instead of a separate position.
            let mut shifted = false;
            let snapshot: Vec<(u32, u32)> =
                frontier.iter().map(|(&s, &n)| (s, n)).collect();
            for (state, node) in snapshot {
                let Some(actions) = self.table.actions[state as usize].get(&TERM_EOF) else {
                    continue;
                };
                let shifts: SmallVec<[u32; 2]> = actions
                    .iter()
                    .filter_map(|a| match a {
                        LrAction::Shift(t) => Some(*t),
                        _ => None,
                    })
                    .collect();
                for target in shifts {
                    let leaf = self.arena.empty_node(self.grammar.start(), pos)?;
                    if let Some(&existing) = frontier.get(&target) {
                        let existing = self.materialize(existing, floor, &mut remap, frontier);
                        match self.add_edge(existing, node, leaf)? {
                            EdgeOutcome::Added(edge) => {
                                self.enqueue_reduces(existing, term, Some(edge), &mut queue);
                                shifted = true;
                            }
                            EdgeOutcome::Merged | EdgeOutcome::Duplicate => {}
                        }
                    } else {
                        let idx = self.push_node(target);
                        self.gss[idx as usize].edges.push((node, leaf));
                        frontier.insert(target, idx);
                        self.enqueue_reduces(idx, term, None, &mut queue);
                        shifted = true;
                    }
                }
            }
            if !shifted {
                break;
            }
        }
        Ok(())
    }

    fn enqueue_reduces(
        &self,
        node: u32,
        term: Term,
        via_edge: Option<usize>,
        queue: &mut Vec<Task>,
    ) {
        let state = self.gss[node as usize].state;
        let Some(actions) = self.table.actions[state as usize].get(&term) else {
            return;
        };
        for action in actions {
            if let LrAction::Reduce(prod) = action {
                queue.push(Task {
                    node,
                    prod: *prod,
                    via_edge,
                });
            }
        }
    }

    /// Clone-on-write for nodes that predate the probe floor.
    fn materialize(
        &mut self,
        node: u32,
        floor: usize,
        remap: &mut HashMap<u32, u32, ahash::RandomState>,
        frontier: &mut Frontier,
    ) -> u32 {
        if node as usize >= floor {
            return node;
        }
        if let Some(&mapped) = remap.get(&node) {
            return mapped;
        }
        let clone = self.gss[node as usize].clone();
        let state = clone.state;
        let idx = u32::try_from(self.gss.len()).expect("GSS node count overflow");
        self.gss.push(clone);
        remap.insert(node, idx);
        frontier.insert(state, idx);
        idx
    }

    fn add_edge(
        &mut self,
        node: u32,
        pred: u32,
        value: &'a ParseNode<'a>,
    ) -> Result<EdgeOutcome, ParseError> {
        for i in 0..self.gss[node as usize].edges.len() {
            let (edge_pred, existing) = self.gss[node as usize].edges[i];
            if edge_pred != pred {
                continue;
            }
            if std::ptr::eq(existing, value) || existing.structural_eq(value) {
                return Ok(EdgeOutcome::Duplicate);
            }
            // Convergence with a different derivation: label the edge with
            // an ambiguity node holding all alternatives.
            let mut alts: SmallVec<[&ParseNode<'a>; 4]> = SmallVec::new();
            match existing.value {
                ParseValue::Ambiguous(prev) => alts.extend_from_slice(prev),
                _ => alts.push(existing),
            }
            alts.push(value);
            let merged_value = self.arena.ambiguous(&alts)?;
            let merged = self.arena.node(
                merged_value,
                existing.start.min(value.start),
                existing.end.max(value.end),
                existing.node,
            )?;
            self.gss[node as usize].edges[i] = (pred, merged);
            self.ambiguous = true;
            return Ok(EdgeOutcome::Merged);
        }
        self.gss[node as usize].edges.push((pred, value));
        Ok(EdgeOutcome::Added(self.gss[node as usize].edges.len() - 1))
    }
}

/// Every path of `len` edges from `from`, as (endpoint, values walked).
/// Unwinding pushes the deepest edge's value first, so the collected
/// values arrive in input order.
fn collect_paths<'a>(
    gss: &[GssNode<'a>],
    from: u32,
    len: usize,
    via_edge: Option<usize>,
) -> Vec<(u32, SmallVec<[&'a ParseNode<'a>; 8]>)> {
    if len == 0 {
        return vec![(from, SmallVec::new())];
    }
    let mut out = Vec::new();
    let node = &gss[from as usize];
    for (i, &(pred, value)) in node.edges.iter().enumerate() {
        if let Some(required) = via_edge {
            if i != required {
                continue;
            }
        }
        for (endpoint, mut values) in collect_paths(gss, pred, len - 1, None) {
            values.push(value);
            out.push((endpoint, values));
        }
    }
    out
}
