//! LR(0) automaton construction and LALR(1) lookahead computation.
//!
//! Lookaheads are found with the spontaneous-generation / propagation
//! scheme: for each kernel item, an LR(1) closure probed with a dummy
//! lookahead discovers which lookaheads are generated spontaneously at the
//! successor states and which propagate from the kernel item itself; a
//! fixed point over the propagation links finishes the job.
//!
//! Conflicts are never resolved here. Under [`ConflictPolicy::Reject`]
//! (LALR) any cell with two actions aborts the build with the offending
//! state and items; under [`ConflictPolicy::Keep`] (GLR) all actions stay.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use std::collections::BTreeMap;

use crate::cfg::analysis::first_of_symbols;
use crate::cfg::{Cfg, NtId, Symbol, Term, TermSet, TERM_EOF};
use crate::error::CompileError;

/// An LR(0) item: production plus dot position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub(crate) struct Item {
    pub prod: u32,
    pub dot: u32,
}

impl Item {
    const fn advanced(self) -> Self {
        Self {
            prod: self.prod,
            dot: self.dot + 1,
        }
    }
}

/// A parse action.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum LrAction {
    Shift(u32),
    Reduce(u32),
    Accept,
}

/// All actions for one (state, terminal) cell; more than one only under
/// [`ConflictPolicy::Keep`].
pub(crate) type ActionSet = SmallVec<[LrAction; 1]>;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictPolicy {
    /// Conflicts are compile errors (LALR backend).
    Reject,
    /// Conflicts stay in the table (GLR backend).
    Keep,
}

/// ACTION and GOTO tables plus the automaton they came from.
#[derive(Debug)]
pub(crate) struct LrTable {
    pub actions: Vec<HashMap<Term, ActionSet, ahash::RandomState>>,
    pub gotos: Vec<HashMap<NtId, u32, ahash::RandomState>>,
}

impl LrTable {
    /// Number of automaton states.
    pub(crate) fn state_count(&self) -> usize {
        self.actions.len()
    }

    /// Terminals with any action in `state`, for error reporting.
    pub(crate) fn expected_in(&self, state: u32) -> impl Iterator<Item = Term> + '_ {
        self.actions[state as usize].keys().copied()
    }
}

/// Build the LALR(1) tables for a lowered grammar.
pub(crate) fn build(cfg: &Cfg, policy: ConflictPolicy) -> Result<LrTable, CompileError> {
    let automaton = build_lr0(cfg);
    let lookaheads = compute_lookaheads(cfg, &automaton);
    build_tables(cfg, &automaton, &lookaheads, policy)
}

struct Automaton {
    /// Kernel items per state, sorted.
    kernels: Vec<Vec<Item>>,
    /// Goto transition per state and symbol.
    transitions: Vec<BTreeMap<Symbol, u32>>,
    /// The augmented production `S' → S`.
    start_prod: u32,
}

fn next_symbol(cfg: &Cfg, item: Item) -> Option<Symbol> {
    cfg.prod(item.prod).rhs.get(item.dot as usize).copied()
}

/// LR(0) closure: items reachable by expanding non-terminals after a dot.
fn closure0(cfg: &Cfg, kernel: &[Item]) -> Vec<Item> {
    let mut seen: HashSet<Item, ahash::RandomState> = kernel.iter().copied().collect();
    let mut queue: Vec<Item> = kernel.to_vec();
    while let Some(item) = queue.pop() {
        if let Some(Symbol::Nt(nt)) = next_symbol(cfg, item) {
            for &prod in &cfg.nt(nt).prods {
                let child = Item { prod, dot: 0 };
                if seen.insert(child) {
                    queue.push(child);
                }
            }
        }
    }
    let mut items: Vec<Item> = seen.into_iter().collect();
    items.sort_unstable();
    items
}

fn build_lr0(cfg: &Cfg) -> Automaton {
    let start_prod = cfg.nt(cfg.start()).prods[0];
    let initial = vec![Item {
        prod: start_prod,
        dot: 0,
    }];

    let mut kernels = vec![initial.clone()];
    let mut index: HashMap<Vec<Item>, u32, ahash::RandomState> = HashMap::default();
    index.insert(initial, 0);
    let mut transitions: Vec<BTreeMap<Symbol, u32>> = vec![BTreeMap::new()];

    let mut worklist = vec![0u32];
    while let Some(state) = worklist.pop() {
        let closure = closure0(cfg, &kernels[state as usize]);

        // Group advanceable items by the symbol after the dot. BTreeMap
        // keeps successor numbering deterministic.
        let mut grouped: BTreeMap<Symbol, Vec<Item>> = BTreeMap::new();
        for item in closure {
            if let Some(sym) = next_symbol(cfg, item) {
                grouped.entry(sym).or_default().push(item.advanced());
            }
        }

        for (sym, mut kernel) in grouped {
            kernel.sort_unstable();
            kernel.dedup();
            let target = match index.get(&kernel) {
                Some(&t) => t,
                None => {
                    let t = u32::try_from(kernels.len()).expect("LR state count overflow");
                    index.insert(kernel.clone(), t);
                    kernels.push(kernel);
                    transitions.push(BTreeMap::new());
                    worklist.push(t);
                    t
                }
            };
            transitions[state as usize].insert(sym, target);
        }
    }

    Automaton {
        kernels,
        transitions,
        start_prod,
    }
}

/// Lookahead sets per state and kernel item.
type Lookaheads = Vec<HashMap<Item, TermSet, ahash::RandomState>>;

/// LR(1) closure over (item → lookahead set, propagates-dummy flag) pairs.
fn closure1(
    cfg: &Cfg,
    seeds: &[(Item, TermSet, bool)],
) -> HashMap<Item, (TermSet, bool), ahash::RandomState> {
    let mut items: HashMap<Item, (TermSet, bool), ahash::RandomState> = HashMap::default();
    let mut queue: Vec<Item> = Vec::new();
    for &(item, la, dummy) in seeds {
        items.insert(item, (la, dummy));
        queue.push(item);
    }

    while let Some(item) = queue.pop() {
        let Some(Symbol::Nt(nt)) = next_symbol(cfg, item) else {
            continue;
        };
        let (la, dummy) = items[&item];
        let suffix = &cfg.prod(item.prod).rhs[(item.dot + 1) as usize..];
        let suffix_first = first_of_symbols(cfg, suffix);

        let mut child_la = TermSet::new();
        child_la.union_terms(&suffix_first);
        let mut child_dummy = false;
        if suffix_first.has_epsilon() {
            child_la.union_terms(&la);
            child_dummy = dummy;
        }

        for &prod in &cfg.nt(nt).prods {
            let child = Item { prod, dot: 0 };
            let entry = items.entry(child).or_insert((TermSet::new(), false));
            let mut grew = entry.0.union_terms(&child_la);
            if child_dummy && !entry.1 {
                entry.1 = true;
                grew = true;
            }
            if grew {
                queue.push(child);
            }
        }
    }
    items
}

fn compute_lookaheads(cfg: &Cfg, automaton: &Automaton) -> Lookaheads {
    let states = automaton.kernels.len();
    let mut lookaheads: Lookaheads = vec![HashMap::default(); states];

    // ⊣ is the lookahead of the start item.
    let start_item = Item {
        prod: automaton.start_prod,
        dot: 0,
    };
    let mut eof = TermSet::new();
    eof.insert_term(TERM_EOF);
    lookaheads[0].insert(start_item, eof);

    // Discover spontaneous lookaheads and propagation links per kernel item.
    let mut links: Vec<((u32, Item), (u32, Item))> = Vec::new();
    for state in 0..states {
        let state_u = u32::try_from(state).expect("state count fits u32");
        let kernel = automaton.kernels[state].clone();
        for kernel_item in kernel {
            let probe = [(kernel_item, TermSet::new(), true)];
            let closed = closure1(cfg, &probe);
            for (item, (la, dummy)) in closed {
                let Some(sym) = next_symbol(cfg, item) else {
                    continue;
                };
                let target = automaton.transitions[state][&sym];
                let advanced = item.advanced();
                let entry = lookaheads[target as usize]
                    .entry(advanced)
                    .or_insert_with(TermSet::new);
                entry.union_terms(&la);
                if dummy {
                    links.push(((state_u, kernel_item), (target, advanced)));
                }
            }
        }
    }

    // Propagate to a fixed point.
    let mut changed = true;
    while changed {
        changed = false;
        for &((from_state, from_item), (to_state, to_item)) in &links {
            let source = lookaheads[from_state as usize]
                .get(&from_item)
                .copied()
                .unwrap_or_else(TermSet::new);
            let entry = lookaheads[to_state as usize]
                .entry(to_item)
                .or_insert_with(TermSet::new);
            changed |= entry.union_terms(&source);
        }
    }

    lookaheads
}

fn build_tables(
    cfg: &Cfg,
    automaton: &Automaton,
    lookaheads: &Lookaheads,
    policy: ConflictPolicy,
) -> Result<LrTable, CompileError> {
    let states = automaton.kernels.len();
    let mut actions: Vec<HashMap<Term, ActionSet, ahash::RandomState>> =
        vec![HashMap::default(); states];
    let mut gotos: Vec<HashMap<NtId, u32, ahash::RandomState>> = vec![HashMap::default(); states];

    for state in 0..states {
        for (&sym, &target) in &automaton.transitions[state] {
            match sym {
                Symbol::T(term) => {
                    push_action(&mut actions[state], term, LrAction::Shift(target));
                }
                Symbol::Nt(nt) => {
                    gotos[state].insert(nt, target);
                }
            }
        }

        // Final items, with lookaheads flowing from this state's kernel.
        let seeds: Vec<(Item, TermSet, bool)> = automaton.kernels[state]
            .iter()
            .map(|&item| {
                let la = lookaheads[state]
                    .get(&item)
                    .copied()
                    .unwrap_or_else(TermSet::new);
                (item, la, false)
            })
            .collect();
        let closed = closure1(cfg, &seeds);
        for (item, (la, _)) in closed {
            if next_symbol(cfg, item).is_some() {
                continue;
            }
            let action = if item.prod == automaton.start_prod {
                LrAction::Accept
            } else {
                LrAction::Reduce(item.prod)
            };
            for term in la.iter_terms() {
                push_action(&mut actions[state], term, action);
            }
        }

        if policy == ConflictPolicy::Reject {
            for (term, set) in &actions[state] {
                if set.len() > 1 {
                    return Err(conflict_error(cfg, automaton, state, *term, set));
                }
            }
        }
    }

    Ok(LrTable { actions, gotos })
}

fn push_action(
    row: &mut HashMap<Term, ActionSet, ahash::RandomState>,
    term: Term,
    action: LrAction,
) {
    let set = row.entry(term).or_default();
    if !set.contains(&action) {
        set.push(action);
    }
}

fn conflict_error(
    cfg: &Cfg,
    automaton: &Automaton,
    state: usize,
    term: Term,
    set: &ActionSet,
) -> CompileError {
    let closure = closure0(cfg, &automaton.kernels[state]);
    let mut items = Vec::new();
    for action in set {
        match action {
            LrAction::Shift(_) => {
                for &item in &closure {
                    if next_symbol(cfg, item) == Some(Symbol::T(term)) {
                        items.push(cfg.render_production(item.prod, Some(item.dot as usize)));
                    }
                }
            }
            LrAction::Reduce(prod) => {
                let len = cfg.prod(*prod).rhs.len();
                items.push(cfg.render_production(*prod, Some(len)));
            }
            LrAction::Accept => items.push("accept".to_string()),
        }
    }
    items.sort();
    items.dedup();
    CompileError::GrammarAmbiguous { state, items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::desugar;
    use crate::grammar::GrammarBuilder;

    fn lower(build: impl FnOnce(&mut GrammarBuilder) -> crate::grammar::NodeId) -> Cfg {
        let mut g = GrammarBuilder::new();
        let start = build(&mut g);
        let grammar = g.build(start);
        desugar::lower(&grammar).unwrap()
    }

    #[test]
    fn single_token_automaton() {
        let cfg = lower(|g| g.token("ab"));
        let table = build(&cfg, ConflictPolicy::Reject).unwrap();
        // States: start, after 'a', after 'b', after the token NT.
        assert!(table.state_count() >= 4);
        // Initial state shifts only on 'a'.
        let expected: Vec<Term> = table.expected_in(0).collect();
        assert_eq!(expected, vec![Term::from(b'a')]);
    }

    #[test]
    fn dangling_alternation_is_ambiguous() {
        // A → 'a' | 'a': reduce/reduce conflict on ⊣.
        let cfg = lower(|g| {
            let a1 = g.token("a");
            let a2 = g.token("a");
            g.choice(&[a1, a2])
        });
        let err = build(&cfg, ConflictPolicy::Reject).unwrap_err();
        match err {
            CompileError::GrammarAmbiguous { items, .. } => {
                assert!(items.len() >= 2, "conflict items: {items:?}");
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        // The same table builds fine when conflicts are kept for GLR.
        let table = build(&cfg, ConflictPolicy::Keep).unwrap();
        assert!(table.state_count() > 0);
    }

    #[test]
    fn left_recursion_is_fine_for_lalr() {
        // E → E '+' 'a' | 'a'
        let cfg = lower(|g| {
            let e = g.indirect();
            let plus = g.ch(b'+');
            let a = g.ch(b'a');
            let rec = g.sequence(&[e, plus, a]);
            let alt = g.choice(&[rec, a]);
            g.bind(e, alt);
            alt
        });
        let table = build(&cfg, ConflictPolicy::Reject).unwrap();
        assert!(table.state_count() > 3);
    }
}
