//! NULLABLE, FIRST, and FOLLOW over the normalized CFG, plus the k-bounded
//! string variants used by the LL(k) table construction.
//!
//! All analyses are fixed-point iterations: sets only grow, the universes
//! are finite, and iteration stops on the first pass with no growth.

use hashbrown::HashSet;
use smallvec::SmallVec;

use crate::cfg::{Cfg, NtId, Symbol, Term, TermSet, TERM_EOF};

/// A lookahead string of at most `k` terminals.
pub(crate) type LookStr = SmallVec<[Term; 4]>;

/// Set of lookahead strings.
pub(crate) type LookSet = HashSet<LookStr, ahash::RandomState>;

/// Populate `nullable`, `first`, and `follow` on a freshly-lowered CFG.
pub(crate) fn compute(cfg: &mut Cfg) {
    cfg.nullable = compute_nullable(cfg);
    cfg.first = compute_first(cfg, &cfg.nullable);
    cfg.follow = compute_follow(cfg, &cfg.nullable, &cfg.first);
}

fn compute_nullable(cfg: &Cfg) -> Vec<bool> {
    let mut nullable = vec![false; cfg.nts.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for prod in &cfg.prods {
            if nullable[prod.lhs.index()] {
                continue;
            }
            let all_nullable = prod.rhs.iter().all(|sym| match sym {
                Symbol::T(_) => false,
                Symbol::Nt(nt) => nullable[nt.index()],
            });
            if all_nullable {
                nullable[prod.lhs.index()] = true;
                changed = true;
            }
        }
    }
    nullable
}

fn compute_first(cfg: &Cfg, nullable: &[bool]) -> Vec<TermSet> {
    let mut first = vec![TermSet::new(); cfg.nts.len()];
    for (nt, set) in first.iter_mut().enumerate() {
        set.epsilon = nullable[nt];
    }
    let mut changed = true;
    while changed {
        changed = false;
        for prod in &cfg.prods {
            let lhs = prod.lhs.index();
            for sym in &prod.rhs {
                match sym {
                    Symbol::T(t) => {
                        if !first[lhs].contains_term(*t) {
                            first[lhs].insert_term(*t);
                            changed = true;
                        }
                        break;
                    }
                    Symbol::Nt(nt) => {
                        let src = first[nt.index()];
                        changed |= first[lhs].union_terms(&src);
                        if !nullable[nt.index()] {
                            break;
                        }
                    }
                }
            }
        }
    }
    first
}

fn compute_follow(cfg: &Cfg, nullable: &[bool], first: &[TermSet]) -> Vec<TermSet> {
    let mut follow = vec![TermSet::new(); cfg.nts.len()];
    follow[cfg.start.index()].insert_term(TERM_EOF);

    let mut changed = true;
    while changed {
        changed = false;
        for prod in &cfg.prods {
            for (i, sym) in prod.rhs.iter().enumerate() {
                let Symbol::Nt(b) = sym else { continue };
                let suffix = &prod.rhs[i + 1..];
                let suffix_first = first_of_symbols_inner(suffix, nullable, first);
                let (target_grew, suffix_nullable) = {
                    let dst = &mut follow[b.index()];
                    (dst.union_terms(&suffix_first), suffix_first.epsilon)
                };
                changed |= target_grew;
                if suffix_nullable {
                    let src = follow[prod.lhs.index()];
                    changed |= follow[b.index()].union_terms(&src);
                }
            }
        }
    }
    follow
}

/// FIRST of a symbol string; the ε flag is set when every symbol is
/// nullable.
pub(crate) fn first_of_symbols(cfg: &Cfg, symbols: &[Symbol]) -> TermSet {
    first_of_symbols_inner(symbols, &cfg.nullable, &cfg.first)
}

fn first_of_symbols_inner(symbols: &[Symbol], nullable: &[bool], first: &[TermSet]) -> TermSet {
    let mut out = TermSet::new();
    for sym in symbols {
        match sym {
            Symbol::T(t) => {
                out.insert_term(*t);
                return out;
            }
            Symbol::Nt(nt) => {
                out.union_terms(&first[nt.index()]);
                if !nullable[nt.index()] {
                    return out;
                }
            }
        }
    }
    out.epsilon = true;
    out
}

/// Truncated concatenation: every string of `a` extended by every string of
/// `b`, cut to `k` terminals. A string already ending in the end marker is
/// not extended.
pub(crate) fn concat_k(a: &LookSet, b: &LookSet, k: usize) -> LookSet {
    let mut out = LookSet::default();
    for left in a {
        if left.len() >= k || left.last() == Some(&TERM_EOF) {
            let mut s = left.clone();
            s.truncate(k);
            out.insert(s);
            continue;
        }
        for right in b {
            let mut s = left.clone();
            s.extend(right.iter().copied());
            s.truncate(k);
            out.insert(s);
        }
    }
    out
}

fn singleton(s: LookStr) -> LookSet {
    let mut set = LookSet::default();
    set.insert(s);
    set
}

/// FIRST_k for every non-terminal: the set of k-prefixes of terminal
/// strings derivable from it. Strings shorter than `k` arise only from
/// exhausted derivations.
pub(crate) fn first_k_sets(cfg: &Cfg, k: usize) -> Vec<LookSet> {
    let mut sets: Vec<LookSet> = vec![LookSet::default(); cfg.nts.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for prod in &cfg.prods {
            let mut acc = singleton(LookStr::new());
            for sym in &prod.rhs {
                let sym_set = match sym {
                    Symbol::T(t) => singleton(SmallVec::from_slice(&[*t])),
                    Symbol::Nt(nt) => sets[nt.index()].clone(),
                };
                acc = concat_k(&acc, &sym_set, k);
                if acc.is_empty() {
                    break;
                }
            }
            let dst = &mut sets[prod.lhs.index()];
            for s in acc {
                changed |= dst.insert(s);
            }
        }
    }
    sets
}

/// FOLLOW_k for every non-terminal.
pub(crate) fn follow_k_sets(cfg: &Cfg, k: usize, first_k: &[LookSet]) -> Vec<LookSet> {
    let mut sets: Vec<LookSet> = vec![LookSet::default(); cfg.nts.len()];
    sets[cfg.start.index()].insert(SmallVec::from_slice(&[TERM_EOF]));

    let mut changed = true;
    while changed {
        changed = false;
        for prod in &cfg.prods {
            for (i, sym) in prod.rhs.iter().enumerate() {
                let Symbol::Nt(b) = sym else { continue };
                let suffix_first = first_k_of_string(&prod.rhs[i + 1..], k, first_k);
                let lhs_follow = sets[prod.lhs.index()].clone();
                let combined = concat_k(&suffix_first, &lhs_follow, k);
                let dst = &mut sets[b.index()];
                for s in combined {
                    changed |= dst.insert(s);
                }
            }
        }
    }
    sets
}

/// FIRST_k of a symbol string.
pub(crate) fn first_k_of_string(symbols: &[Symbol], k: usize, first_k: &[LookSet]) -> LookSet {
    let mut acc = singleton(LookStr::new());
    for sym in symbols {
        let sym_set = match sym {
            Symbol::T(t) => singleton(SmallVec::from_slice(&[*t])),
            Symbol::Nt(nt) => first_k[nt.index()].clone(),
        };
        acc = concat_k(&acc, &sym_set, k);
        if acc.is_empty() {
            break;
        }
    }
    acc
}

/// Lookahead key the LL driver derives from the remaining input: up to `k`
/// bytes, with a single trailing end marker if input runs out first.
pub(crate) fn input_lookahead(input: &[u8], pos: usize, k: usize) -> LookStr {
    let mut s = LookStr::new();
    let mut i = pos;
    while s.len() < k {
        match input.get(i) {
            Some(&b) => s.push(Term::from(b)),
            None => {
                s.push(TERM_EOF);
                break;
            }
        }
        i += 1;
    }
    s
}

/// Re-run FIRST/FOLLOW on a finished CFG and report whether anything grew.
/// Exists for the fixed-point regression test.
#[must_use]
pub(crate) fn analyses_are_stable(cfg: &Cfg) -> bool {
    let nullable = compute_nullable(cfg);
    let first = compute_first(cfg, &nullable);
    let follow = compute_follow(cfg, &nullable, &first);
    nullable == cfg.nullable && first == cfg.first && follow == cfg.follow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::desugar;
    use crate::grammar::GrammarBuilder;

    fn arith_like() -> Cfg {
        // list → item (',' item)*  with item = 'a'+
        let mut g = GrammarBuilder::new();
        let a = g.ch(b'a');
        let item = g.many1(a);
        let comma = g.ch(b',');
        let list = g.sep_by1(item, comma);
        let grammar = g.build(list);
        desugar::lower(&grammar).unwrap()
    }

    #[test]
    fn nullable_of_repetitions() {
        let mut g = GrammarBuilder::new();
        let a = g.ch(b'a');
        let many = g.many(a);
        let grammar = g.build(many);
        let cfg = desugar::lower(&grammar).unwrap();
        assert!(cfg.is_nullable(cfg.start()));
        // The charset non-terminal (lowered second) is not nullable.
        assert!(!cfg.is_nullable(NtId(1)));
    }

    #[test]
    fn first_sets_flow_through_chains() {
        let cfg = arith_like();
        let start_first = cfg.first(cfg.start());
        assert!(start_first.bytes().contains(b'a'));
        assert!(!start_first.bytes().contains(b','));
    }

    #[test]
    fn follow_of_item_includes_separator_and_eof() {
        let cfg = arith_like();
        // Find the many1 non-terminal via its FIRST set and check FOLLOW.
        let mut saw_item = false;
        for idx in 0..cfg.nonterminal_count() {
            let nt = NtId(u32::try_from(idx).unwrap());
            let first = cfg.first(nt);
            let follow = cfg.follow(nt);
            if first.bytes().contains(b'a') && follow.bytes().contains(b',') {
                assert!(follow.has_eof());
                saw_item = true;
            }
        }
        assert!(saw_item);
    }

    #[test]
    fn fixed_point_is_stable() {
        let cfg = arith_like();
        assert!(analyses_are_stable(&cfg));
    }

    #[test]
    fn concat_k_truncates_and_respects_eof() {
        let a: LookSet = singleton(SmallVec::from_slice(&[1, 2]));
        let b: LookSet = singleton(SmallVec::from_slice(&[3, 4]));
        let out = concat_k(&a, &b, 3);
        assert_eq!(out.len(), 1);
        let want: LookStr = SmallVec::from_slice(&[1, 2, 3]);
        assert!(out.contains(&want));

        let ended: LookSet = singleton(SmallVec::from_slice(&[5, TERM_EOF]));
        let out = concat_k(&ended, &b, 4);
        let want: LookStr = SmallVec::from_slice(&[5, TERM_EOF]);
        assert!(out.contains(&want));
    }

    #[test]
    fn first_k_strings_are_bounded() {
        let cfg = arith_like();
        for set in first_k_sets(&cfg, 2) {
            for s in &set {
                assert!(s.len() <= 2);
            }
        }
    }

    #[test]
    fn input_lookahead_pads_with_eof() {
        assert_eq!(
            input_lookahead(b"ab", 0, 3).as_slice(),
            &[Term::from(b'a'), Term::from(b'b'), TERM_EOF][..]
        );
        assert_eq!(input_lookahead(b"ab", 2, 3).as_slice(), &[TERM_EOF][..]);
        assert_eq!(
            input_lookahead(b"abc", 0, 2).as_slice(),
            &[Term::from(b'a'), Term::from(b'b')][..]
        );
    }
}
