//! Packrat backend: PEG semantics, left recursion, actions, failure
//! reporting, and the arena memory discipline.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use manifold::arena::{AllocError, Allocator, SystemAlloc};
use manifold::backend::{BackendId, CompileOptions, Parser};
use manifold::grammar::{Grammar, GrammarBuilder};
use manifold::tree::{ActionContext, ParseArena, ParseNode, ParseValue, Rejected};
use manifold::ParseError;

fn packrat(grammar: Grammar) -> Parser {
    let mut parser = Parser::new(grammar);
    parser
        .compile(BackendId::Packrat, &CompileOptions::default())
        .expect("packrat compile is validation only");
    parser
}

#[test]
fn literal_token_consumes_prefix() {
    let mut g = GrammarBuilder::new();
    let abc = g.token("abc");
    let parser = packrat(g.build(abc));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"abcde").unwrap();
    assert_eq!(tree.bytes(), Some(&b"abc"[..]));
    assert_eq!((tree.start, tree.end), (0, 3));

    let detailed = parser.parse_detailed(&arena, b"abcde").unwrap();
    assert_eq!(detailed.metrics.bytes_consumed, 3);
}

#[test]
fn ordered_choice_commits_to_first_match() {
    let mut g = GrammarBuilder::new();
    let short = g.token("if");
    let long = g.token("ifx");
    let choice = g.choice(&[short, long]);
    let parser = packrat(g.build(choice));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"ifx").unwrap();
    // PEG ordered choice: "if" wins, "x" stays unconsumed.
    assert_eq!(tree.bytes(), Some(&b"if"[..]));
    assert_eq!(tree.end, 2);
}

#[test]
fn greedy_repetition_stops_at_first_mismatch() {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let digits = g.many(digit);
    let parser = packrat(g.build(digits));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"42a").unwrap();
    let children = tree.children();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].bytes(), Some(&b"4"[..]));
    assert_eq!(children[1].bytes(), Some(&b"2"[..]));
    assert_eq!(tree.end, 2);
}

#[test]
fn end_matches_only_empty_remainder() {
    let mut g = GrammarBuilder::new();
    let end = g.end();
    let parser = packrat(g.build(end));

    let arena = ParseArena::new();
    assert!(parser.parse(&arena, b"").is_ok());
    let err = parser.parse(&arena, b"x").unwrap_err();
    match err {
        ParseError::Failed { position, expected } => {
            assert_eq!(position, 0);
            assert!(expected.eof());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn negative_lookahead_is_zero_width() {
    // keyword := "if" !letter
    let mut g = GrammarBuilder::new();
    let kw = g.token("if");
    let letter = g.ch_range(b'a'..=b'z');
    let not_letter = g.not_followed_by(letter);
    let ident = g.sequence(&[kw, not_letter]);
    let parser = packrat(g.build(ident));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"if(").unwrap();
    assert_eq!(tree.end, 2);
    assert!(parser.parse(&arena, b"ifx").is_err());
}

#[test]
fn positive_lookahead_restores_cursor() {
    let mut g = GrammarBuilder::new();
    let a = g.ch(b'a');
    let ahead = g.followed_by(a);
    let pair = g.sequence(&[ahead, a]);
    let parser = packrat(g.build(pair));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"a").unwrap();
    assert_eq!(tree.end, 1);
}

#[test]
fn sep_by_yields_items_without_separators() {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let num = g.many1(digit);
    let comma = g.ch(b',');
    let list = g.sep_by1(num, comma);
    let parser = packrat(g.build(list));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"1,22,333").unwrap();
    let items = tree.children();
    assert_eq!(items.len(), 3);
    assert_eq!((items[2].start, items[2].end), (5, 8));
    // A trailing separator is left unconsumed.
    let tree = parser.parse(&arena, b"1,2,").unwrap();
    assert_eq!(tree.end, 3);
}

#[test]
fn ignore_drops_results_from_sequences() {
    let mut g = GrammarBuilder::new();
    let a = g.ch(b'a');
    let sep = g.ch(b'-');
    let hidden = g.ignore(sep);
    let seq = g.sequence(&[a, hidden, a]);
    let parser = packrat(g.build(seq));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"a-a").unwrap();
    // The ignored separator does not appear among the children.
    assert_eq!(tree.children().len(), 2);
    assert_eq!(tree.end, 3);
}

fn to_uint<'a>(
    _ctx: &ActionContext<'a>,
    node: &'a ParseNode<'a>,
) -> Result<ParseValue<'a>, Rejected> {
    let bytes = node.bytes().ok_or(Rejected)?;
    Ok(ParseValue::Uint(u64::from(bytes[0] - b'0')))
}

#[test]
fn actions_replace_child_values() {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let value = g.action(digit, to_uint);
    let parser = packrat(g.build(value));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"7").unwrap();
    assert_eq!(tree.uint(), Some(7));
    assert_eq!((tree.start, tree.end), (0, 1));
}

#[test]
fn action_rejection_fails_the_match() {
    fn reject_all<'a>(
        _ctx: &ActionContext<'a>,
        _node: &'a ParseNode<'a>,
    ) -> Result<ParseValue<'a>, Rejected> {
        Err(Rejected)
    }

    let mut g = GrammarBuilder::new();
    let a = g.ch(b'a');
    let rejected = g.action(a, reject_all);
    let b = g.ch(b'a');
    let fallback = g.choice(&[rejected, b]);
    let parser = packrat(g.build(fallback));

    let arena = ParseArena::new();
    // The rejecting alternative fails; ordered choice moves on.
    let tree = parser.parse(&arena, b"a").unwrap();
    assert_eq!(tree.bytes(), Some(&b"a"[..]));
}

#[test]
fn attr_predicate_gates_the_result() {
    fn is_even<'a>(node: &'a ParseNode<'a>) -> bool {
        node.bytes().is_some_and(|b| (b[0] - b'0') % 2 == 0)
    }

    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let even = g.attr(digit, is_even);
    let parser = packrat(g.build(even));

    let arena = ParseArena::new();
    assert!(parser.parse(&arena, b"4").is_ok());
    assert!(parser.parse(&arena, b"5").is_err());
}

#[test]
fn left_recursion_grows_to_a_fixed_point() {
    // E → E '+' digit | digit
    let mut g = GrammarBuilder::new();
    let e = g.indirect();
    let plus = g.ch(b'+');
    let digit = g.ch_range(b'0'..=b'9');
    let rec = g.sequence(&[e, plus, digit]);
    let alt = g.choice(&[rec, digit]);
    g.bind(e, alt);
    let parser = packrat(g.build(alt));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"1+2+3").unwrap();
    assert_eq!(tree.end, 5);
    // Left associativity: ((1+2)+3).
    let children = tree.children();
    assert_eq!(children.len(), 3);
    assert_eq!((children[0].start, children[0].end), (0, 3));
    assert_eq!(children[2].bytes(), Some(&b"3"[..]));
}

#[test]
fn failure_reports_furthest_position_and_expected_set() {
    let mut g = GrammarBuilder::new();
    let a = g.token("ab");
    let c = g.ch(b'c');
    let seq = g.sequence(&[a, c]);
    let parser = packrat(g.build(seq));

    let arena = ParseArena::new();
    let err = parser.parse(&arena, b"abx").unwrap_err();
    match err {
        ParseError::Failed { position, expected } => {
            assert_eq!(position, 2);
            assert!(expected.bytes().contains(b'c'));
            assert!(!expected.bytes().contains(b'a'));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn uncompiled_parser_defaults_to_packrat() {
    let mut g = GrammarBuilder::new();
    let abc = g.token("abc");
    let parser = Parser::new(g.build(abc));
    assert_eq!(parser.backend(), BackendId::Packrat);

    let arena = ParseArena::new();
    assert!(parser.parse(&arena, b"abc").is_ok());
}

/// Allocator with a byte quota, for resource-failure propagation.
struct Quota {
    inner: SystemAlloc,
    remaining: AtomicUsize,
}

impl Allocator for Quota {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if self
            .remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| {
                r.checked_sub(layout.size())
            })
            .is_err()
        {
            return Err(AllocError);
        }
        self.inner.allocate(layout)
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        self.inner.reallocate(ptr, old_layout, new_size)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        self.inner.release(ptr, layout);
    }
}

#[test]
fn allocator_exhaustion_becomes_a_parse_error() {
    let mut g = GrammarBuilder::new();
    let any = g.anything();
    let all = g.many(any);
    let parser = packrat(g.build(all));

    // Too small for even one arena block.
    let arena = ParseArena::with_allocator(Arc::new(Quota {
        inner: SystemAlloc,
        remaining: AtomicUsize::new(16),
    }));
    let input = vec![b'x'; 4096];
    let err = parser.parse(&arena, &input).unwrap_err();
    assert!(matches!(err, ParseError::Allocation(_)));
}

#[test]
fn arena_stats_reflect_parse_allocations() {
    let mut g = GrammarBuilder::new();
    let any = g.anything();
    let all = g.many(any);
    let parser = packrat(g.build(all));

    let arena = ParseArena::new();
    assert_eq!(arena.stats().used, 0);
    parser.parse(&arena, b"hello world").unwrap();
    let stats = arena.stats();
    assert!(stats.used > 0);
    assert!(stats.blocks >= 1);
}
