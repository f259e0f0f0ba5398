//! Property tests over randomly generated inputs.

use proptest::prelude::*;

use manifold::backend::{BackendId, CompileOptions, Parser};
use manifold::grammar::{Grammar, GrammarBuilder};
use manifold::tree::ParseArena;
use manifold::ParseError;

/// `num (',' num)*` — unanchored.
fn csv() -> Grammar {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let num = g.many1(digit);
    let comma = g.ch(b',');
    let list = g.sep_by1(num, comma);
    g.build(list)
}

/// `num (',' num)* ⊣` — anchored, so CFG and PEG backends agree on
/// acceptance.
fn csv_anchored() -> Grammar {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let num = g.many1(digit);
    let comma = g.ch(b',');
    let list = g.sep_by1(num, comma);
    let end = g.end();
    let whole = g.sequence(&[list, end]);
    g.build(whole)
}

fn with_backend(grammar: Grammar, id: BackendId) -> Parser {
    let mut parser = Parser::new(grammar);
    parser
        .compile(id, &CompileOptions::default())
        .expect("grammar is in the backend's class");
    parser
}

proptest! {
    /// Determinism: packrat and LALR build structurally identical trees
    /// for every accepted input.
    #[test]
    fn packrat_and_lalr_agree(input in "[0-9,]{0,12}") {
        let packrat = with_backend(csv_anchored(), BackendId::Packrat);
        let lalr = with_backend(csv_anchored(), BackendId::Lalr);
        let arena = ParseArena::new();
        let bytes = input.as_bytes();

        let a = packrat.parse(&arena, bytes);
        let b = lalr.parse(&arena, bytes);
        prop_assert_eq!(a.is_ok(), b.is_ok(), "acceptance disagrees on {:?}", input);
        if let (Ok(x), Ok(y)) = (a, b) {
            prop_assert!(x.structural_eq(y), "trees disagree on {:?}", input);
        }
    }

    /// Monotone failure: when packrat fails at offset k, no longer prefix
    /// of the same input succeeds either.
    #[test]
    fn packrat_failure_is_monotone(input in "[0-9,x]{0,10}") {
        let parser = with_backend(csv(), BackendId::Packrat);
        let arena = ParseArena::new();
        let bytes = input.as_bytes();

        if let Err(ParseError::Failed { position, .. }) = parser.parse(&arena, bytes) {
            for len in position + 1..=bytes.len() {
                prop_assert!(
                    parser.parse(&arena, &bytes[..len]).is_err(),
                    "prefix of length {} succeeded after failure at {}",
                    len,
                    position
                );
            }
        }
    }

    /// The `end` grammar accepts exactly the empty buffer, under every
    /// backend.
    #[test]
    fn end_accepts_only_empty_input(input in proptest::collection::vec(any::<u8>(), 0..16)) {
        for id in BackendId::all() {
            let mut g = GrammarBuilder::new();
            let end = g.end();
            let parser = with_backend(g.build(end), id);
            let arena = ParseArena::new();
            let result = parser.parse(&arena, &input);
            prop_assert_eq!(
                result.is_ok(),
                input.is_empty(),
                "backend {:?} disagrees on {:?}",
                id,
                input
            );
        }
    }

    /// A successful packrat parse never claims more bytes than the input
    /// holds, and its metrics agree with the root's range.
    #[test]
    fn consumed_bytes_are_bounded(input in "[0-9,]{0,12}") {
        let parser = with_backend(csv(), BackendId::Packrat);
        let arena = ParseArena::new();
        let bytes = input.as_bytes();
        if let Ok(parse) = parser.parse_detailed(&arena, bytes) {
            prop_assert!(parse.root.end <= bytes.len());
            prop_assert_eq!(parse.metrics.bytes_consumed, parse.root.end);
            prop_assert_eq!(parse.root.start, 0);
        }
    }

    /// Every tree node's byte range nests inside its parent's.
    #[test]
    fn ranges_nest(input in "[0-9,]{0,12}") {
        fn check(node: &manifold::ParseNode<'_>) {
            for child in node.children() {
                assert!(node.start <= child.start && child.end <= node.end);
                check(child);
            }
        }
        let parser = with_backend(csv(), BackendId::Packrat);
        let arena = ParseArena::new();
        if let Ok(tree) = parser.parse(&arena, input.as_bytes()) {
            check(tree);
        }
    }
}
