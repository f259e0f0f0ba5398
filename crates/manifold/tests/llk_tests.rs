//! LL(k) backend: prediction tables, conflict detection at various k, and
//! the driver's tree construction.

use manifold::backend::{BackendId, CompileOptions, Parser};
use manifold::grammar::{Grammar, GrammarBuilder};
use manifold::tree::ParseArena;
use manifold::{CompileError, ParseError};

fn ll(grammar: Grammar, k: usize) -> Result<Parser, CompileError> {
    let mut parser = Parser::new(grammar);
    parser.compile(BackendId::Llk, &CompileOptions { lookahead: k })?;
    Ok(parser)
}

/// digits separated by '+', right-recursive: LL(1).
fn additions() -> Grammar {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let plus = g.ch(b'+');
    let more = g.sequence(&[plus, digit]);
    let tail = g.many(more);
    let expr = g.sequence(&[digit, tail]);
    g.build(expr)
}

#[test]
fn ll1_parses_right_recursive_lists() {
    let parser = ll(additions(), 1).unwrap();
    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"1+2+3").unwrap();
    assert_eq!((tree.start, tree.end), (0, 5));
    let children = tree.children();
    assert_eq!(children.len(), 2);
    // The tail holds two '+digit' groups.
    assert_eq!(children[1].children().len(), 2);
}

#[test]
fn ll1_rejects_mid_input_with_expected_set() {
    let parser = ll(additions(), 1).unwrap();
    let arena = ParseArena::new();
    let err = parser.parse(&arena, b"1+x").unwrap_err();
    match err {
        ParseError::Failed { position, expected } => {
            assert_eq!(position, 2);
            assert!(expected.bytes().contains(b'0'));
            assert!(expected.bytes().contains(b'9'));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn ll1_requires_full_consumption() {
    let parser = ll(additions(), 1).unwrap();
    let arena = ParseArena::new();
    let err = parser.parse(&arena, b"1+2junk").unwrap_err();
    match err {
        ParseError::Failed { position, .. } => assert_eq!(position, 3),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn common_prefix_is_not_ll1_but_is_lalr() {
    // choice(seq(A, B), seq(A, C)): FIRST₁ of both alternatives is
    // FIRST(A), so LL(1) prediction cannot choose.
    let mut g = GrammarBuilder::new();
    let a = g.token("a");
    let b = g.token("b");
    let c = g.token("c");
    let ab = g.sequence(&[a, b]);
    let ac = g.sequence(&[a, c]);
    let both = g.choice(&[ab, ac]);
    let grammar = g.build(both);

    let err = ll(grammar, 1).unwrap_err();
    match err {
        CompileError::GrammarNotLlk { k, .. } => assert_eq!(k, 1),
        other => panic!("unexpected error: {other:?}"),
    }

    // The same grammar is unambiguous and LALR(1)-compilable.
    let mut g = GrammarBuilder::new();
    let a = g.token("a");
    let b = g.token("b");
    let c = g.token("c");
    let ab = g.sequence(&[a, b]);
    let ac = g.sequence(&[a, c]);
    let both = g.choice(&[ab, ac]);
    let mut parser = Parser::new(g.build(both));
    parser
        .compile(BackendId::Lalr, &CompileOptions::default())
        .unwrap();
    let arena = ParseArena::new();
    assert!(parser.parse(&arena, b"ac").is_ok());
}

#[test]
fn longer_lookahead_resolves_the_same_grammar() {
    let build = || {
        let mut g = GrammarBuilder::new();
        let a = g.token("a");
        let b = g.token("b");
        let c = g.token("c");
        let ab = g.sequence(&[a, b]);
        let ac = g.sequence(&[a, c]);
        let both = g.choice(&[ab, ac]);
        g.build(both)
    };

    assert!(ll(build(), 1).is_err());
    let parser = ll(build(), 2).unwrap();
    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"ab").unwrap();
    assert_eq!(tree.children().len(), 2);
    assert!(parser.parse(&arena, b"ac").is_ok());
    assert!(parser.parse(&arena, b"ad").is_err());
}

#[test]
fn left_recursion_is_not_llk() {
    // E → E '+' digit | digit is not LL(k) for any k; the table build
    // reports the conflict rather than looping.
    let mut g = GrammarBuilder::new();
    let e = g.indirect();
    let plus = g.ch(b'+');
    let digit = g.ch_range(b'0'..=b'9');
    let rec = g.sequence(&[e, plus, digit]);
    let alt = g.choice(&[rec, digit]);
    g.bind(e, alt);
    let err = ll(g.build(alt), 1).unwrap_err();
    assert!(matches!(err, CompileError::GrammarNotLlk { .. }));
}

#[test]
fn end_grammar_under_ll() {
    let mut g = GrammarBuilder::new();
    let end = g.end();
    let parser = ll(g.build(end), 1).unwrap();
    let arena = ParseArena::new();
    assert!(parser.parse(&arena, b"").is_ok());
    assert!(parser.parse(&arena, b"x").is_err());
}

#[test]
fn optional_prediction_uses_follow() {
    // item := '-'? digit — predicting the empty alternative needs FOLLOW.
    let mut g = GrammarBuilder::new();
    let minus = g.ch(b'-');
    let sign = g.optional(minus);
    let digit = g.ch_range(b'0'..=b'9');
    let item = g.sequence(&[sign, digit]);
    let parser = ll(g.build(item), 1).unwrap();
    let arena = ParseArena::new();
    assert!(parser.parse(&arena, b"-5").is_ok());
    assert!(parser.parse(&arena, b"5").is_ok());
    assert!(parser.parse(&arena, b"-").is_err());
}

#[test]
fn llk_agrees_with_packrat_on_ll1_grammars() {
    let llp = ll(additions(), 1).unwrap();
    let mut packrat = Parser::new(additions());
    packrat
        .compile(BackendId::Packrat, &CompileOptions::default())
        .unwrap();

    let arena = ParseArena::new();
    for input in [&b"1"[..], b"1+2", b"9+8+7+6"] {
        let a = llp.parse(&arena, input).unwrap();
        let b = packrat.parse(&arena, input).unwrap();
        assert!(
            a.structural_eq(b),
            "trees disagree on {:?}: {a:?} vs {b:?}",
            String::from_utf8_lossy(input)
        );
    }
}
