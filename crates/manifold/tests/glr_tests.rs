//! GLR backend: forests, stack merging, prefix parses, and uniqueness.

use manifold::backend::{BackendId, CompileOptions, Parser};
use manifold::grammar::{Grammar, GrammarBuilder};
use manifold::tree::{ParseArena, ParseNode, ParseValue};
use manifold::ParseError;

fn glr(grammar: Grammar) -> Parser {
    let mut parser = Parser::new(grammar);
    parser
        .compile(BackendId::Glr, &CompileOptions::default())
        .expect("conflicts are kept, not rejected");
    parser
}

#[test]
fn prefix_alternatives_form_a_forest() {
    let mut g = GrammarBuilder::new();
    let short = g.token("if");
    let long = g.token("ifx");
    let both = g.choice(&[short, long]);
    let parser = glr(g.build(both));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"ifx").unwrap();
    let alts = tree.alternatives();
    assert_eq!(alts.len(), 2, "forest: {tree:?}");
    assert_eq!(alts[0].bytes(), Some(&b"if"[..]));
    assert_eq!(alts[1].bytes(), Some(&b"ifx"[..]));

    // Each alternative covers a prefix of the input.
    for alt in alts {
        assert!(alt.end <= 3);
        assert_eq!(alt.start, 0);
    }
}

/// `[0-9]+ ⊣` — the end assertion rules out completed prefixes, so an
/// unambiguous grammar yields exactly one tree.
fn anchored_digits() -> Grammar {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let digits = g.many1(digit);
    let end = g.end();
    let whole = g.sequence(&[digits, end]);
    g.build(whole)
}

#[test]
fn unambiguous_anchored_grammar_yields_a_single_tree() {
    let parser = glr(anchored_digits());
    let arena = ParseArena::new();
    let tree = parser.parse_unique(&arena, b"123").unwrap();
    assert_eq!(tree.children()[0].children().len(), 3);

    // The LALR backend agrees on the same grammar.
    let mut lalr = Parser::new(anchored_digits());
    lalr.compile(BackendId::Lalr, &CompileOptions::default())
        .unwrap();
    let other = lalr.parse(&arena, b"123").unwrap();
    assert!(tree.structural_eq(other));
}

#[test]
fn unanchored_repetition_collects_prefix_parses() {
    let mut g = GrammarBuilder::new();
    let digit = g.ch_range(b'0'..=b'9');
    let digits = g.many1(digit);
    let parser = glr(g.build(digits));

    let arena = ParseArena::new();
    // Every non-empty prefix of "123" is a complete parse.
    let tree = parser.parse(&arena, b"123").unwrap();
    let alts = tree.alternatives();
    assert_eq!(alts.len(), 3, "forest: {tree:?}");
    let ends: Vec<usize> = alts.iter().map(|n| n.end).collect();
    assert_eq!(ends, vec![1, 2, 3]);
}

#[test]
fn parse_unique_rejects_surviving_ambiguity() {
    let mut g = GrammarBuilder::new();
    let short = g.token("if");
    let long = g.token("ifx");
    let both = g.choice(&[short, long]);
    let parser = glr(g.build(both));

    let arena = ParseArena::new();
    let err = parser.parse_unique(&arena, b"ifx").unwrap_err();
    assert!(matches!(err, ParseError::AmbiguousResult));
    // Unambiguous input on the same grammar passes.
    assert!(parser.parse_unique(&arena, b"if").is_ok());
}

#[test]
fn equal_length_derivations_merge_into_an_ambiguity_node() {
    // Two distinct derivations of the same string.
    let mut g = GrammarBuilder::new();
    let a1 = g.token("aa");
    let single = g.ch(b'a');
    let a2 = g.sequence(&[single, single]);
    let both = g.choice(&[a1, a2]);
    let parser = glr(g.build(both));

    let arena = ParseArena::new();
    let tree = parser.parse(&arena, b"aa").unwrap();
    let alts = tree.alternatives();
    assert_eq!(alts.len(), 2, "forest: {tree:?}");
    let has_token = alts
        .iter()
        .any(|n| matches!(n.value, ParseValue::Token(_)));
    let has_seq = alts.iter().any(|n| matches!(n.value, ParseValue::Seq(_)));
    assert!(has_token && has_seq);
}

/// Serialize a tree back to the bytes it claims to cover.
fn serialize(node: &ParseNode<'_>, input: &[u8]) -> Vec<u8> {
    input[node.start..node.end].to_vec()
}

#[test]
fn every_forest_branch_serializes_to_an_input_prefix() {
    let mut g = GrammarBuilder::new();
    let short = g.token("ab");
    let long = g.token("abab");
    let both = g.choice(&[short, long]);
    let many = g.many1(both);
    let parser = glr(g.build(many));

    let arena = ParseArena::new();
    let input = b"ababab";
    let tree = parser.parse(&arena, input).unwrap();

    fn walk(node: &ParseNode<'_>, input: &[u8]) {
        assert!(node.end <= input.len());
        assert!(node.start <= node.end);
        let bytes = serialize(node, input);
        assert_eq!(&input[node.start..node.end], bytes.as_slice());
        for child in node.children() {
            walk(child, input);
        }
        for alt in node.alternatives() {
            walk(alt, input);
        }
    }
    walk(tree, input);
}

#[test]
fn glr_runs_left_recursive_grammars() {
    // E → E '+' digit | digit, anchored to the end of input.
    let mut g = GrammarBuilder::new();
    let e = g.indirect();
    let plus = g.ch(b'+');
    let digit = g.ch_range(b'0'..=b'9');
    let rec = g.sequence(&[e, plus, digit]);
    let alt = g.choice(&[rec, digit]);
    g.bind(e, alt);
    let end = g.end();
    let whole = g.sequence(&[alt, end]);
    let parser = glr(g.build(whole));

    let arena = ParseArena::new();
    let tree = parser.parse_unique(&arena, b"1+2+3").unwrap();
    assert_eq!((tree.start, tree.end), (0, 5));
    // Left associativity: ((1+2)+3).
    let expr = tree.children()[0];
    assert_eq!(expr.children().len(), 3);
    let head = expr.children()[0];
    assert_eq!((head.start, head.end), (0, 3));
}

#[test]
fn dead_frontier_reports_position_and_expected() {
    let mut g = GrammarBuilder::new();
    let ab = g.token("ab");
    let parser = glr(g.build(ab));

    let arena = ParseArena::new();
    let err = parser.parse(&arena, b"ax").unwrap_err();
    match err {
        ParseError::Failed { position, expected } => {
            assert_eq!(position, 1);
            assert!(expected.bytes().contains(b'b'));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn end_grammar_under_glr() {
    let mut g = GrammarBuilder::new();
    let end = g.end();
    let parser = glr(g.build(end));
    let arena = ParseArena::new();
    assert!(parser.parse(&arena, b"").is_ok());
    assert!(parser.parse(&arena, b"x").is_err());
}
