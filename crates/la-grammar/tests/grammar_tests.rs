use std::sync::Arc;

use la_grammar::{Grammar, GrammarError, GrammarState};
use proptest::prelude::*;

const JSON_ISH: &str = r#"
# a tiny object grammar
root   ::= "{" ws pair ("," ws pair)* ws "}"
pair   ::= string ws ":" ws value
value  ::= string | number | "true" | "false" | "null"
string ::= "\"" [^"\\]* "\""
number ::= "-"? [0-9]+ ("." [0-9]+)?
ws     ::= [ \t\n]*
"#;

fn json_state() -> GrammarState {
    GrammarState::new(Arc::new(Grammar::parse(JSON_ISH).unwrap()))
}

#[test]
fn test_json_like_grammar_accepts_objects() {
    let grammar = Grammar::parse(JSON_ISH).unwrap();
    assert!(grammar.is_text_compatible(r#"{"a": 1}"#));
    assert!(grammar.is_text_compatible(r#"{"a":-2.5, "b": true,"c":null}"#));
    assert!(!grammar.is_text_compatible(r#"{"a": }"#));
    assert!(!grammar.is_text_compatible(r#"{"a": 1"#));
}

#[test]
fn test_state_follows_token_pieces() {
    let mut state = json_state();
    for piece in ["{", "\"ke", "y\"", ": ", "4", "2", "}"] {
        assert!(state.can_accept(piece.as_bytes()), "piece {piece:?}");
        state.accept(piece.as_bytes()).unwrap();
    }
    assert!(state.is_complete());
    assert!(!state.can_accept(b"}"));
}

#[test]
fn test_state_rejects_out_of_grammar_piece() {
    let mut state = json_state();
    state.accept(b"{").unwrap();
    assert!(!state.can_accept(b"42"));
    assert!(matches!(
        state.accept(b"42"),
        Err(GrammarError::Rejected(piece)) if piece == "42"
    ));
    assert!(state.can_accept(b"\""));
}

#[test]
fn test_clones_share_definition() {
    let grammar = Arc::new(Grammar::parse(JSON_ISH).unwrap());
    let mut first = GrammarState::new(Arc::clone(&grammar));
    first.accept(b"{\"a\":").unwrap();
    let mut second = first.clone();
    second.accept(b"1}").unwrap();
    assert!(second.is_complete());
    assert!(!first.is_complete());
    assert_eq!(Arc::strong_count(&grammar), 3);
}

#[test]
fn test_repetition_bounds() {
    let grammar = Grammar::parse(r#"root ::= [a-z]{2,3} "!""#).unwrap();
    assert!(!grammar.is_text_compatible("a!"));
    assert!(grammar.is_text_compatible("ab!"));
    assert!(grammar.is_text_compatible("abc!"));
    assert!(!grammar.is_text_compatible("abcd!"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_probe_is_idempotent(piece in "[ -~]{1,4}") {
        let mut state = json_state();
        state.accept(b"{").unwrap();
        let before = state.stacks().to_vec();
        let first = state.can_accept(piece.as_bytes());
        let second = state.can_accept(piece.as_bytes());
        prop_assert_eq!(first, second);
        prop_assert_eq!(state.stacks(), &before[..]);
    }

    #[test]
    fn test_probe_agrees_with_accept(piece in "[ -~]{1,4}") {
        let mut state = json_state();
        let probed = state.can_accept(piece.as_bytes());
        prop_assert_eq!(probed, state.accept(piece.as_bytes()).is_ok());
    }
}
