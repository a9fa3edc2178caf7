//! GBNF grammars for constrained sampling.
//!
//! A [`Grammar`] is compiled once from text and shared; each generation
//! tracks its own position with a [`GrammarState`], which can probe whether a
//! token piece fits next and commit accepted pieces.

pub mod element;
pub mod error;
pub mod grammar;
pub mod matcher;
pub mod parser;
pub mod state;
pub mod utf8;

pub use element::{ElementPos, GrammarElement, Rule, Stack};
pub use error::{GrammarError, Result};
pub use grammar::Grammar;
pub use state::GrammarState;
pub use utf8::PartialUtf8;
