use std::borrow::Cow;
use std::sync::Arc;

use crate::element::Stack;
use crate::error::{GrammarError, Result};
use crate::grammar::Grammar;
use crate::matcher;
use crate::utf8::{self, PartialUtf8};

/// Parser position of one evaluation over a shared [`Grammar`].
///
/// Cloning yields an independent state over the same definition, which is
/// how speculative branches are evaluated.
#[derive(Debug, Clone)]
pub struct GrammarState {
    grammar: Arc<Grammar>,
    stacks: Vec<Stack>,
    partial: PartialUtf8,
}

impl GrammarState {
    /// Start matching at the grammar's root rule.
    pub fn new(grammar: Arc<Grammar>) -> Self {
        let stacks = grammar.initial_stacks();
        Self {
            grammar,
            stacks,
            partial: PartialUtf8::default(),
        }
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    /// Live parse stacks. Empty means nothing more can be accepted.
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    /// Bytes of a code point split across token pieces.
    pub fn partial_utf8(&self) -> PartialUtf8 {
        self.partial
    }

    /// At least one stack is empty: the input so far is a complete sentence.
    pub fn is_complete(&self) -> bool {
        self.stacks.iter().any(|stack| stack.is_empty())
    }

    /// Whether `piece` can be consumed next. Does not change the state.
    pub fn can_accept(&self, piece: &[u8]) -> bool {
        if piece.is_empty() || piece[0] == 0 {
            return false;
        }
        self.advance(piece).is_some()
    }

    /// Consume `piece`, committing the new parser position.
    ///
    /// On rejection the state is left untouched.
    pub fn accept(&mut self, piece: &[u8]) -> Result<()> {
        let (stacks, partial) = self
            .advance(piece)
            .ok_or_else(|| GrammarError::Rejected(String::from_utf8_lossy(piece).into_owned()))?;
        self.stacks = stacks;
        self.partial = partial;
        Ok(())
    }

    /// Restart from the root rule.
    pub fn reset(&mut self) {
        self.stacks = self.grammar.initial_stacks();
        self.partial = PartialUtf8::default();
    }

    fn advance(&self, piece: &[u8]) -> Option<(Vec<Stack>, PartialUtf8)> {
        let (code_points, partial) = utf8::decode(piece, self.partial)?;
        let rules = self.grammar.rules();

        let mut stacks: Cow<'_, [Stack]> = Cow::Borrowed(&self.stacks);
        for cp in code_points {
            let next = matcher::accept(rules, &stacks, cp);
            if next.is_empty() {
                return None;
            }
            stacks = Cow::Owned(next);
        }

        if partial.is_pending() {
            let reachable = stacks.iter().any(|stack| {
                stack
                    .last()
                    .is_some_and(|pos| matcher::match_partial_char(&rules[pos.rule], pos.index, partial))
            });
            if !reachable {
                return None;
            }
        }

        Some((stacks.into_owned(), partial))
    }
}
