use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use la_grammar::GrammarState;

use crate::candidates::Candidates;
use crate::error::Result;
use crate::vocab::Vocabulary;

/// A grammar evaluation state shared between a sampler and its host handle.
pub type SharedGrammarState = Arc<Mutex<GrammarState>>;

/// Wrap a state so a sampler and the host can both reach it.
pub fn shared(state: GrammarState) -> SharedGrammarState {
    Arc::new(Mutex::new(state))
}

/// Lock a shared state. A state is only ever replaced wholesale on commit, so
/// a poisoned lock still guards a consistent value.
pub fn lock(state: &SharedGrammarState) -> MutexGuard<'_, GrammarState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set every candidate the grammar cannot take next to negative infinity.
///
/// End-of-generation tokens pass only when the grammar is complete.
/// Candidates that are already excluded are not probed again.
pub fn apply(state: &GrammarState, candidates: &mut Candidates, vocab: &dyn Vocabulary) {
    let complete = state.is_complete();
    for t in candidates.iter_mut() {
        if t.logit == f32::NEG_INFINITY {
            continue;
        }
        let allowed = if vocab.is_eog(t.id) {
            complete
        } else {
            state.can_accept(vocab.token_piece(t.id))
        };
        if !allowed {
            t.logit = f32::NEG_INFINITY;
        }
    }
}

/// Probe a single token without advancing the state.
pub fn can_be_next_token(state: &GrammarState, token: u32, vocab: &dyn Vocabulary) -> bool {
    if vocab.is_eog(token) {
        return state.is_complete();
    }
    state.can_accept(vocab.token_piece(token))
}

/// Advance the state by `token`. End-of-generation tokens leave it untouched.
pub fn accept_token(state: &mut GrammarState, token: u32, vocab: &dyn Vocabulary) -> Result<()> {
    if vocab.is_eog(token) {
        return Ok(());
    }
    state.accept(vocab.token_piece(token))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use la_grammar::Grammar;

    struct Pieces(Vec<&'static str>);

    impl Vocabulary for Pieces {
        fn n_vocab(&self) -> usize {
            self.0.len()
        }
        fn is_eog(&self, token: u32) -> bool {
            token as usize == self.0.len() - 1
        }
        fn token_piece(&self, token: u32) -> &[u8] {
            self.0[token as usize].as_bytes()
        }
    }

    fn state(text: &str) -> GrammarState {
        GrammarState::new(Arc::new(Grammar::parse(text).unwrap()))
    }

    #[test]
    fn test_apply_masks_rejected_pieces() {
        let vocab = Pieces(vec!["a", "b", "ab", "", "</s>"]);
        let s = state(r#"root ::= "ab""#);
        let mut c = Candidates::from_logits(&[0.0; 5]);
        apply(&s, &mut c, &vocab);
        let allowed: Vec<u32> = c.iter().filter(|t| t.logit.is_finite()).map(|t| t.id).collect();
        assert_eq!(allowed, vec![0, 2]);
    }

    #[test]
    fn test_eog_only_when_complete() {
        let vocab = Pieces(vec!["a", "</s>"]);
        let mut s = state(r#"root ::= "a""#);
        assert!(!can_be_next_token(&s, 1, &vocab));
        accept_token(&mut s, 0, &vocab).unwrap();
        assert!(can_be_next_token(&s, 1, &vocab));
        assert!(!can_be_next_token(&s, 0, &vocab));
    }

    #[test]
    fn test_accept_eog_is_skipped() {
        let vocab = Pieces(vec!["a", "</s>"]);
        let mut s = state(r#"root ::= "a""#);
        accept_token(&mut s, 1, &vocab).unwrap();
        assert!(can_be_next_token(&s, 0, &vocab));
    }

    #[test]
    fn test_accept_rejected_token_errors() {
        let vocab = Pieces(vec!["a", "b", "</s>"]);
        let mut s = state(r#"root ::= "a""#);
        assert!(accept_token(&mut s, 1, &vocab).is_err());
    }
}
