//! The narrow interface to the wrapped inference engine.
//!
//! Model loading, the forward pass and tokenization stay on the engine side;
//! the runtime only needs vocabulary facts, decoding and logits.

use std::fmt;

use la_sampler::Vocabulary;

use crate::batch::Batch;
use crate::error::{AddonError, Result};
use crate::token_attributes::TokenAttributes;

/// A loaded model as seen by the runtime.
pub trait ModelBackend: Send + Sync + fmt::Debug {
    fn vocab_size(&self) -> usize;

    fn is_end_of_generation(&self, token: u32) -> bool;

    fn token_attributes(&self, token: u32) -> TokenAttributes;

    /// Raw text bytes of a token. May be an incomplete UTF-8 sequence.
    fn token_piece(&self, token: u32) -> &[u8];
}

/// An inference context: KV cache plus the outputs of the last decode.
pub trait ContextBackend: Send + fmt::Debug {
    fn decode(&mut self, batch: &Batch) -> DecodeStatus;

    /// Logits for the `index`-th output of the last decode, `vocab_size`
    /// entries long. `None` when the model produces no logits.
    fn logits_ith(&self, index: i32) -> Option<&[f32]>;
}

/// Outcome of a decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Ok,
    NeedsLargerContext,
    Failed(i32),
}

impl DecodeStatus {
    /// Map an engine status code: 0 ok, 1 no KV slot, anything else failure.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DecodeStatus::Ok,
            1 => DecodeStatus::NeedsLargerContext,
            other => DecodeStatus::Failed(other),
        }
    }

    /// `Ok` on success, otherwise the matching `AddonError`.
    pub fn into_result(self) -> Result<()> {
        match self {
            DecodeStatus::Ok => Ok(()),
            DecodeStatus::NeedsLargerContext => Err(AddonError::NeedsLargerContext),
            DecodeStatus::Failed(code) => Err(AddonError::DecodeFailed(code)),
        }
    }
}

/// Adapts a [`ModelBackend`] to the sampler's [`Vocabulary`].
#[derive(Debug, Clone, Copy)]
pub struct EngineVocab<'a>(pub &'a dyn ModelBackend);

impl Vocabulary for EngineVocab<'_> {
    fn n_vocab(&self) -> usize {
        self.0.vocab_size()
    }

    fn is_eog(&self, token: u32) -> bool {
        self.0.is_end_of_generation(token)
    }

    fn token_piece(&self, token: u32) -> &[u8] {
        self.0.token_piece(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(DecodeStatus::from_code(0), DecodeStatus::Ok);
        assert_eq!(DecodeStatus::from_code(1), DecodeStatus::NeedsLargerContext);
        assert_eq!(DecodeStatus::from_code(-3), DecodeStatus::Failed(-3));
        assert!(matches!(
            DecodeStatus::from_code(2).into_result(),
            Err(AddonError::DecodeFailed(2))
        ));
        assert!(DecodeStatus::Ok.into_result().is_ok());
    }
}
