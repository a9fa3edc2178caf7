use std::collections::HashMap;

use crate::candidates::Candidates;
use crate::error::{Result, SamplerError};
use crate::vocab::Vocabulary;

/// Per-token logit overrides. A bias of negative infinity bans the token;
/// positive infinity is rejected, since a candidate needs a finite logit to
/// be selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenBias {
    biases: HashMap<u32, f32>,
}

impl TokenBias {
    /// Build from parallel key/value arrays. Later duplicates win.
    pub fn from_pairs(keys: &[u32], values: &[f32], n_vocab: usize) -> Result<Self> {
        if keys.len() != values.len() {
            return Err(SamplerError::InvalidConfiguration(format!(
                "tokenBiasKeys has {} entries but tokenBiasValues has {}",
                keys.len(),
                values.len()
            )));
        }

        let mut biases = HashMap::with_capacity(keys.len());
        for (&token, &bias) in keys.iter().zip(values) {
            if token as usize >= n_vocab {
                return Err(SamplerError::TokenOutOfRange { token, n_vocab });
            }
            if bias.is_nan() || bias == f32::INFINITY {
                return Err(SamplerError::InvalidConfiguration(format!(
                    "bias for token {} must be finite or -Infinity, got {}",
                    token, bias
                )));
            }
            biases.insert(token, bias);
        }
        Ok(Self { biases })
    }

    pub fn is_empty(&self) -> bool {
        self.biases.is_empty()
    }

    /// Number of biased tokens.
    pub fn len(&self) -> usize {
        self.biases.len()
    }

    /// The bias of `token`, if any.
    pub fn get(&self, token: u32) -> Option<f32> {
        self.biases.get(&token).copied()
    }

    /// Ban or shift biased candidates. End-of-generation tokens are never
    /// banned; their logit stays as it is.
    pub fn apply(&self, candidates: &mut Candidates, vocab: &dyn Vocabulary) {
        if self.biases.is_empty() {
            return;
        }
        for t in candidates.iter_mut() {
            let Some(&bias) = self.biases.get(&t.id) else {
                continue;
            };
            if bias == f32::NEG_INFINITY {
                if !vocab.is_eog(t.id) {
                    t.logit = f32::NEG_INFINITY;
                }
            } else {
                t.logit += bias;
            }
        }
    }
}
