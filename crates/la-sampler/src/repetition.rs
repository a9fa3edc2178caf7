use std::collections::HashMap;

use crate::candidates::Candidates;
use crate::ring_buffer::RingBuffer;

pub const DEFAULT_MAX_TOKENS: usize = 64;

/// Penalty magnitudes and history window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepetitionParams {
    /// 1.0 disables the multiplicative penalty.
    pub penalty: f32,
    pub max_tokens: usize,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for RepetitionParams {
    fn default() -> Self {
        Self {
            penalty: 1.0,
            max_tokens: DEFAULT_MAX_TOKENS,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

impl RepetitionParams {
    /// False when every penalty is the identity.
    pub fn is_enabled(&self) -> bool {
        self.penalty != 1.0 && self.max_tokens > 0
    }
}

/// Penalizes tokens found in a bounded history of recently accepted tokens.
///
/// For each token present in the history:
/// - positive logits are divided by `penalty`, the rest multiplied by it;
/// - then `frequency_penalty * count + presence_penalty` is subtracted.
#[derive(Debug, Clone)]
pub struct RepetitionPenalty {
    params: RepetitionParams,
    history: RingBuffer<u32>,
}

impl RepetitionPenalty {
    /// A stage with an empty history of `params.max_tokens` entries.
    pub fn new(params: RepetitionParams) -> Self {
        Self {
            params,
            history: RingBuffer::new(params.max_tokens),
        }
    }

    pub fn params(&self) -> &RepetitionParams {
        &self.params
    }

    /// Recent tokens, oldest first.
    pub fn history(&self) -> &RingBuffer<u32> {
        &self.history
    }

    /// Record a generated token so it is penalized in later steps.
    pub fn accept(&mut self, token: u32) {
        self.history.push(token);
    }

    /// Forget the history.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Bring the history in line with `tokens`, the caller's view of recent
    /// output (oldest first).
    ///
    /// Appends only what is new when the current history is a prefix of the
    /// supplied window or the window slid forward by one token; rebuilds it
    /// otherwise.
    pub fn sync(&mut self, tokens: &[u32]) {
        let capacity = self.history.capacity();
        let target = &tokens[tokens.len().saturating_sub(capacity)..];
        let current: Vec<u32> = self.history.iter().copied().collect();

        if current == target {
            return;
        }

        if self.history.is_full()
            && target.len() == capacity
            && current[1..] == target[..capacity - 1]
        {
            self.history.push(target[capacity - 1]);
            return;
        }

        if target.starts_with(&current) {
            for &token in &target[current.len()..] {
                self.history.push(token);
            }
            return;
        }

        self.history.clear();
        for &token in target {
            self.history.push(token);
        }
    }

    /// Penalize every candidate seen in the history.
    pub fn apply(&self, candidates: &mut Candidates) {
        if !self.params.is_enabled() || self.history.is_empty() {
            return;
        }

        let mut counts: HashMap<u32, u32> = HashMap::new();
        for &token in self.history.iter() {
            *counts.entry(token).or_insert(0) += 1;
        }

        let penalty = self.params.penalty;
        for t in candidates.iter_mut() {
            let Some(&count) = counts.get(&t.id) else {
                continue;
            };
            if t.logit <= 0.0 {
                t.logit *= penalty;
            } else {
                t.logit /= penalty;
            }
            t.logit -= count as f32 * self.params.frequency_penalty + self.params.presence_penalty;
        }
    }
}
