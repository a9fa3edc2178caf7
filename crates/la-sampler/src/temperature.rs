use crate::candidates::Candidates;

/// Last shaping stage before the draw: every surviving logit is divided by
/// `temperature`, so values below one favour the leading candidates and
/// values above one spread probability toward the tail.
///
/// Only built for a positive temperature; the chain takes the greedy branch
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature {
    temperature: f32,
}

impl Temperature {
    /// `temperature` must be positive.
    pub fn new(temperature: f32) -> Self {
        debug_assert!(temperature > 0.0);
        Self { temperature }
    }

    pub fn name(&self) -> &'static str {
        "temperature"
    }

    /// Divide every logit by the temperature.
    pub fn apply(&self, candidates: &mut Candidates) {
        let was_sorted = candidates.is_sorted();
        for t in candidates.iter_mut() {
            t.logit /= self.temperature;
        }
        // order is unchanged, so this only restores the flag
        if was_sorted {
            candidates.sort_by_logit();
        }
    }
}
