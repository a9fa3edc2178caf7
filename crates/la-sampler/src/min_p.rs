use crate::candidates::Candidates;

/// Drops candidates whose probability is below `min_p` times the probability
/// of the most likely candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinP {
    min_p: f32,
}

impl MinP {
    /// Keep candidates whose probability is at least `min_p` times the top
    /// one.
    pub fn new(min_p: f32) -> Self {
        Self { min_p }
    }

    /// A floor of zero or less keeps everything, so the stage is skipped.
    pub fn is_enabled(min_p: f32) -> bool {
        min_p > 0.0
    }

    pub fn name(&self) -> &'static str {
        "min_p"
    }

    /// Drop candidates under the floor, always keeping the best one.
    pub fn apply(&self, candidates: &mut Candidates) {
        if candidates.is_empty() || !Self::is_enabled(self.min_p) {
            return;
        }
        let Some(max) = candidates
            .iter()
            .map(|t| t.logit)
            .filter(|l| l.is_finite())
            .reduce(f32::max)
        else {
            return;
        };

        // p_i / p_max == exp(logit_i - logit_max)
        let min_logit = max + self.min_p.ln();
        candidates.retain(|t| t.logit >= min_logit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_unlikely_tokens() {
        let mut c = Candidates::from_logits(&[0.0, 3.0, 2.5, -4.0]);
        MinP::new(0.5).apply(&mut c);
        let mut ids: Vec<u32> = c.iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_zero_disables() {
        let mut c = Candidates::from_logits(&[0.0, 3.0]);
        MinP::new(0.0).apply(&mut c);
        assert_eq!(c.len(), 2);
    }
}
