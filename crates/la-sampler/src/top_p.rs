use crate::candidates::Candidates;

/// Nucleus sampling: keeps the smallest prefix of the sorted candidates
/// whose cumulative probability reaches `p`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopP {
    p: f32,
}

impl TopP {
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    /// `p >= 1` keeps everything, so the stage is left out of the chain.
    pub fn is_enabled(p: f32) -> bool {
        p < 1.0
    }

    pub fn name(&self) -> &'static str {
        "top_p"
    }

    /// Keep the smallest prefix whose probability mass reaches `p`.
    pub fn apply(&self, candidates: &mut Candidates) {
        if candidates.is_empty() || !Self::is_enabled(self.p) {
            return;
        }
        candidates.softmax();

        let mut cumulative = 0.0f32;
        let mut cutoff = candidates.len();
        for (i, t) in candidates.iter().enumerate() {
            cumulative += t.p;
            if cumulative >= self.p {
                cutoff = i + 1;
                break;
            }
        }
        candidates.truncate(cutoff);
    }
}
