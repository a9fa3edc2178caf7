use crate::candidates::Candidates;

/// Keeps only the K highest-logit candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopK {
    k: usize,
}

impl TopK {
    /// `k <= 0` means the whole vocabulary; larger values are clamped to it.
    pub fn new(k: i32, n_vocab: usize) -> Self {
        let k = if k <= 0 {
            n_vocab
        } else {
            (k as usize).min(n_vocab)
        };
        Self { k }
    }

    /// The resolved number of candidates kept.
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn name(&self) -> &'static str {
        "top_k"
    }

    /// Keep the `k` highest logits.
    pub fn apply(&self, candidates: &mut Candidates) {
        candidates.sort_by_logit();
        if self.k < candidates.len() {
            candidates.truncate(self.k);
        }
    }
}
