use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;

use crate::candidates::Candidates;

/// Selects the candidate with the highest logit, ties to the lowest id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Greedy;

impl Greedy {
    pub fn name(&self) -> &'static str {
        "greedy"
    }

    /// Select the highest finite logit; ties go to the lowest id.
    pub fn apply(&self, candidates: &mut Candidates) {
        if let Some(index) = candidates.argmax() {
            candidates.select(index);
        }
    }
}

/// Draws from the softmax of the remaining candidates.
///
/// The generator is owned by the caller so its state carries over between
/// sampling calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dist;

impl Dist {
    pub fn name(&self) -> &'static str {
        "dist"
    }

    /// Draw one candidate in proportion to its softmax probability.
    pub fn apply(&self, candidates: &mut Candidates, rng: &mut StdRng) {
        if !candidates.any_finite() {
            return;
        }
        candidates.softmax();

        let weights: Vec<f32> = candidates.iter().map(|t| t.p).collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => {
                let index = dist.sample(rng);
                candidates.select(index);
            }
            Err(_) => Greedy.apply(candidates),
        }
    }
}
