use rand::rngs::StdRng;

use crate::candidates::Candidates;
use crate::greedy::{Dist, Greedy};
use crate::min_p::MinP;
use crate::temperature::Temperature;
use crate::top_k::TopK;
use crate::top_p::TopP;

/// The user-facing knobs that decide which stages the chain holds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainSettings {
    /// Absent or `<= 0` selects greedy arg-max.
    pub temperature: Option<f32>,
    pub min_p: Option<f32>,
    pub top_k: Option<i32>,
    pub top_p: Option<f32>,
}

impl ChainSettings {
    /// True when no positive temperature is set, so the chain is plain
    /// arg-max.
    pub fn is_greedy(&self) -> bool {
        self.temperature.map_or(true, |t| t <= 0.0)
    }
}

/// One distribution-shaping step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    TopK(TopK),
    TopP(TopP),
    MinP(MinP),
    Temperature(Temperature),
    Greedy(Greedy),
    Dist(Dist),
}

impl Stage {
    /// Name of the wrapped stage.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::TopK(s) => s.name(),
            Stage::TopP(s) => s.name(),
            Stage::MinP(s) => s.name(),
            Stage::Temperature(s) => s.name(),
            Stage::Greedy(s) => s.name(),
            Stage::Dist(s) => s.name(),
        }
    }

    fn apply(&self, candidates: &mut Candidates, rng: &mut StdRng) {
        match self {
            Stage::TopK(s) => s.apply(candidates),
            Stage::TopP(s) => s.apply(candidates),
            Stage::MinP(s) => s.apply(candidates),
            Stage::Temperature(s) => s.apply(candidates),
            Stage::Greedy(s) => s.apply(candidates),
            Stage::Dist(s) => s.apply(candidates, rng),
        }
    }
}

/// Ordered stages ending in a selector: either greedy alone, or
/// top-k → top-p → min-p → temperature → dist with disabled stages left out.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerChain {
    settings: ChainSettings,
    stages: Vec<Stage>,
}

impl SamplerChain {
    /// Build the stages for `settings`: top-k, top-p, min-p, temperature
    /// and a seeded draw, or greedy alone.
    pub fn build(settings: ChainSettings, n_vocab: usize) -> Self {
        let mut stages = Vec::new();

        match settings.temperature {
            Some(temperature) if temperature > 0.0 => {
                if let Some(k) = settings.top_k {
                    stages.push(Stage::TopK(TopK::new(k, n_vocab)));
                }
                if let Some(p) = settings.top_p.filter(|&p| TopP::is_enabled(p)) {
                    stages.push(Stage::TopP(TopP::new(p)));
                }
                if let Some(min_p) = settings.min_p.filter(|&m| MinP::is_enabled(m)) {
                    stages.push(Stage::MinP(MinP::new(min_p)));
                }
                stages.push(Stage::Temperature(Temperature::new(temperature)));
                stages.push(Stage::Dist(Dist));
            }
            _ => stages.push(Stage::Greedy(Greedy)),
        }

        Self { settings, stages }
    }

    /// Settings the chain was built from.
    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    /// Stages in the order they run.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stage names in run order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Run every stage in order and return the selected token, if any
    /// candidate had a finite logit.
    pub fn sample(&self, candidates: &mut Candidates, rng: &mut StdRng) -> Option<u32> {
        if !candidates.any_finite() {
            return None;
        }
        for stage in &self.stages {
            stage.apply(candidates, rng);
        }
        candidates.selected().map(|t| t.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_greedy_when_temperature_absent_or_zero() {
        let chain = SamplerChain::build(ChainSettings::default(), 5);
        assert_eq!(chain.stage_names(), vec!["greedy"]);

        let settings = ChainSettings {
            temperature: Some(0.0),
            top_k: Some(2),
            ..Default::default()
        };
        assert!(settings.is_greedy());
        assert_eq!(SamplerChain::build(settings, 5).stage_names(), vec!["greedy"]);
    }

    #[test]
    fn test_full_chain_order() {
        let settings = ChainSettings {
            temperature: Some(0.8),
            min_p: Some(0.05),
            top_k: Some(40),
            top_p: Some(0.95),
        };
        let chain = SamplerChain::build(settings, 100);
        assert_eq!(
            chain.stage_names(),
            vec!["top_k", "top_p", "min_p", "temperature", "dist"]
        );
    }

    #[test]
    fn test_disabled_stages_left_out() {
        let settings = ChainSettings {
            temperature: Some(1.0),
            min_p: Some(0.0),
            top_k: None,
            top_p: Some(1.0),
        };
        let chain = SamplerChain::build(settings, 100);
        assert_eq!(chain.stage_names(), vec!["temperature", "dist"]);
    }

    #[test]
    fn test_greedy_scenario() {
        let chain = SamplerChain::build(ChainSettings::default(), 5);
        let mut rng = StdRng::seed_from_u64(0);
        let mut c = Candidates::from_logits(&[1.0, 5.0, 2.0, 5.0, 0.0]);
        assert_eq!(chain.sample(&mut c, &mut rng), Some(1));
    }

    #[test]
    fn test_top_k_restricts_draws() {
        let settings = ChainSettings {
            temperature: Some(1.0),
            top_k: Some(2),
            ..Default::default()
        };
        let chain = SamplerChain::build(settings, 5);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let mut c = Candidates::from_logits(&[1.0, 5.0, 2.0, 5.0, 0.0]);
            let token = chain.sample(&mut c, &mut rng);
            assert!(matches!(token, Some(1) | Some(3)));
        }
    }

    #[test]
    fn test_nothing_finite_selects_nothing() {
        let chain = SamplerChain::build(ChainSettings::default(), 2);
        let mut rng = StdRng::seed_from_u64(0);
        let mut c = Candidates::from_logits(&[f32::NEG_INFINITY; 2]);
        assert_eq!(chain.sample(&mut c, &mut rng), None);
    }
}
