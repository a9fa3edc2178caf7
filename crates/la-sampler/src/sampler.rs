use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bias::TokenBias;
use crate::candidates::Candidates;
use crate::chain::{ChainSettings, SamplerChain};
use crate::config::SamplerConfig;
use crate::error::{Result, SamplerError};
use crate::grammar::{self, SharedGrammarState};
use crate::repetition::RepetitionPenalty;
use crate::vocab::Vocabulary;

/// Which side-channel results a sampling call should compute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleRequest {
    pub probabilities: bool,
    pub confidence: bool,
}

/// Result of one sampling call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleOutput {
    /// `None` when no candidate was left with a finite logit.
    pub token: Option<u32>,
    /// `(token, probability)` over the final candidates, most likely first.
    pub probabilities: Option<Vec<(u32, f32)>>,
    /// Probability of the selected token.
    pub confidence: Option<f32>,
}

/// Turns one position's logits into a token.
///
/// Holds everything that persists between calls: the configured stages, the
/// random generator, the repetition history, the bias table, the grammar
/// state and a scratch candidate buffer.
#[derive(Debug)]
pub struct Sampler {
    n_vocab: usize,
    chain_settings: ChainSettings,
    chain: Option<SamplerChain>,
    seed: Option<u32>,
    rng: StdRng,
    repetition: Option<RepetitionPenalty>,
    bias: Option<TokenBias>,
    grammar: Option<SharedGrammarState>,
    candidates: Candidates,
}

impl Sampler {
    /// A greedy sampler with no penalties, bias or grammar.
    pub fn new(n_vocab: usize) -> Self {
        Self {
            n_vocab,
            chain_settings: ChainSettings::default(),
            chain: None,
            seed: None,
            rng: StdRng::from_entropy(),
            repetition: None,
            bias: None,
            grammar: None,
            candidates: Candidates::default(),
        }
    }

    pub fn n_vocab(&self) -> usize {
        self.n_vocab
    }

    /// The seed last applied, if any.
    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    /// The cached stage chain, built lazily on the next sample.
    pub fn chain(&self) -> Option<&SamplerChain> {
        self.chain.as_ref()
    }

    pub fn repetition(&self) -> Option<&RepetitionPenalty> {
        self.repetition.as_ref()
    }

    pub fn bias(&self) -> Option<&TokenBias> {
        self.bias.as_ref()
    }

    /// The grammar state consulted on every sample, if any.
    pub fn grammar(&self) -> Option<&SharedGrammarState> {
        self.grammar.as_ref()
    }

    /// Apply an options bag. `grammar` is the state `config.grammar_evaluation_state`
    /// refers to, already resolved by the caller.
    ///
    /// The whole bag is validated first; on error nothing changes. Stages
    /// whose parameters are unchanged keep their state.
    pub fn apply_config(
        &mut self,
        config: &SamplerConfig,
        grammar: Option<SharedGrammarState>,
    ) -> Result<()> {
        config.validate(self.n_vocab)?;
        let bias = config.token_bias(self.n_vocab)?;

        let chain_settings = config.chain_settings();
        if chain_settings != self.chain_settings {
            if self.chain.is_some() {
                debug!("sampler settings changed, dropping cached chain");
            }
            self.chain_settings = chain_settings;
            self.chain = None;
        }

        if let Some(seed) = config.seed {
            if self.seed != Some(seed) {
                self.rng = StdRng::seed_from_u64(u64::from(seed));
                self.seed = Some(seed);
            }
        }

        self.repetition = match (config.repetition_params(), &config.repeat_penalty_tokens) {
            (Some(params), Some(tokens)) if params.is_enabled() => {
                let mut repetition = match self.repetition.take() {
                    Some(existing) if *existing.params() == params => existing,
                    _ => RepetitionPenalty::new(params),
                };
                repetition.sync(tokens);
                Some(repetition)
            }
            _ => None,
        };

        self.bias = bias;
        self.grammar = grammar;
        Ok(())
    }

    fn prepare_candidates(&mut self, logits: &[f32], vocab: &dyn Vocabulary, use_bias: bool) {
        self.candidates.fill(logits);
        if use_bias {
            if let Some(bias) = &self.bias {
                bias.apply(&mut self.candidates, vocab);
            }
        }
        if let Some(repetition) = &self.repetition {
            repetition.apply(&mut self.candidates);
        }
        if let Some(state) = &self.grammar {
            grammar::apply(&grammar::lock(state), &mut self.candidates, vocab);
        }
    }

    /// Sample the next token from `logits`.
    ///
    /// `None` logits means the model cannot generate tokens. When the grammar
    /// and the bias table together exclude every candidate, the pass is run
    /// once more without the bias. The selected token is accepted into the
    /// grammar and the repetition history before returning.
    pub fn sample(
        &mut self,
        logits: Option<&[f32]>,
        vocab: &dyn Vocabulary,
        request: SampleRequest,
    ) -> Result<SampleOutput> {
        let logits = logits.ok_or(SamplerError::LogitsUnavailable)?;
        if logits.len() != self.n_vocab {
            return Err(SamplerError::LogitsLength {
                expected: self.n_vocab,
                got: logits.len(),
            });
        }

        let mut use_bias = self.bias.is_some();
        loop {
            self.prepare_candidates(logits, vocab, use_bias);
            if use_bias && self.grammar.is_some() && !self.candidates.any_finite() {
                debug!("token bias left no token the grammar accepts, sampling again without it");
                use_bias = false;
                continue;
            }
            break;
        }

        if !self.candidates.any_finite() {
            warn!("no candidate token left to sample from");
            return Ok(SampleOutput::default());
        }

        let chain = self
            .chain
            .get_or_insert_with(|| {
                let chain = SamplerChain::build(self.chain_settings, self.n_vocab);
                debug!("built sampler chain: {:?}", chain.stage_names());
                chain
            });
        let Some(token) = chain.sample(&mut self.candidates, &mut self.rng) else {
            warn!("sampler chain selected no token");
            return Ok(SampleOutput::default());
        };

        let mut output = SampleOutput {
            token: Some(token),
            ..Default::default()
        };
        if request.probabilities || request.confidence {
            self.candidates.softmax();
            if request.probabilities {
                output.probabilities = Some(
                    self.candidates
                        .iter()
                        .filter(|t| t.logit.is_finite())
                        .map(|t| (t.id, t.p))
                        .collect(),
                );
            }
            if request.confidence {
                output.confidence = self.candidates.selected().map(|t| t.p);
            }
        }

        self.accept_token(token, vocab)?;
        Ok(output)
    }

    /// Feed a token into the repetition history and the grammar state.
    pub fn accept_token(&mut self, token: u32, vocab: &dyn Vocabulary) -> Result<()> {
        if token as usize >= self.n_vocab {
            return Err(SamplerError::TokenOutOfRange {
                token,
                n_vocab: self.n_vocab,
            });
        }
        if let Some(state) = &self.grammar {
            grammar::accept_token(&mut grammar::lock(state), token, vocab)?;
        }
        if let Some(repetition) = &mut self.repetition {
            repetition.accept(token);
        }
        Ok(())
    }
}
