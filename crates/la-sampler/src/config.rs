use serde::{Deserialize, Deserializer};

use crate::bias::TokenBias;
use crate::chain::ChainSettings;
use crate::error::{Result, SamplerError};
use crate::repetition::{RepetitionParams, DEFAULT_MAX_TOKENS};

/// Options bag accepted by `Sampler::apply_config`.
///
/// Every key is optional; an absent key disables its stage (or, for `seed`,
/// keeps the current generator).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerConfig {
    pub temperature: Option<f32>,
    pub min_p: Option<f32>,
    pub top_k: Option<i32>,
    pub top_p: Option<f32>,
    pub seed: Option<u32>,
    pub repeat_penalty: Option<f32>,
    pub repeat_penalty_max_tokens: Option<i32>,
    pub repeat_penalty_presence_penalty: Option<f32>,
    pub repeat_penalty_frequency_penalty: Option<f32>,
    pub repeat_penalty_tokens: Option<Vec<u32>>,
    pub token_bias_keys: Option<Vec<u32>>,
    #[serde(deserialize_with = "deserialize_bias_values")]
    pub token_bias_values: Option<Vec<f32>>,
    /// Handle id of a grammar evaluation state, resolved by the runtime.
    pub grammar_evaluation_state: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BiasValue {
    Number(f32),
    Text(String),
}

/// JSON has no infinities, so bias values also accept `"-Infinity"` and
/// `"Infinity"` as strings. Only the negative one passes `validate`.
fn deserialize_bias_values<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(values) = Option::<Vec<BiasValue>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    values
        .into_iter()
        .map(|v| match v {
            BiasValue::Number(n) => Ok(n),
            BiasValue::Text(s) => match s.as_str() {
                "-Infinity" | "-inf" => Ok(f32::NEG_INFINITY),
                "Infinity" | "inf" => Ok(f32::INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "invalid token bias value: {:?}",
                    other
                ))),
            },
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(Some)
}

fn check_number(name: &str, value: Option<f32>) -> Result<()> {
    match value {
        Some(v) if v.is_nan() => Err(SamplerError::InvalidConfiguration(format!(
            "{} must be a number",
            name
        ))),
        _ => Ok(()),
    }
}

impl SamplerConfig {
    /// The part of the bag that shapes the stage chain.
    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            temperature: self.temperature,
            min_p: self.min_p,
            top_k: self.top_k,
            top_p: self.top_p,
        }
    }

    /// Repetition parameters with defaults for absent keys, or `None` when
    /// no token history was supplied.
    pub fn repetition_params(&self) -> Option<RepetitionParams> {
        self.repeat_penalty_tokens.as_ref()?;
        Some(RepetitionParams {
            penalty: self.repeat_penalty.unwrap_or(1.0),
            max_tokens: self
                .repeat_penalty_max_tokens
                .map_or(DEFAULT_MAX_TOKENS, |n| n.max(0) as usize),
            presence_penalty: self.repeat_penalty_presence_penalty.unwrap_or(0.0),
            frequency_penalty: self.repeat_penalty_frequency_penalty.unwrap_or(0.0),
        })
    }

    /// The bias table, or `None` when no non-empty table was supplied.
    pub fn token_bias(&self, n_vocab: usize) -> Result<Option<TokenBias>> {
        match (&self.token_bias_keys, &self.token_bias_values) {
            (None, None) => Ok(None),
            (Some(keys), Some(values)) => {
                let bias = TokenBias::from_pairs(keys, values, n_vocab)?;
                Ok((!bias.is_empty()).then_some(bias))
            }
            _ => Err(SamplerError::InvalidConfiguration(
                "tokenBiasKeys and tokenBiasValues must be given together".to_string(),
            )),
        }
    }

    /// Check every field against the vocabulary without building anything.
    pub fn validate(&self, n_vocab: usize) -> Result<()> {
        check_number("temperature", self.temperature)?;
        check_number("minP", self.min_p)?;
        check_number("topP", self.top_p)?;
        check_number("repeatPenalty", self.repeat_penalty)?;
        check_number("repeatPenaltyPresencePenalty", self.repeat_penalty_presence_penalty)?;
        check_number("repeatPenaltyFrequencyPenalty", self.repeat_penalty_frequency_penalty)?;

        if let Some(tokens) = &self.repeat_penalty_tokens {
            if let Some(&token) = tokens.iter().find(|&&t| t as usize >= n_vocab) {
                return Err(SamplerError::TokenOutOfRange { token, n_vocab });
            }
        }
        self.token_bias(n_vocab)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_camel_case_keys() {
        let config: SamplerConfig = serde_json::from_str(
            r#"{
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.9,
                "minP": 0.05,
                "seed": 1234,
                "repeatPenalty": 1.1,
                "repeatPenaltyMaxTokens": 32,
                "repeatPenaltyTokens": [1, 2, 3],
                "tokenBiasKeys": [5, 6],
                "tokenBiasValues": [1.5, "-Infinity"],
                "grammarEvaluationState": 9
            }"#,
        )
        .unwrap();

        assert_eq!(config.top_k, Some(40));
        assert_eq!(config.seed, Some(1234));
        assert_eq!(config.grammar_evaluation_state, Some(9));
        assert_eq!(config.token_bias_values, Some(vec![1.5, f32::NEG_INFINITY]));

        let params = config.repetition_params().unwrap();
        assert_eq!(params.max_tokens, 32);
        assert!(params.is_enabled());
        assert!(config.validate(10).is_ok());
    }

    #[test]
    fn test_empty_bag_disables_everything() {
        let config: SamplerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.chain_settings().is_greedy());
        assert!(config.repetition_params().is_none());
        assert!(config.token_bias(10).unwrap().is_none());
    }

    #[test]
    fn test_repetition_defaults() {
        let config = SamplerConfig {
            repeat_penalty_tokens: Some(vec![]),
            ..Default::default()
        };
        let params = config.repetition_params().unwrap();
        assert_eq!(params.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(!params.is_enabled());
    }

    #[test]
    fn test_rejects_half_bias_table() {
        let config = SamplerConfig {
            token_bias_keys: Some(vec![1]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(10),
            Err(SamplerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_bad_bias_string() {
        let result: std::result::Result<SamplerConfig, _> =
            serde_json::from_str(r#"{"tokenBiasKeys": [1], "tokenBiasValues": ["lots"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_positive_infinite_bias() {
        let config: SamplerConfig = serde_json::from_str(
            r#"{"tokenBiasKeys": [1], "tokenBiasValues": ["Infinity"]}"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(10),
            Err(SamplerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_history() {
        let config = SamplerConfig {
            repeat_penalty_tokens: Some(vec![3, 12]),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(10),
            Err(SamplerError::TokenOutOfRange { token: 12, .. })
        ));
    }
}
