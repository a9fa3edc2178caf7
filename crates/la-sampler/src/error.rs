use la_grammar::GrammarError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("this model does not support token generation")]
    LogitsUnavailable,
    #[error("logits length mismatch: expected {expected}, got {got}")]
    LogitsLength { expected: usize, got: usize },
    #[error("invalid sampler configuration: {0}")]
    InvalidConfiguration(String),
    #[error("token {token} is out of range for a vocabulary of {n_vocab}")]
    TokenOutOfRange { token: u32, n_vocab: usize },
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

pub type Result<T> = std::result::Result<T, SamplerError>;
