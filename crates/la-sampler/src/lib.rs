//! Token sampling pipeline.
//!
//! Raw logits become a [`Candidates`] set that flows through the bias,
//! repetition-penalty and grammar stages and then the distribution-shaping
//! [`SamplerChain`]. [`Sampler`] drives the whole pass and keeps the state
//! that persists between calls.

pub mod bias;
pub mod candidates;
pub mod chain;
pub mod config;
pub mod error;
pub mod grammar;
pub mod greedy;
pub mod min_p;
pub mod repetition;
pub mod ring_buffer;
pub mod sampler;
pub mod temperature;
pub mod top_k;
pub mod top_p;
pub mod vocab;

pub use bias::TokenBias;
pub use candidates::{Candidates, TokenData};
pub use chain::{ChainSettings, SamplerChain, Stage};
pub use config::SamplerConfig;
pub use error::{Result, SamplerError};
pub use grammar::SharedGrammarState;
pub use greedy::{Dist, Greedy};
pub use min_p::MinP;
pub use repetition::{RepetitionParams, RepetitionPenalty};
pub use ring_buffer::RingBuffer;
pub use sampler::{SampleOutput, SampleRequest, Sampler};
pub use temperature::Temperature;
pub use top_k::TopK;
pub use top_p::TopP;
pub use vocab::Vocabulary;
