use std::cell::RefCell;
use std::ffi::CString;
use std::fmt;

use la_grammar::GrammarError;
use la_sampler::SamplerError;
use thiserror::Error;

use crate::types::LaStatus;

/// The kinds of resource a handle can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Model,
    Context,
    Sampler,
    Grammar,
    GrammarState,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Model => "model",
            ResourceKind::Context => "context",
            ResourceKind::Sampler => "sampler",
            ResourceKind::Grammar => "grammar",
            ResourceKind::GrammarState => "grammar evaluation state",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AddonError {
    #[error("{0} is disposed")]
    Disposed(ResourceKind),
    #[error("{kind} is still used by {dependents} other resource(s)")]
    ResourceInUse {
        kind: ResourceKind,
        dependents: usize,
    },
    #[error("{0}")]
    Unsupported(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("the batch does not fit in the context")]
    NeedsLargerContext,
    #[error("decode failed with status {0}")]
    DecodeFailed(i32),
    #[error("worker pool is shut down")]
    WorkerClosed,
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AddonError>;

impl AddonError {
    /// Status code reported across the C ABI.
    pub fn status(&self) -> LaStatus {
        match self {
            AddonError::Disposed(_) => LaStatus::ErrorDisposed,
            AddonError::ResourceInUse { .. } => LaStatus::ErrorInUse,
            AddonError::Unsupported(_) | AddonError::Sampler(SamplerError::LogitsUnavailable) => {
                LaStatus::ErrorUnsupported
            }
            AddonError::InvalidArgument(_)
            | AddonError::Sampler(SamplerError::LogitsLength { .. })
            | AddonError::Sampler(SamplerError::TokenOutOfRange { .. }) => {
                LaStatus::ErrorInvalidArgument
            }
            AddonError::InvalidConfiguration(_)
            | AddonError::Sampler(SamplerError::InvalidConfiguration(_))
            | AddonError::Sampler(SamplerError::Grammar(_))
            | AddonError::Grammar(_)
            | AddonError::Json(_)
            | AddonError::Toml(_) => LaStatus::ErrorInvalidConfiguration,
            AddonError::NeedsLargerContext => LaStatus::ErrorNeedsLargerContext,
            AddonError::DecodeFailed(_) => LaStatus::ErrorDecode,
            AddonError::WorkerClosed | AddonError::Panicked(_) | AddonError::Io(_) => {
                LaStatus::ErrorInternal
            }
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `la_last_error`.
pub fn set_last_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg.replace('\0', " ")).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Record `err` as the last error and return its status code.
pub fn report(err: &AddonError) -> LaStatus {
    set_last_error(err.to_string());
    err.status()
}
