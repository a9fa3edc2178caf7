use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::process::LogLevel;

fn default_worker_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Runtime settings, usually read from a TOML file.
///
/// ```toml
/// worker_threads = 4
/// log_level = "warn"
/// default_seed = 42
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub log_level: LogLevel,
    /// Seed applied to new samplers before any options bag is applied.
    pub default_seed: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            log_level: LogLevel::default(),
            default_seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_missing_keys() {
        let config = RuntimeConfig::from_toml_str("log_level = \"debug\"").unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.worker_threads >= 1);
        assert_eq!(config.default_seed, None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "worker_threads = 3").unwrap();
        writeln!(file, "default_seed = 7").unwrap();
        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.default_seed, Some(7));
        assert_eq!(config.log_level, LogLevel::Log);
    }

    #[test]
    fn test_rejects_unknown_level() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("log_level = \"loud\""),
            Err(crate::error::AddonError::Toml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RuntimeConfig::load("/nonexistent/llama-addon.toml"),
            Err(crate::error::AddonError::Io(_))
        ));
    }
}
