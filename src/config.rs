//! Pipeline configuration.
//!
//! All components receive an explicit configuration object at construction;
//! there is no ambient global settings state. Configuration can be loaded
//! from a YAML file, from environment variables, or built from defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// IO error while reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for all artifact storage (sandboxed).
    pub data_root: PathBuf,
    /// SQLite connection URL for the job store.
    pub database_url: String,
    /// Number of background workers processing jobs.
    pub workers: usize,
    /// Maximum wall-clock seconds for a single job execution.
    pub job_timeout_secs: u64,
    /// Seconds after which a running job with no heartbeat is considered stale.
    pub stale_after_secs: u64,
    /// LLM client settings.
    pub llm: LlmConfig,
    /// Generation stage defaults.
    pub generation: GenerationConfig,
    /// Curation stage defaults.
    pub curation: CurationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            database_url: "sqlite://synthforge.db?mode=rwc".to_string(),
            workers: 4,
            job_timeout_secs: 1800, // 30 minutes
            stale_after_secs: 3600, // 60 minutes
            llm: LlmConfig::default(),
            generation: GenerationConfig::default(),
            curation: CurationConfig::default(),
        }
    }
}

/// LLM client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier used for generation and scoring.
    pub model: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".to_string(),
            api_key: None,
            model: "meta-llama/Llama-3.3-70B-Instruct".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Defaults for the generate stage. Job config values override these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Total number of items to generate per document.
    pub num_pairs: usize,
    /// Sampling temperature for generation requests.
    pub temperature: f64,
    /// Optional completion token cap.
    pub max_tokens: Option<u32>,
    /// Generation flavor: "qa" or "cot".
    pub qa_type: String,
    /// Maximum concurrent in-flight chunk requests.
    pub concurrency: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            num_pairs: 25,
            temperature: 0.7,
            max_tokens: None,
            qa_type: "qa".to_string(),
            concurrency: 4,
        }
    }
}

/// Defaults for the curate stage. Job config values override these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Minimum quality score (0-10, inclusive) to retain an item.
    pub threshold: f64,
    /// Number of items rated per scoring request.
    pub batch_size: usize,
    /// Sampling temperature for scoring requests.
    pub temperature: f64,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            threshold: 7.0,
            batch_size: 8,
            temperature: 0.1,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Creates configuration from environment variables, starting from defaults.
    ///
    /// # Environment Variables
    ///
    /// - `SYNTHFORGE_DATA_ROOT`: artifact storage root (default: ./data)
    /// - `SYNTHFORGE_DATABASE_URL`: SQLite connection URL
    /// - `SYNTHFORGE_WORKERS`: worker pool size (default: 4)
    /// - `SYNTHFORGE_JOB_TIMEOUT_SECS`: per-job timeout (default: 1800)
    /// - `SYNTHFORGE_STALE_AFTER_SECS`: stale-job threshold (default: 3600)
    /// - `SYNTHFORGE_API_BASE`: LLM API base URL
    /// - `SYNTHFORGE_API_KEY`: LLM API key
    /// - `SYNTHFORGE_MODEL`: LLM model identifier
    /// - `SYNTHFORGE_REQUEST_TIMEOUT_SECS`: LLM per-request timeout
    /// - `SYNTHFORGE_CHUNK_SIZE`: generation chunk size (default: 4000)
    /// - `SYNTHFORGE_NUM_PAIRS`: items per document (default: 25)
    /// - `SYNTHFORGE_TEMPERATURE`: generation temperature (default: 0.7)
    /// - `SYNTHFORGE_THRESHOLD`: curation threshold (default: 7.0)
    /// - `SYNTHFORGE_BATCH_SIZE`: curation batch size (default: 8)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SYNTHFORGE_DATA_ROOT") {
            config.data_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_DATABASE_URL") {
            config.database_url = val;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_WORKERS") {
            config.workers = parse_env_value(&val, "SYNTHFORGE_WORKERS")?;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_JOB_TIMEOUT_SECS") {
            config.job_timeout_secs = parse_env_value(&val, "SYNTHFORGE_JOB_TIMEOUT_SECS")?;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_STALE_AFTER_SECS") {
            config.stale_after_secs = parse_env_value(&val, "SYNTHFORGE_STALE_AFTER_SECS")?;
        }

        if let Ok(val) = std::env::var("SYNTHFORGE_API_BASE") {
            config.llm.api_base = val;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_API_KEY") {
            config.llm.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_MODEL") {
            config.llm.model = val;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_REQUEST_TIMEOUT_SECS") {
            config.llm.request_timeout_secs =
                parse_env_value(&val, "SYNTHFORGE_REQUEST_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("SYNTHFORGE_CHUNK_SIZE") {
            config.generation.chunk_size = parse_env_value(&val, "SYNTHFORGE_CHUNK_SIZE")?;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_NUM_PAIRS") {
            config.generation.num_pairs = parse_env_value(&val, "SYNTHFORGE_NUM_PAIRS")?;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_TEMPERATURE") {
            config.generation.temperature = parse_env_value(&val, "SYNTHFORGE_TEMPERATURE")?;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_THRESHOLD") {
            config.curation.threshold = parse_env_value(&val, "SYNTHFORGE_THRESHOLD")?;
        }
        if let Ok(val) = std::env::var("SYNTHFORGE_BATCH_SIZE") {
            config.curation.batch_size = parse_env_value(&val, "SYNTHFORGE_BATCH_SIZE")?;
        }

        Ok(config)
    }

    /// Per-job timeout as a `Duration`.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Stale-job threshold as a `Duration`.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl LlmConfig {
    /// Per-request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.workers, 4);
        assert_eq!(config.job_timeout_secs, 1800);
        assert_eq!(config.stale_after_secs, 3600);
        assert_eq!(config.generation.chunk_size, 4000);
        assert_eq!(config.generation.num_pairs, 25);
        assert!((config.curation.threshold - 7.0).abs() < f64::EPSILON);
        assert_eq!(config.curation.batch_size, 8);
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();

        assert_eq!(config.job_timeout(), Duration::from_secs(1800));
        assert_eq!(config.stale_after(), Duration::from_secs(3600));
        assert_eq!(config.llm.request_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_env_value() {
        let parsed: usize = parse_env_value("8", "TEST_KEY").unwrap();
        assert_eq!(parsed, 8);

        let err = parse_env_value::<usize>("not-a-number", "TEST_KEY").unwrap_err();
        assert!(err.to_string().contains("TEST_KEY"));
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
workers: 8
curation:
  threshold: 8.5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.workers, 8);
        assert!((config.curation.threshold - 8.5).abs() < f64::EPSILON);
        // Unspecified sections fall back to defaults
        assert_eq!(config.generation.chunk_size, 4000);
    }
}
