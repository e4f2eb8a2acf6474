//! Application configuration for the worker binary
//!
//! The worker reads a single YAML file describing the staging directories,
//! the Weaviate connection, queue capacity, and worker-pool sizing. Parse
//! failures and invalid values are fatal at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mailsink_common::error::{MailError, Result};
use mailsink_common::logging::LogLevel;
use serde::Deserialize;

/// Smallest allowed poll interval, to avoid busy-looping the orchestrator.
pub const MIN_POLL_INTERVAL_SECS: f64 = 0.1;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub weaviate: WeaviateConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Staging directory and status database locations
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Incoming mail files awaiting dispatch
    pub wait_dir: PathBuf,
    /// Claimed, in-flight files
    pub run_dir: PathBuf,
    /// Terminal failures kept for inspection
    pub buggy_dir: PathBuf,
    /// SQLite status database file
    pub sqlite_path: PathBuf,
}

/// Weaviate connection and collection settings
#[derive(Debug, Clone, Deserialize)]
pub struct WeaviateConfig {
    /// Server address, including scheme (e.g. "http://localhost:8080")
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    pub embedding: EmbeddingConfig,
}

fn default_collection_name() -> String {
    "MailDoc".to_string()
}

/// Server-side vectorizer settings
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub vector_dimensions: u32,
}

/// Supported embedding providers; vectors are generated server-side by the
/// matching Weaviate module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAi,
    Ollama,
}

impl EmbeddingProvider {
    /// Name of the Weaviate vectorizer module for this provider.
    pub fn vectorizer(self) -> &'static str {
        match self {
            EmbeddingProvider::OpenAi => "text2vec-openai",
            EmbeddingProvider::Ollama => "text2vec-ollama",
        }
    }
}

/// Dispatch queue sizing, in batches
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub maxsize: usize,
}

/// Worker pool sizing and orchestrator cadence
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub threads: usize,
    /// Seconds between dispatch ticks; clamped to [`MIN_POLL_INTERVAL_SECS`]
    pub poll_interval: f64,
}

impl WorkerConfig {
    /// Poll interval with the minimum clamp applied.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval.max(MIN_POLL_INTERVAL_SECS))
    }
}

/// Logger settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

impl AppConfig {
    fn validate(&self) -> Result<()> {
        if self.worker.threads == 0 {
            return Err(MailError::config("worker.threads must be at least 1"));
        }
        if self.queue.maxsize == 0 {
            return Err(MailError::config("queue.maxsize must be at least 1"));
        }
        if self.weaviate.host.is_empty() {
            return Err(MailError::config("weaviate.host must not be empty"));
        }
        Ok(())
    }
}

/// Load and validate an [`AppConfig`] from a YAML file.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let body = std::fs::read_to_string(path)
        .map_err(|e| MailError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: AppConfig = serde_yaml::from_str(&body)
        .map_err(|e| MailError::Config(format!("invalid config {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
paths:
  wait_dir: /tmp/mail/wait
  run_dir: /tmp/mail/run
  buggy_dir: /tmp/mail/buggy
  sqlite_path: /tmp/mail/status.db
weaviate:
  host: http://localhost:8080
  embedding:
    provider: ollama
    model: nomic-embed-text
    vector_dimensions: 768
queue:
  maxsize: 8
worker:
  threads: 4
  poll_interval: 2.0
"#;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample_config() {
        let file = write_config(SAMPLE);
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.worker.threads, 4);
        assert_eq!(cfg.queue.maxsize, 8);
        assert_eq!(cfg.weaviate.collection_name, "MailDoc");
        assert_eq!(cfg.weaviate.embedding.provider, EmbeddingProvider::Ollama);
        assert_eq!(cfg.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_config(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, MailError::Config(_)));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let body = SAMPLE.replace("provider: ollama", "provider: cohere");
        let file = write_config(&body);
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            MailError::Config(_)
        ));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let body = SAMPLE.replace("threads: 4", "threads: 0");
        let file = write_config(&body);
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            MailError::Config(_)
        ));
    }

    #[test]
    fn test_poll_interval_clamped() {
        let worker = WorkerConfig {
            threads: 1,
            poll_interval: 0.0,
        };
        assert_eq!(worker.poll_interval(), Duration::from_secs_f64(0.1));

        let worker = WorkerConfig {
            threads: 1,
            poll_interval: 2.5,
        };
        assert_eq!(worker.poll_interval(), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn test_vectorizer_names() {
        assert_eq!(EmbeddingProvider::OpenAi.vectorizer(), "text2vec-openai");
        assert_eq!(EmbeddingProvider::Ollama.vectorizer(), "text2vec-ollama");
    }
}
