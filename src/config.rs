use crate::error::{PrequalError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const API_KEY_ENV: &str = "NVIDIA_API_KEY";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Per-request timeout. The provider default is unbounded enough to stall
    /// a whole fan-out slot, so this is always explicit.
    pub timeout_seconds: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://integrate.api.nvidia.com/v1/chat/completions".to_string(),
            model: "qwen/qwen3-coder-480b-a35b-instruct".to_string(),
            max_tokens: 1024,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrency ceiling for the classification fan-out, sized to stay
    /// under the provider's rate limit.
    pub concurrency: usize,
    pub top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 40,
            top_n: 200,
        }
    }
}

impl Config {
    /// Loads `config.toml` from the working directory, falling back to
    /// defaults when the file does not exist. A present-but-invalid file is
    /// an error, not a silent fallback.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(path).map_err(|e| {
            PrequalError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}

/// Reads the classification-provider API key from the environment.
///
/// Called before any network attempt so a missing credential fails fast with
/// a descriptive error instead of sending an unauthenticated request.
pub fn api_key_from_env() -> Result<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(PrequalError::Config(format!(
            "{API_KEY_ENV} is not set; export it or add it to .env before running the classifier"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from("does_not_exist.toml").unwrap();
        assert_eq!(config.pipeline.concurrency, 40);
        assert_eq!(config.pipeline.top_n, 200);
        assert_eq!(config.classifier.timeout_seconds, 60);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[pipeline]\nconcurrency = 8").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.pipeline.concurrency, 8);
        assert_eq!(config.pipeline.top_n, 200);
        assert_eq!(
            config.classifier.endpoint,
            "https://integrate.api.nvidia.com/v1/chat/completions"
        );
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "pipeline = \"not a table\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
