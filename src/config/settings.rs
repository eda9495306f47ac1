use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ml::FitOptions;

/// Environment variables prefixed with this override file values,
/// e.g. `FORECAST__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "FORECAST";

pub const DEFAULT_MAX_STEPS: usize = 2_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub data: DataSettings,
    pub model: ModelSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings: Settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(false))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("model.hidden_sizes")
                    .with_list_parse_key("server.allowed_origins"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Server validation
        if self.server.port == 0 {
            errors.push("server.port must be > 0".to_string());
        }

        // Data source validation
        if self.data.base_url.is_empty() {
            errors.push("data.base_url must not be empty".to_string());
        }
        if self.data.timeout_secs == 0 {
            errors.push("data.timeout_secs must be > 0".to_string());
        }

        // Model validation
        if self.model.window == 0 {
            errors.push("model.window must be > 0".to_string());
        }
        if self.model.hidden_sizes.is_empty() || self.model.hidden_sizes.contains(&0) {
            errors.push("model.hidden_sizes must list at least one non-zero layer size".to_string());
        }
        if self.model.epochs == 0 {
            errors.push("model.epochs must be > 0".to_string());
        }
        if self.model.batch_size == 0 {
            errors.push("model.batch_size must be > 0".to_string());
        }
        if self.model.learning_rate <= 0.0 || !self.model.learning_rate.is_finite() {
            errors.push("model.learning_rate must be a positive number".to_string());
        }
        if self.model.clip_norm <= 0.0 || self.model.clip_norm.is_nan() {
            errors.push("model.clip_norm must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.model.test_split) {
            errors.push("model.test_split must be in [0, 1)".to_string());
        }
        if self.model.max_steps == 0 {
            errors.push("model.max_steps must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub base_url: String,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            requests_per_second: 2,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Look-back window length L
    pub window: usize,
    pub hidden_sizes: Vec<usize>,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub clip_norm: f64,
    pub seed: u64,
    /// Fraction of pairs held out, taken from the end of the series
    pub test_split: f64,
    /// Upper bound on rollout steps for a single forecast request
    pub max_steps: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            window: 60,
            hidden_sizes: vec![50, 50],
            epochs: 200,
            batch_size: 16,
            learning_rate: 0.001,
            clip_norm: 1.0,
            seed: 42,
            test_split: 0.2,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl ModelSettings {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            clip_norm: self.clip_norm,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub artifacts_dir: String,
    /// SQLite URL for the training-run registry; `None` disables it
    pub database_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            artifacts_dir: "models".to_string(),
            database_url: Some("sqlite:data/training_runs.db".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.model.window, 60);
        assert_eq!(settings.model.hidden_sizes, vec![50, 50]);
        assert_eq!(settings.model.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(settings.server.allowed_origins, vec!["http://localhost:3000"]);
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut settings = Settings::default();
        settings.model.window = 0;
        settings.model.test_split = 1.0;
        settings.model.hidden_sizes = vec![50, 0];
        settings.model.max_steps = 0;
        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.starts_with("model.max_steps")));
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let path = std::env::temp_dir().join(format!("forecast-settings-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[model]\nwindow = 30\nepochs = 5\n\n[storage]\nartifacts_dir = \"/tmp/artifacts\"\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.model.window, 30);
        assert_eq!(settings.model.epochs, 5);
        assert_eq!(settings.model.batch_size, 16);
        assert_eq!(settings.storage.artifacts_dir, "/tmp/artifacts");
        assert_eq!(settings.server.port, 8000);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = Settings::load("/nonexistent/forecast.toml").unwrap();
        assert_eq!(settings.data.base_url, "https://query1.finance.yahoo.com");
    }
}
