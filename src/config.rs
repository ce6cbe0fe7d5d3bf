//! batchctl configuration loaded from `batchctl.toml`.
//!
//! [`Settings`] holds everything persisted between runs; values missing from
//! the file fall back to defaults. `OPENAI_API_KEY` and `OPENAI_BASE_URL`
//! take precedence over the file. [`RunSettings`] is the validated subset the
//! orchestrator consumes for a single run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;
use crate::openai::client::API_URL;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "BATCHCTL_CONFIG";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
const DEFAULT_CONFIG_FILE: &str = "batchctl.toml";

/// Persisted settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Bearer token for the Batch API. Never inspected beyond "is it set".
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound on units in flight at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Initial seconds between status checks.
    #[serde(default = "default_check_interval")]
    pub check_interval: f64,

    /// Endpoint every request in an input file targets.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_completion_window")]
    pub completion_window: String,

    /// Extension (without dot) of accepted input files.
    #[serde(default = "default_input_extension")]
    pub input_extension: String,
}

fn default_base_url() -> String {
    API_URL.to_string()
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_check_interval() -> f64 {
    5.0
}

fn default_endpoint() -> String {
    "/v1/chat/completions".to_string()
}

fn default_completion_window() -> String {
    "24h".to_string()
}

fn default_input_extension() -> String {
    "jsonl".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            check_interval: default_check_interval(),
            endpoint: default_endpoint(),
            completion_window: default_completion_window(),
            input_extension: default_input_extension(),
        }
    }
}

impl Settings {
    /// Config file location: `$BATCHCTL_CONFIG` or `batchctl.toml` in the working directory.
    pub fn path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load from [`Settings::path`] and apply environment overrides.
    pub fn load() -> Result<Self, BatchError> {
        Ok(Self::load_from(&Self::path())?.with_env_overrides())
    }

    /// Load from `path` only. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, BatchError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), BatchError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `OPENAI_API_KEY` and `OPENAI_BASE_URL` over the file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(API_KEY_ENV).ok(),
            std::env::var(BASE_URL_ENV).ok(),
        )
    }

    /// Replace the key and base URL with any non-empty override.
    pub fn with_overrides(mut self, api_key: Option<String>, base_url: Option<String>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.api_key = key;
        }
        if let Some(url) = base_url.filter(|u| !u.is_empty()) {
            self.base_url = url;
        }
        self
    }

    pub fn require_api_key(&self) -> Result<&str, BatchError> {
        if self.api_key.trim().is_empty() {
            return Err(BatchError::MissingApiKey);
        }
        Ok(&self.api_key)
    }

    /// `sk-a...wxyz` style rendering for display.
    pub fn masked_api_key(&self) -> String {
        let key = self.api_key.as_str();
        match key.chars().count() {
            0 => "Not set".to_string(),
            n if n <= 8 => "*".repeat(n),
            n => {
                let head: String = key.chars().take(4).collect();
                let tail: String = key.chars().skip(n - 4).collect();
                format!("{head}...{tail}")
            }
        }
    }
}

/// Validated configuration for one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub max_concurrent_jobs: usize,
    pub check_interval: Duration,
    pub output_dir: PathBuf,
}

impl RunSettings {
    pub fn new(
        max_concurrent_jobs: usize,
        check_interval_secs: f64,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, BatchError> {
        if max_concurrent_jobs == 0 {
            return Err(BatchError::Config(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        let check_interval = Duration::try_from_secs_f64(check_interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| {
                BatchError::Config(format!(
                    "check_interval must be a positive number of seconds, got {check_interval_secs}"
                ))
            })?;
        Ok(Self {
            max_concurrent_jobs,
            check_interval,
            output_dir: output_dir.into(),
        })
    }

    /// Create the output directory if needed and prove it accepts writes.
    pub fn prepare_output_dir(&self) -> Result<(), BatchError> {
        let dir = &self.output_dir;
        let to_err = |source| BatchError::OutputDir {
            path: dir.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(to_err)?;
        let probe = dir.join(".batchctl-write-probe");
        fs::write(&probe, b"").map_err(to_err)?;
        fs::remove_file(&probe).map_err(to_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_settings_values() {
        let settings = Settings::default();
        assert_eq!(settings.max_concurrent_jobs, 5);
        assert_eq!(settings.check_interval, 5.0);
        assert_eq!(settings.base_url, "https://api.openai.com/v1");
        assert_eq!(settings.endpoint, "/v1/chat/completions");
        assert_eq!(settings.completion_window, "24h");
        assert_eq!(settings.input_extension, "jsonl");
        assert!(settings.api_key.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "sk-test-123"
            max_concurrent_jobs = 2
        "#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.api_key, "sk-test-123");
        assert_eq!(settings.max_concurrent_jobs, 2);
        assert_eq!(settings.check_interval, 5.0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("batchctl.toml");
        let settings = Settings {
            api_key: "sk-saved".into(),
            check_interval: 2.5,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("batchctl.toml");
        fs::write(&path, "max_concurrent_jobs = \"many\"").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(BatchError::Toml(_))
        ));
    }

    #[test]
    fn api_key_required_and_masked() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.require_api_key(),
            Err(BatchError::MissingApiKey)
        ));
        assert_eq!(settings.masked_api_key(), "Not set");

        settings.api_key = "sk-abcdefghijwxyz".into();
        assert_eq!(settings.require_api_key().unwrap(), "sk-abcdefghijwxyz");
        assert_eq!(settings.masked_api_key(), "sk-a...wxyz");

        settings.api_key = "short".into();
        assert_eq!(settings.masked_api_key(), "*****");
    }

    #[test]
    fn overrides_replace_only_non_empty_values() {
        let file = Settings {
            api_key: "sk-from-file".into(),
            ..Settings::default()
        };

        let unchanged = file.clone().with_overrides(Some(String::new()), None);
        assert_eq!(unchanged, file);

        let overridden = file
            .clone()
            .with_overrides(Some("sk-from-env".into()), Some("http://proxy:8080".into()));
        assert_eq!(overridden.api_key, "sk-from-env");
        assert_eq!(overridden.base_url, "http://proxy:8080");
        assert_eq!(overridden.max_concurrent_jobs, file.max_concurrent_jobs);
    }

    #[test]
    fn run_settings_reject_bad_values() {
        assert!(matches!(
            RunSettings::new(0, 5.0, "out"),
            Err(BatchError::Config(_))
        ));
        assert!(matches!(
            RunSettings::new(1, 0.0, "out"),
            Err(BatchError::Config(_))
        ));
        assert!(matches!(
            RunSettings::new(1, f64::NAN, "out"),
            Err(BatchError::Config(_))
        ));
        assert!(matches!(
            RunSettings::new(1, -2.0, "out"),
            Err(BatchError::Config(_))
        ));
        // Too large for a Duration.
        assert!(matches!(
            RunSettings::new(1, 1e300, "out"),
            Err(BatchError::Config(_))
        ));
        // Rounds down to zero nanoseconds, which would spin the poll loop.
        assert!(matches!(
            RunSettings::new(1, 1e-12, "out"),
            Err(BatchError::Config(_))
        ));
        let tiny = RunSettings::new(1, 1e-9, "out").unwrap();
        assert_eq!(tiny.check_interval, Duration::from_nanos(1));
        let ok = RunSettings::new(3, 1.5, "out").unwrap();
        assert_eq!(ok.check_interval, Duration::from_millis(1500));
    }

    #[test]
    fn prepare_output_dir_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("results");
        let run = RunSettings::new(1, 1.0, &out).unwrap();
        run.prepare_output_dir().unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn prepare_output_dir_fails_on_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();
        let run = RunSettings::new(1, 1.0, &file).unwrap();
        assert!(matches!(
            run.prepare_output_dir(),
            Err(BatchError::OutputDir { .. })
        ));
    }
}
