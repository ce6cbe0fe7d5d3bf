use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole command. Per-unit failures never surface here;
/// they are recorded as [`FailureReason`](crate::state_machine::FailureReason)s.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("API key not set. Run `batchctl configure --set-key <KEY>` or set OPENAI_API_KEY.")]
    MissingApiKey,

    #[error("Output directory {} is not writable: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = BatchError::Config("max_concurrent_jobs must be at least 1".into());
        assert_eq!(
            err.to_string(),
            "Config error: max_concurrent_jobs must be at least 1"
        );
    }

    #[test]
    fn output_dir_error_names_path() {
        let err = BatchError::OutputDir {
            path: PathBuf::from("/readonly/results"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "Output directory /readonly/results is not writable: denied"
        );
    }
}
