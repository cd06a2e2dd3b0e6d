// Error types for settings loading

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    NotFound(String),

    #[error("Failed to load settings: {0}")]
    LoadError(String),

    #[error("Failed to parse settings: {0}")]
    ParseError(String),

    #[error("Invalid override {key}: {message}")]
    OverrideError { key: String, message: String },

    #[error("Invalid settings: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for ravyn_core::Error {
    fn from(error: ConfigError) -> Self {
        ravyn_core::Error::ImproperlyConfigured(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_improperly_configured() {
        let err: ravyn_core::Error = ConfigError::NotFound("settings.toml".to_string()).into();
        assert!(matches!(err, ravyn_core::Error::ImproperlyConfigured(ref msg) if msg.contains("settings.toml")));
    }
}
