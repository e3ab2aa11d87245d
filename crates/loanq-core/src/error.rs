use thiserror::Error;

/// Top-level error type shared by the loanq crates.
///
/// Pipeline-specific failures (translation, execution) live in `loanq-chat`;
/// this type covers configuration, record loading and serialization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CoreError {
    fn from(err: toml::ser::Error) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for loanq operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let err: CoreError = toml_err.into();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
