use thiserror::Error;

/// Top-level error type for the Abode service tier.
///
/// Subsystem crates define their own error types and implement
/// `From<AbodeError>` so that storage and configuration failures flow
/// through `?` across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AbodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Listing store error: {0}")]
    ListingStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for AbodeError {
    fn from(err: toml::de::Error) -> Self {
        AbodeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AbodeError {
    fn from(err: toml::ser::Error) -> Self {
        AbodeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AbodeError {
    fn from(err: serde_json::Error) -> Self {
        AbodeError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Abode operations.
pub type Result<T> = std::result::Result<T, AbodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AbodeError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(AbodeError, &str)> = vec![
            (
                AbodeError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                AbodeError::ListingStore("no such table".to_string()),
                "Listing store error: no such table",
            ),
            (
                AbodeError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AbodeError = io_err.into();
        assert!(matches!(err, AbodeError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let abode_err: AbodeError = err.unwrap_err().into();
        assert!(matches!(abode_err, AbodeError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let abode_err: AbodeError = err.unwrap_err().into();
        assert!(matches!(abode_err, AbodeError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
