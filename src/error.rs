use thiserror::Error;

/// Main error type for stowage operations
#[derive(Debug, Error)]
pub enum StowageError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Azure API error: {0}")]
    AzureApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("UUID error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl StowageError {
    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::AuthenticationError(msg.into())
    }

    pub fn azure_api<S: Into<String>>(msg: S) -> Self {
        Self::AzureApiError(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn permission_denied<S: Into<String>>(msg: S) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::NetworkError(msg.into())
    }

    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::SerializationError(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unknown<S: Into<String>>(msg: S) -> Self {
        Self::Unknown(msg.into())
    }

    /// True when the error means the container or blob does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when the error is a lease or write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type alias for stowage operations
pub type Result<T> = std::result::Result<T, StowageError>;

/// Convert Azure Core errors to StowageError
impl From<azure_core::Error> for StowageError {
    fn from(error: azure_core::Error) -> Self {
        crate::utils::network::classify_azure_error(&error, "Azure request failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_constructors() {
        assert!(StowageError::not_found("demo/report.pdf").is_not_found());
        assert!(StowageError::conflict("lease held").is_conflict());
        assert!(!StowageError::network("timeout").is_not_found());
    }

    #[test]
    fn test_display_messages() {
        let err = StowageError::invalid_argument("lease period must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid argument: lease period must be positive"
        );

        let err = StowageError::not_found("Blob 'demo/report.pdf' not found");
        assert_eq!(err.to_string(), "Not found: Blob 'demo/report.pdf' not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: StowageError = io.into();
        assert!(matches!(err, StowageError::IoError(_)));
    }
}
