//! Error types for project loading, resolution and provider calls.

use thiserror::Error;

/// Errors raised by a provider adapter.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Only `AlreadyExists` means the desired state is present. A `Conflict`
    /// is a real failure.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),

    #[error("reference not defined: {0}")]
    UndefinedRef(String),

    #[error("no valid target found")]
    NoValidTarget,

    #[error("unsupported dynamic target type: {0}")]
    UnsupportedDynamicType(String),

    #[error("{kind} '{name}' is missing required field '{field}'")]
    MissingField {
        kind: &'static str,
        name: String,
        field: &'static str,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("hook failed: {0}")]
    Hook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_validation_lists_every_problem() {
        let e = Error::Validation(vec!["a".into(), "b".into()]);
        let msg = e.to_string();
        assert!(msg.contains("- a"));
        assert!(msg.contains("- b"));
    }

    #[test]
    fn test_error_provider_is_transparent() {
        let e: Error = ProviderError::NotFound("bucket x".into()).into();
        assert_eq!(e.to_string(), "Resource not found: bucket x");
    }

    #[test]
    fn test_error_provider_classification() {
        assert!(!ProviderError::Conflict("x".into()).is_already_exists());
        assert!(ProviderError::AlreadyExists("x".into()).is_already_exists());
        assert!(!ProviderError::NotFound("x".into()).is_already_exists());
        assert!(ProviderError::NotFound("x".into()).is_not_found());
    }

    #[test]
    fn test_error_missing_field_message() {
        let e = Error::MissingField {
            kind: "function",
            name: "api".into(),
            field: "handler",
        };
        assert_eq!(
            e.to_string(),
            "function 'api' is missing required field 'handler'"
        );
    }
}
