//! Error types for materialization, validation and process invocation

use std::time::Duration;

use thiserror::Error;

use crate::collector::Outcome;
use crate::security::ConstructClass;

/// Engine errors
///
/// Every variant maps onto exactly one [`Outcome`]; compile failures are
/// not errors here, they are reported through the orchestration report.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error("Unsafe path '{name}': {reason}")]
    UnsafePath { name: String, reason: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),

    #[error("Main file not found: {0}")]
    MainFileNotFound(String),

    #[error("Failed to fetch asset '{name}': {reason}")]
    AssetFetch { name: String, reason: String },

    #[error("Invalid asset encoding for '{0}': {1}")]
    AssetEncoding(String, String),

    #[error("Disallowed {class} construct '{construct}' in '{file}' (line {line})")]
    SecurityViolation {
        file: String,
        class: ConstructClass,
        construct: String,
        line: usize,
    },

    #[error("{what} timed out after {}s", .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("Tool not available: {0}")]
    ToolUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The outcome a request ends with when this error stops it
    pub fn outcome(&self) -> Outcome {
        match self {
            EngineError::InvalidProject(_)
            | EngineError::UnsafePath { .. }
            | EngineError::UnsupportedExtension(_)
            | EngineError::MainFileNotFound(_)
            | EngineError::AssetFetch { .. }
            | EngineError::AssetEncoding(_, _) => Outcome::ValidationFailed,
            EngineError::SecurityViolation { .. } => Outcome::SecurityRejected,
            EngineError::Timeout { .. } => Outcome::Timeout,
            EngineError::ToolUnavailable(_) | EngineError::Config(_) | EngineError::Io(_) => {
                Outcome::InternalError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_validation() {
        let err = EngineError::UnsafePath {
            name: "../x.tex".to_string(),
            reason: "parent directory segment".to_string(),
        };
        assert_eq!(err.outcome(), Outcome::ValidationFailed);
        assert_eq!(
            EngineError::MainFileNotFound("main.tex".into()).outcome(),
            Outcome::ValidationFailed
        );
    }

    #[test]
    fn test_security_violation_message_names_file() {
        let err = EngineError::SecurityViolation {
            file: "chapters/intro.tex".to_string(),
            class: ConstructClass::ShellEscape,
            construct: "\\write18".to_string(),
            line: 4,
        };
        assert_eq!(err.outcome(), Outcome::SecurityRejected);
        let message = err.to_string();
        assert!(message.contains("chapters/intro.tex"));
        assert!(message.contains("shell-escape"));
    }

    #[test]
    fn test_io_is_internal() {
        let err: EngineError = std::io::Error::other("disk full").into();
        assert_eq!(err.outcome(), Outcome::InternalError);
    }

    #[test]
    fn test_timeout_message() {
        let err = EngineError::Timeout {
            what: "fetching figure.png".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "fetching figure.png timed out after 30s");
        assert_eq!(err.outcome(), Outcome::Timeout);
    }
}
