use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryErrorCode {
    PermissionDenied,
    Disconnected,
    WriteCanceled,
    InvalidToken,
    OperationFailed,
}

impl MemoryErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::Disconnected => "disconnected",
            Self::WriteCanceled => "write_canceled",
            Self::InvalidToken => "invalid_token",
            Self::OperationFailed => "operation_failed",
        }
    }
}

impl fmt::Display for MemoryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by [`crate::MemoryDatabase`] through listener cancellations and
/// write/auth acknowledgements.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct MemoryError {
    code: MemoryErrorCode,
    message: String,
}

impl MemoryError {
    pub fn new(code: MemoryErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorCode::PermissionDenied, message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorCode::Disconnected, message)
    }

    pub fn code(&self) -> MemoryErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = MemoryError::permission_denied("rules rejected /rooms");
        assert_eq!(err.to_string(), "permission_denied: rules rejected /rooms");
        assert_eq!(err.code(), MemoryErrorCode::PermissionDenied);
        assert_eq!(
            serde_json::to_value(MemoryErrorCode::WriteCanceled).expect("serialize"),
            serde_json::json!("write_canceled")
        );
    }
}
