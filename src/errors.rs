use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("CAPABILITY_UNAVAILABLE: {0}")]
    CapabilityUnavailable(String),
    #[error("PERMISSION_DENIED: {0}")]
    PermissionDenied(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("CORRUPT: {0}")]
    Corrupt(String),
    #[error("VALIDATION_FAILED: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("STATE: {0}")]
    State(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapabilityUnavailable(_) => "CAPABILITY_UNAVAILABLE",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Corrupt(_) => "CORRUPT",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::State(_) => "STATE",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn no_current_project() -> Self {
        Self::State("no project is currently open".to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(value.to_string()),
            std::io::ErrorKind::NotFound => Self::NotFound(value.to_string()),
            _ => Self::Io(value.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Corrupt(value.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_kind() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(StoreError::from(denied), StoreError::PermissionDenied(_)));

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(StoreError::from(missing), StoreError::NotFound(_)));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error = StoreError::from(other);
        assert_eq!(error.code(), "IO_FAILURE");
        assert!(error.to_string().contains("disk full"));
    }

    #[test]
    fn validation_messages_are_listed_verbatim() {
        let error = StoreError::Validation(vec![
            "missing required field: id".to_string(),
            "missing required field: name".to_string(),
        ]);
        assert_eq!(
            error.to_string(),
            "VALIDATION_FAILED: missing required field: id; missing required field: name"
        );
    }
}
