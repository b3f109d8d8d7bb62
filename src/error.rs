use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GriddleError {
    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Index not found: {0}")]
    IndexMissing(String),

    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    #[error("Alias swap conflict on {alias}: expected {expected}, currently bound to {actual}")]
    AliasSwapConflict {
        alias: String,
        expected: String,
        actual: String,
    },

    #[error("Migration already in progress for {0}")]
    MigrationInProgress(String),

    #[error("Migration not found: {0}")]
    MigrationNotFound(String),

    #[error("Source write failed on {index}: {reason}")]
    SourceWriteFailure { index: String, reason: String },

    #[error("Dual-write to target {index} failed: {reason}")]
    DualWriteTargetFailure { index: String, reason: String },

    #[error("Snapshot copy failed after {attempts} attempts: {reason}")]
    CopyPassFailure { attempts: u32, reason: String },

    #[error("Invalid index definition: {0}")]
    InvalidDefinition(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, GriddleError>;

impl GriddleError {
    /// Transient failures that a retry loop may attempt again. Structural
    /// errors (missing index, swap conflict, already-exists) never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GriddleError::Transport(_))
    }
}

impl From<serde_json::Error> for GriddleError {
    fn from(e: serde_json::Error) -> Self {
        GriddleError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for GriddleError {
    fn from(e: reqwest::Error) -> Self {
        GriddleError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_retryable() {
        assert!(GriddleError::Transport("connection reset".into()).is_retryable());
    }

    #[test]
    fn structural_errors_are_not_retryable() {
        assert!(!GriddleError::IndexAlreadyExists("products_2".into()).is_retryable());
        assert!(!GriddleError::IndexMissing("products_1".into()).is_retryable());
        assert!(!GriddleError::AliasNotFound("products".into()).is_retryable());
        assert!(!GriddleError::AliasSwapConflict {
            alias: "products".into(),
            expected: "products_1".into(),
            actual: "products_3".into(),
        }
        .is_retryable());
    }

    #[test]
    fn write_failures_are_not_retryable() {
        // Retries happen inside the guard/copier before these surface.
        assert!(!GriddleError::SourceWriteFailure {
            index: "products_1".into(),
            reason: "timeout".into(),
        }
        .is_retryable());
        assert!(!GriddleError::DualWriteTargetFailure {
            index: "products_2".into(),
            reason: "timeout".into(),
        }
        .is_retryable());
        assert!(!GriddleError::CopyPassFailure {
            attempts: 3,
            reason: "bulk rejected".into(),
        }
        .is_retryable());
    }

    #[test]
    fn swap_conflict_display_names_all_three_indices() {
        let e = GriddleError::AliasSwapConflict {
            alias: "products".into(),
            expected: "products_1".into(),
            actual: "products_3".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("products"));
        assert!(msg.contains("products_1"));
        assert!(msg.contains("products_3"));
    }

    #[test]
    fn from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let err: GriddleError = json_err.into();
        assert!(matches!(err, GriddleError::Json(_)));
    }

    #[test]
    fn display_includes_index_name() {
        let e = GriddleError::IndexMissing("products_1".into());
        assert!(e.to_string().contains("products_1"));
    }
}
