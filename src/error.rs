//! Error types for the stage reconciliation engine.
//!
//! This module provides the error hierarchy for every step of a
//! reconciliation pass: configuration loading, schema validation, remote
//! calls, convergence verification, identity state, and orchestration.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::planner::{AttributeChange, PlanAction};
use crate::remote::StageIdentity;

/// The main error type for the stage reconciliation engine.
#[derive(Debug, Error)]
pub enum StageError {
    /// Configuration loading errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema validation failed (all violations are collected).
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Remote backend errors, propagated unchanged.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Post-apply state still differs from the desired state.
    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    /// Identity state errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Orchestration errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Environment variable referenced by the manifest is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path the error is reported on.
    pub field: String,
    /// Other field paths involved in the violated rule.
    pub conflicts_with: Vec<String>,
    /// Human-readable message.
    pub message: String,
}

/// All schema violations found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

/// Remote backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The stage does not exist remotely.
    #[error("Stage not found: {name}")]
    NotFound {
        /// Qualified name that was looked up.
        name: String,
    },

    /// A stage with the same name already exists.
    #[error("Stage already exists: {name}")]
    AlreadyExists {
        /// Qualified name of the conflicting stage.
        name: String,
    },

    /// The backend rejected the operation.
    #[error("{operation} rejected by backend: {message}")]
    Rejected {
        /// Operation that was rejected (create, alter, drop, describe).
        operation: String,
        /// Backend message.
        message: String,
    },

    /// The backend could not be reached or timed out.
    #[error("Backend unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The backend returned a payload the normalizer could not decode.
    #[error("Invalid describe payload for {name}: {message}")]
    InvalidPayload {
        /// Stage whose payload is invalid.
        name: String,
        /// Description of the decoding problem.
        message: String,
    },
}

/// The remote state after applying still differs from the desired state.
#[derive(Debug, Error)]
#[error("Stage {stage} did not converge: {} attribute(s) still differ ({})", .remaining.len(), summarize(.remaining))]
pub struct ConvergenceError {
    /// Qualified name of the stage.
    pub stage: String,
    /// Changes still reported after verification.
    pub remaining: Vec<AttributeChange>,
}

/// Identity state errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The stage recorded in the previous identity no longer exists.
    #[error("Drift detected for {stage}: resource deleted externally (object {object_id})")]
    DeletedExternally {
        /// Qualified name recorded in the previous identity.
        stage: String,
        /// Object id recorded in the previous identity.
        object_id: String,
    },

    /// A plan stopped after some of its operations reached the remote.
    ///
    /// The remote state is whatever those operations left behind; the next
    /// planning pass must start from `identity`, not from the identity the
    /// plan was computed against.
    #[error("Plan for {stage} stopped after {completed} of {total} operation(s): {source}")]
    PartiallyApplied {
        /// Qualified name of the stage.
        stage: String,
        /// Action of the interrupted plan.
        action: PlanAction,
        /// Operations that succeeded.
        completed: usize,
        /// Operations in the plan.
        total: usize,
        /// Identity after the applied operations, `None` if the stage was dropped.
        identity: Option<StageIdentity>,
        /// Objects the plan still had to drop.
        pending_drops: Vec<StageIdentity>,
        /// Error of the failed operation.
        source: Box<StageError>,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, StageError>;

/// Result type alias for [`RemoteObjectStore`](crate::remote::RemoteObjectStore) calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

fn summarize(changes: &[AttributeChange]) -> String {
    changes
        .iter()
        .map(|c| c.path.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StageError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the caller may retry the whole pass.
    ///
    /// The engine itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(RemoteError::Unavailable { .. })
            | Self::State(StateError::LockFailed { .. }) => true,
            Self::Reconcile(ReconcileError::PartiallyApplied { source, .. }) => {
                source.is_retryable()
            }
            _ => false,
        }
    }

    /// Returns true if this error reports out-of-band deletion.
    #[must_use]
    pub const fn is_drift(&self) -> bool {
        matches!(self, Self::Reconcile(ReconcileError::DeletedExternally { .. }))
    }
}

impl ValidationError {
    /// Creates an error on a single field.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            conflicts_with: Vec::new(),
            message: message.into(),
        }
    }

    /// Creates an error on `field` that conflicts with the given paths.
    #[must_use]
    pub fn conflict(field: impl Into<String>, others: &[&str], message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            conflicts_with: others.iter().map(|s| (*s).to_string()).collect(),
            message: message.into(),
        }
    }

    /// Returns a copy whose paths are prefixed (e.g. `stages[0]`).
    #[must_use]
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self {
            field: format!("{prefix}.{}", self.field),
            conflicts_with: self
                .conflicts_with
                .iter()
                .map(|c| format!("{prefix}.{c}"))
                .collect(),
            message: self.message.clone(),
        }
    }

    /// Returns every path named by this error.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.field.as_str()).chain(self.conflicts_with.iter().map(String::as_str))
    }
}

impl ValidationErrors {
    /// Returns true if no violation was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the violations.
    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    /// Returns true if any violation is reported on `field`.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)?;
        if !self.conflicts_with.is_empty() {
            write!(f, " (conflicts with {})", self.conflicts_with.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl RemoteError {
    /// Creates a rejection error for an operation.
    #[must_use]
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(name: impl fmt::Display) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    /// Returns true for [`RemoteError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_names_conflicts() {
        let err = ValidationError::conflict(
            "storage.storage_integration",
            &["storage.credentials"],
            "only one credential method may be set",
        );
        let text = err.to_string();
        assert!(text.contains("storage.storage_integration"));
        assert!(text.contains("conflicts with storage.credentials"));
    }

    #[test]
    fn test_prefixed_rewrites_every_path() {
        let err = ValidationError::conflict("a", &["b", "c"], "m").prefixed("stages[2]");
        let paths: Vec<&str> = err.paths().collect();
        assert_eq!(paths, vec!["stages[2].a", "stages[2].b", "stages[2].c"]);
    }

    #[test]
    fn test_retryable_errors() {
        let unavailable = StageError::Remote(RemoteError::Unavailable {
            message: String::from("timeout"),
        });
        assert!(unavailable.is_retryable());

        let rejected = StageError::Remote(RemoteError::rejected("alter", "bad"));
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_partially_applied_keeps_source_retryability() {
        let err = StageError::Reconcile(ReconcileError::PartiallyApplied {
            stage: String::from("DB.SC.ST"),
            action: PlanAction::Replace,
            completed: 1,
            total: 2,
            identity: None,
            pending_drops: Vec::new(),
            source: Box::new(StageError::Remote(RemoteError::Unavailable {
                message: String::from("connection reset"),
            })),
        });
        assert!(err.is_retryable());
        assert!(err.to_string().contains("1 of 2"));
    }

    #[test]
    fn test_deleted_externally_is_drift() {
        let err = StageError::Reconcile(ReconcileError::DeletedExternally {
            stage: String::from("DB.SC.ST"),
            object_id: String::from("abc"),
        });
        assert!(err.is_drift());
        assert!(err.to_string().contains("deleted externally"));
    }
}
