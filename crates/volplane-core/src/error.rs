// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

use crate::pool::StoragePool;

/// Typed failure shared by every driver and the registry
#[derive(Error, Debug, Diagnostic)]
pub enum VolumeError {
    /// Entity not found
    #[error("{kind} with ID: {id} not found")]
    #[diagnostic(
        code(volplane::not_found),
        help("Verify the ID is correct. Use enumerate to list the volumes a driver owns")
    )]
    NotFound { id: String, kind: String },

    /// Entity already exists
    #[error("{kind} with ID: {id} already exists")]
    #[diagnostic(
        code(volplane::already_exists),
        help("Pick a different name, or delete the existing entity first")
    )]
    AlreadyExists { id: String, kind: String },

    /// Capability not implemented by this backend
    #[error("Not Supported")]
    #[diagnostic(
        code(volplane::not_supported),
        help("This driver does not implement the requested capability")
    )]
    NotSupported,

    /// A conflicting resize is already running against a pool
    #[error("{}", .pool.resize_conflict_message())]
    #[diagnostic(
        code(volplane::resize_in_progress),
        help("Wait for the current resize to finish before starting another one")
    )]
    ResizeInProgress { pool: Box<StoragePool> },

    /// Underlying store, OS or network failure
    #[error("I/O failure: {message}")]
    #[diagnostic(
        code(volplane::io_failure),
        help("The operation was aborted and the volume record left unchanged. Retrying is safe for delete, not for create")
    )]
    IoFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Deadline expired while waiting on external I/O
    #[error("Operation '{operation}' timed out after {after:?}")]
    #[diagnostic(
        code(volplane::timeout),
        help("The volume record is either unchanged or fully updated. Inspect the volume before retrying")
    )]
    Timeout { operation: String, after: Duration },

    /// Lifecycle state machine violation
    #[error("Invalid state transition for volume '{id}': cannot go from {from} to {to}")]
    #[diagnostic(
        code(volplane::invalid_state_transition),
        help("Inspect the volume to see its current state, then issue the missing step first (e.g. unmount before delete)")
    )]
    InvalidStateTransition { id: String, from: String, to: String },

    /// Bad argument to an operation
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(volplane::invalid_argument))]
    InvalidArgument { message: String },

    /// Missing or invalid driver configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(volplane::invalid_config), help("{suggestion}"))]
    InvalidConfig { message: String, suggestion: String },

    /// Driver is shutting down
    #[error("Driver '{driver}' is shutting down")]
    #[diagnostic(
        code(volplane::shutting_down),
        help("The driver no longer accepts operations. Resolve it again from the registry after restart")
    )]
    ShuttingDown { driver: String },
}

/// Result type alias for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;

impl VolumeError {
    /// Create a NotFound error
    pub fn not_found(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::NotFound {
            id: id.into(),
            kind: kind.into(),
        }
    }

    /// Create a NotFound error for a volume
    pub fn volume_not_found(id: impl Into<String>) -> Self {
        Self::not_found(id, "volume")
    }

    /// Create an AlreadyExists error
    pub fn already_exists(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::AlreadyExists {
            id: id.into(),
            kind: kind.into(),
        }
    }

    /// Create a ResizeInProgress error
    pub fn resize_in_progress(pool: StoragePool) -> Self {
        Self::ResizeInProgress {
            pool: Box::new(pool),
        }
    }

    /// Create an IoFailure
    pub fn io_failure(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::IoFailure {
            message: message.into(),
            source,
        }
    }

    /// Create a Timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an InvalidStateTransition error
    pub fn invalid_state_transition(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            id: id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a ShuttingDown error
    pub fn shutting_down(driver: impl Into<String>) -> Self {
        Self::ShuttingDown {
            driver: driver.into(),
        }
    }

    /// Whether this error means the entity is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for VolumeError {
    fn from(err: std::io::Error) -> Self {
        VolumeError::io_failure(format!("I/O error: {}", err), Some(Box::new(err)))
    }
}
