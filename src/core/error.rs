use thiserror::Error;

use crate::model::{Label, PolicyId, ResourceKey, SubjectId};
use crate::storage::StorageError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VaultError {
    #[error("Policy '{0}' not found")]
    PolicyNotFound(PolicyId),

    #[error("Entry '{label}' not found in policy '{id}'")]
    EntryNotFound { id: PolicyId, label: Label },

    #[error("Subject '{subject_id}' not found in entry '{label}' of policy '{id}'")]
    SubjectNotFound {
        id: PolicyId,
        label: Label,
        subject_id: SubjectId,
    },

    #[error("Resource '{resource_key}' not found in entry '{label}' of policy '{id}'")]
    ResourceNotFound {
        id: PolicyId,
        label: Label,
        resource_key: ResourceKey,
    },

    #[error("Policy '{0}' already exists")]
    PolicyConflict(PolicyId),

    #[error("Policy is invalid: {0}")]
    PolicyInvalid(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Policy size of {actual} bytes exceeds the maximum of {max} bytes")]
    PolicyTooLarge { actual: usize, max: usize },

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Recovery of policy '{id}' failed: {reason}")]
    RecoveryFailed { id: PolicyId, reason: String },

    #[error("Worker for policy '{0}' stopped before replying")]
    WorkerClosed(PolicyId),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Coarse classification so protocol adapters can map errors to status
/// codes without matching on variants or messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    PreconditionFailed,
    TooLarge,
    Unavailable,
    Internal,
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::PolicyNotFound(_)
            | VaultError::EntryNotFound { .. }
            | VaultError::SubjectNotFound { .. }
            | VaultError::ResourceNotFound { .. } => ErrorKind::NotFound,
            VaultError::PolicyConflict(_) => ErrorKind::Conflict,
            VaultError::PolicyInvalid(_) | VaultError::InvalidId(_) | VaultError::Config(_) => {
                ErrorKind::Invalid
            }
            VaultError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            VaultError::PolicyTooLarge { .. } => ErrorKind::TooLarge,
            VaultError::Storage(err) if err.is_transient() => ErrorKind::Unavailable,
            VaultError::Storage(_) => ErrorKind::Internal,
            VaultError::RecoveryFailed { .. } => ErrorKind::Internal,
            VaultError::WorkerClosed(_) => ErrorKind::Unavailable,
        }
    }
}
