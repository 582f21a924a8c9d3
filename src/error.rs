//! Error types for the Vaulter sync core.
//!
//! This module provides the error hierarchy for every stage of a variable's
//! life: configuration, validation, governance, key resolution, encryption,
//! local state, backend I/O, planning and apply.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Vaulter.
#[derive(Debug, Error)]
pub enum VaulterError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed scope, key or request.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A write refused by policy.
    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    /// Key material could not be resolved or used.
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Local and remote values disagree under `sync.conflict = error`.
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Storage backend failure.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A stored value could not be decrypted.
    #[error("Decryption error: {0}")]
    Decryption(#[from] DecryptionError),

    /// Local state file errors.
    #[error("Local state error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment is not declared in the configuration.
    #[error("Unknown environment: {name}")]
    UnknownEnvironment {
        /// The undeclared environment.
        name: String,
    },
}

/// Malformed input errors. Never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Variable key does not match `[A-Za-z0-9_]+`.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Scope string could not be parsed.
    #[error("Invalid scope '{raw}': expected 'shared', 'service:<name>' or a service name")]
    InvalidScope {
        /// The rejected input.
        raw: String,
    },

    /// Environment name is not usable as a path segment.
    #[error("Invalid environment name '{name}'")]
    InvalidEnvironment {
        /// The rejected name.
        name: String,
    },

    /// Assignment string could not be parsed.
    #[error("Invalid assignment '{raw}': expected KEY=value or KEY::value")]
    InvalidAssignment {
        /// The rejected input.
        raw: String,
    },

    /// Requested version does not exist.
    #[error("Version {version} not found for {identity}")]
    VersionNotFound {
        /// Identity the version was looked up for.
        identity: String,
        /// Requested version.
        version: u64,
    },

    /// Rollback targeted a delete tombstone.
    #[error("Version {version} of {identity} is a delete tombstone and cannot be restored")]
    TombstoneRollback {
        /// Identity the rollback targeted.
        identity: String,
        /// Tombstone version.
        version: u64,
    },
}

/// Policy refusals. Never auto-retried.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// The write was blocked by policy.
    #[error("Write of {key} blocked: {reason}")]
    Blocked {
        /// Key that was blocked.
        key: String,
        /// Reason for the block.
        reason: String,
        /// Actionable suggestions.
        suggestions: Vec<String>,
    },
}

/// Key resolution errors. Fatal whenever encryption or decryption is needed.
#[derive(Debug, Error)]
pub enum KeyError {
    /// No key material for the environment.
    #[error("No encryption key found for {project}/{environment}")]
    NotFound {
        /// Project name.
        project: String,
        /// Environment name.
        environment: String,
    },

    /// Asymmetric decryption requested without a private key.
    #[error("Private key required to decrypt values of {project}/{environment}")]
    PrivateKeyMissing {
        /// Project name.
        project: String,
        /// Environment name.
        environment: String,
    },

    /// Key material is present but unusable.
    #[error("Invalid key material from {source_name}: {message}")]
    Invalid {
        /// Where the material came from.
        source_name: String,
        /// Description of the problem.
        message: String,
    },

    /// Encryption failed with resolved material.
    #[error("Encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// A version was encrypted with a key that is no longer available.
    #[error("Key {fingerprint} of environment '{environment}' is not current and has no backup")]
    RetiredKeyMissing {
        /// Environment the key belonged to.
        environment: String,
        /// Fingerprint recorded with the version.
        fingerprint: String,
    },

    /// Key file could not be read or written.
    #[error("Key file error at {path}: {message}")]
    FileError {
        /// Path to the key file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Conflicting values found while planning.
#[derive(Debug, Error)]
#[error("Conflicting values for {}: local and remote differ", .keys.join(", "))]
pub struct ConflictError {
    /// Every offending key, in `scope/key` form.
    pub keys: Vec<String>,
}

/// Backend errors. Retryable unless the stored data itself is corrupt.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Filesystem backend failure.
    #[error("Storage I/O failed: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// S3 backend failure.
    #[error("S3 backend error: {message}")]
    S3 {
        /// Description of the failure.
        message: String,
    },

    /// The backend could not be reached.
    #[error("Backend unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// A backend call exceeded its deadline.
    #[error("Backend call '{operation}' timed out after {timeout_secs}s")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Deadline in seconds.
        timeout_secs: u64,
    },

    /// A stored record could not be decoded.
    #[error("Corrupted record {key}: {message}")]
    Corrupted {
        /// Record key.
        key: String,
        /// Description of the corruption.
        message: String,
    },
}

/// Decryption failures. Fatal for one key, never for a whole batch.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// Ciphertext is not in a recognised envelope format.
    #[error("Unrecognised envelope format")]
    UnknownFormat,

    /// Envelope was produced by a different encryption mode.
    #[error("Envelope uses {found} but the resolved key is {expected}")]
    ModeMismatch {
        /// Mode of the resolved key.
        expected: String,
        /// Mode found in the envelope.
        found: String,
    },

    /// Wrong key or tampered payload.
    #[error("Authentication failed: wrong key or corrupted ciphertext")]
    AuthenticationFailed,

    /// Payload decoding failed.
    #[error("Malformed payload: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },
}

/// Local state store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// A local state file could not be read or parsed.
    #[error("Failed to read {path}: {message}")]
    ReadFailed {
        /// Path to the file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A local state file could not be written.
    #[error("Failed to write {path}: {message}")]
    WriteFailed {
        /// Path to the file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The provenance log is corrupted.
    #[error("Provenance log corrupted at line {line}: {message}")]
    ProvenanceCorrupted {
        /// One-based line number.
        line: usize,
        /// Description of the corruption.
        message: String,
    },
}

/// Result type alias for Vaulter operations.
pub type Result<T> = std::result::Result<T, VaulterError>;

impl VaulterError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(
                BackendError::Storage { .. }
                    | BackendError::S3 { .. }
                    | BackendError::Unavailable { .. }
                    | BackendError::Timeout { .. }
            )
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Backend(BackendError::Timeout { .. }) => Some(1),
            Self::Backend(BackendError::Unavailable { .. }) => Some(5),
            Self::Backend(BackendError::Storage { .. } | BackendError::S3 { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl BackendError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3 {
            message: message.into(),
        }
    }
}

impl KeyError {
    /// Creates an invalid-material error.
    #[must_use]
    pub fn invalid(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}
