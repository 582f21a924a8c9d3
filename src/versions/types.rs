//! Version history types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{RetentionMode, VersioningConfig};
use crate::local::{Operation, Source};
use crate::model::Scope;

/// One immutable entry in a variable's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Variable name.
    pub key: String,
    /// Scope of the variable.
    pub scope: Scope,
    /// Environment of the variable.
    pub environment: String,
    /// Version number, starting at 1.
    pub version: u64,
    /// Stored (encrypted) value; empty for delete tombstones.
    pub value: String,
    /// Whether the value was a secret.
    #[serde(default)]
    pub sensitive: bool,
    /// What produced this version.
    pub operation: Operation,
    /// Who produced it.
    pub actor: String,
    /// Surface it came through.
    pub source: Source,
    /// When it was produced.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hex of `value`.
    pub checksum: String,
    /// Fingerprint of the key that encrypted `value`; absent on tombstones
    /// and on histories written before fingerprints were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
}

/// How many versions to keep per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Which limits apply.
    pub mode: RetentionMode,
    /// Count limit.
    pub max_versions: usize,
    /// Age limit in days.
    pub retention_days: u32,
}

/// Returns the SHA-256 hex digest of a stored value.
#[must_use]
pub fn checksum(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

impl VersionRecord {
    /// Returns true if this version records a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.operation == Operation::Delete
    }

    /// Returns true if the checksum matches the stored value.
    #[must_use]
    pub fn verify(&self) -> bool {
        checksum(&self.value) == self.checksum
    }
}

impl From<&VersioningConfig> for RetentionPolicy {
    fn from(config: &VersioningConfig) -> Self {
        Self {
            mode: config.retention_mode,
            max_versions: config.max_versions,
            retention_days: config.retention_days,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&VersioningConfig::default())
    }
}
