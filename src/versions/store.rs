//! Version history persisted in the backend `versions` collection.
//!
//! Each identity owns one record whose value is the JSON list of its
//! versions, oldest first.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::{Backend, Collection, RecordKey, StoredRecord};
use crate::error::{BackendError, Result, ValidationError};
use crate::local::{MutationContext, Operation};
use crate::model::VariableIdentity;

use super::retention::compact;
use super::types::{RetentionPolicy, VersionRecord, checksum};

/// Append-only version history of variables.
#[derive(Debug, Clone)]
pub struct VersionStore {
    /// Backend holding the history records.
    backend: Arc<dyn Backend>,
    /// Retention applied after every append.
    policy: RetentionPolicy,
}

impl VersionStore {
    /// Creates a store over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, policy: RetentionPolicy) -> Self {
        Self { backend, policy }
    }

    /// Appends a version. The number is the previous maximum plus one,
    /// starting at 1. `key_fingerprint` names the key that encrypted `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read or written.
    pub async fn append_version(
        &self,
        identity: &VariableIdentity,
        value: &str,
        sensitive: bool,
        operation: Operation,
        key_fingerprint: Option<&str>,
        ctx: &MutationContext,
    ) -> Result<VersionRecord> {
        let mut history = self.load(identity).await?;
        let version = history.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        let record = VersionRecord {
            key: identity.key.clone(),
            scope: identity.scope.clone(),
            environment: identity.environment.clone(),
            version,
            value: value.to_string(),
            sensitive,
            operation,
            actor: ctx.actor.clone(),
            source: ctx.source,
            timestamp: Utc::now(),
            checksum: checksum(value),
            key_fingerprint: key_fingerprint.map(String::from),
        };
        history.push(record.clone());

        let kept = compact(&history, &self.policy, Utc::now());
        if kept.len() < history.len() {
            debug!(
                "Retention dropped {} versions of {identity}",
                history.len() - kept.len()
            );
        }
        self.save(identity, &kept, &ctx.actor).await?;

        debug!("Recorded version {version} of {identity} ({operation})");
        Ok(record)
    }

    /// Lists the versions of an identity, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read.
    pub async fn list_versions(&self, identity: &VariableIdentity) -> Result<Vec<VersionRecord>> {
        let mut history = self.load(identity).await?;
        history.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(history)
    }

    /// Returns one version.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::VersionNotFound` if it does not exist.
    pub async fn get_version(&self, identity: &VariableIdentity, version: u64) -> Result<VersionRecord> {
        self.load(identity)
            .await?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| {
                ValidationError::VersionNotFound {
                    identity: identity.to_string(),
                    version,
                }
                .into()
            })
    }

    /// Returns `target` if it can be restored.
    ///
    /// Restoring appends a new `rollback` version; the target itself is
    /// never modified.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the target is missing or a delete
    /// tombstone, or `BackendError::Corrupted` if its checksum does not match.
    pub async fn rollback_target(&self, identity: &VariableIdentity, target: u64) -> Result<VersionRecord> {
        let source = self.get_version(identity, target).await?;
        if source.is_tombstone() {
            return Err(ValidationError::TombstoneRollback {
                identity: identity.to_string(),
                version: target,
            }
            .into());
        }
        if !source.verify() {
            return Err(BackendError::Corrupted {
                key: identity.to_string(),
                message: format!("checksum mismatch on version {target}"),
            }
            .into());
        }
        Ok(source)
    }

    /// Re-appends the value of `target` as a new `rollback` version.
    ///
    /// The stored value and key fingerprint are copied unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`Self::rollback_target`], or an error if the history cannot
    /// be written.
    pub async fn rollback(
        &self,
        identity: &VariableIdentity,
        target: u64,
        ctx: &MutationContext,
    ) -> Result<VersionRecord> {
        let source = self.rollback_target(identity, target).await?;
        let record = self
            .append_version(
                identity,
                &source.value,
                source.sensitive,
                Operation::Rollback,
                source.key_fingerprint.as_deref(),
                ctx,
            )
            .await?;
        info!(
            "Rolled back {identity} to version {target} as version {}",
            record.version
        );
        Ok(record)
    }

    async fn load(&self, identity: &VariableIdentity) -> Result<Vec<VersionRecord>> {
        let key = RecordKey::from(identity);
        let Some(stored) = self.backend.get(Collection::Versions, &key).await? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&stored.value).map_err(|e| {
            BackendError::Corrupted {
                key: identity.to_string(),
                message: format!("Failed to parse version history: {e}"),
            }
            .into()
        })
    }

    async fn save(&self, identity: &VariableIdentity, history: &[VersionRecord], actor: &str) -> Result<()> {
        let value = serde_json::to_string(history).map_err(|e| BackendError::Corrupted {
            key: identity.to_string(),
            message: format!("Failed to serialize version history: {e}"),
        })?;
        let latest = history.iter().map(|v| v.version).max().unwrap_or(0);
        let sensitive = history.last().is_some_and(|v| v.sensitive);

        let record = StoredRecord::new(RecordKey::from(identity), value, sensitive, latest).with_updated_by(actor);
        self.backend.set(Collection::Versions, &record).await
    }
}
