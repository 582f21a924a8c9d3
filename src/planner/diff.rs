//! Diff engine for comparing local and remote snapshots.
//!
//! Classification per (scope, key):
//! - local only: `add`
//! - remote only: `delete` when pruning, otherwise reported as remote-only
//! - same value and sensitivity: unchanged
//! - different: resolved by the conflict strategy

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::{ConflictStrategy, SyncConfig};
use crate::error::{ConflictError, Result};
use crate::local::LocalState;
use crate::model::Scope;

use super::plan::{ChangeAction, PlanChange, PlanSummary, VariableRef};

/// One side's view of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Plaintext value.
    pub value: String,
    /// Whether the value is a secret.
    pub sensitive: bool,
    /// Last write time, when known.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Plaintext variables keyed by (scope, key).
pub type Snapshot = BTreeMap<(Scope, String), SnapshotEntry>;

/// Diff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffOptions {
    /// How differing values are resolved.
    pub conflict: ConflictStrategy,
    /// Whether remote-only keys are deleted.
    pub prune: bool,
}

/// Output of a diff.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// Changes sorted by (scope, key).
    pub changes: Vec<PlanChange>,
    /// Counts per classification.
    pub summary: PlanSummary,
    /// Remote-only keys left alone.
    pub remote_only: Vec<VariableRef>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// Engine for computing diffs between local and remote snapshots.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Builds a snapshot from local state.
#[must_use]
pub fn local_snapshot(state: &LocalState) -> Snapshot {
    state
        .entries
        .iter()
        .map(|(id, entry)| {
            (
                id.clone(),
                SnapshotEntry {
                    value: entry.value.clone(),
                    sensitive: entry.sensitive,
                    updated_at: None,
                },
            )
        })
        .collect()
}

impl From<&SyncConfig> for DiffOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            conflict: config.conflict,
            prune: config.prune,
        }
    }
}

impl DiffEngine {
    /// Computes the changes that make `remote` match `local`.
    ///
    /// # Errors
    ///
    /// Returns `ConflictError` naming every differing key when the strategy
    /// is `error`.
    pub fn compute(local: &Snapshot, remote: &Snapshot, options: DiffOptions) -> Result<DiffResult> {
        let ids: BTreeSet<&(Scope, String)> = local.keys().chain(remote.keys()).collect();
        let mut result = DiffResult::default();
        let mut conflicting = Vec::new();

        for id in ids {
            let (scope, key) = id;
            match (local.get(id), remote.get(id)) {
                (Some(ours), None) => {
                    result.summary.to_add += 1;
                    result.changes.push(PlanChange {
                        key: key.clone(),
                        scope: scope.clone(),
                        action: ChangeAction::Add,
                        sensitive: ours.sensitive,
                        local_value: Some(ours.value.clone()),
                        remote_value: None,
                    });
                }
                (None, Some(theirs)) => {
                    if options.prune {
                        result.summary.to_delete += 1;
                        result.changes.push(PlanChange {
                            key: key.clone(),
                            scope: scope.clone(),
                            action: ChangeAction::Delete,
                            sensitive: theirs.sensitive,
                            local_value: None,
                            remote_value: Some(theirs.value.clone()),
                        });
                    } else {
                        result.remote_only.push(VariableRef {
                            scope: scope.clone(),
                            key: key.clone(),
                        });
                    }
                }
                (Some(ours), Some(theirs)) => {
                    if ours.value == theirs.value && ours.sensitive == theirs.sensitive {
                        result.summary.unchanged += 1;
                        continue;
                    }

                    match options.conflict {
                        ConflictStrategy::Local => {
                            result.summary.to_update += 1;
                            result.changes.push(PlanChange {
                                key: key.clone(),
                                scope: scope.clone(),
                                action: ChangeAction::Update,
                                sensitive: ours.sensitive,
                                local_value: Some(ours.value.clone()),
                                remote_value: Some(theirs.value.clone()),
                            });
                        }
                        ConflictStrategy::Remote => {
                            result.summary.conflicts += 1;
                            result.warnings.push(format!(
                                "{scope}/{key} differs from the remote value; keeping remote"
                            ));
                        }
                        ConflictStrategy::Error => {
                            conflicting.push(format!("{scope}/{key}"));
                        }
                    }
                }
                (None, None) => {}
            }
        }

        if !conflicting.is_empty() {
            return Err(ConflictError { keys: conflicting }.into());
        }

        debug!(
            "Diff: {} add, {} update, {} delete, {} unchanged, {} conflicts",
            result.summary.to_add,
            result.summary.to_update,
            result.summary.to_delete,
            result.summary.unchanged,
            result.summary.conflicts
        );
        Ok(result)
    }
}
