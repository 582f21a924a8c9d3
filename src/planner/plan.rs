//! Sync plan types.
//!
//! A plan lists the backend writes that would make the remote state of one
//! environment match its local state. Values are carried for the apply
//! engine but never serialized or displayed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::model::{Scope, VariableIdentity};

use super::scorecard::Scorecard;

/// A complete sync plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Project name.
    pub project: String,
    /// Environment the plan targets.
    pub environment: String,
    /// Scope filter, if the plan covers one scope only.
    pub scope: Option<Scope>,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Changes sorted by (scope, key).
    pub changes: Vec<PlanChange>,
    /// Counts per classification.
    pub summary: PlanSummary,
    /// Keys present remotely only, left alone because pruning is off.
    pub remote_only: Vec<VariableRef>,
    /// Remote keys excluded because they could not be decrypted.
    pub skipped: Vec<SkippedKey>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// Health report computed from the same snapshots.
    pub scorecard: Scorecard,
}

/// A single planned backend write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanChange {
    /// Variable name.
    pub key: String,
    /// Scope of the variable.
    pub scope: Scope,
    /// What to do.
    pub action: ChangeAction,
    /// Sensitivity to store the value with.
    pub sensitive: bool,
    /// Local plaintext value.
    #[serde(skip)]
    pub local_value: Option<String>,
    /// Remote plaintext value.
    #[serde(skip)]
    pub remote_value: Option<String>,
}

/// Types of change in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Create the remote value.
    Add,
    /// Replace the remote value.
    Update,
    /// Remove the remote value.
    Delete,
}

/// Counts per classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlanSummary {
    /// Local-only keys.
    pub to_add: usize,
    /// Keys whose local value wins.
    pub to_update: usize,
    /// Remote-only keys removed by pruning.
    pub to_delete: usize,
    /// Keys already in sync.
    pub unchanged: usize,
    /// Differing keys left as they are remotely.
    pub conflicts: usize,
}

/// A (scope, key) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct VariableRef {
    /// Scope of the variable.
    pub scope: Scope,
    /// Variable name.
    pub key: String,
}

/// A remote key excluded from the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedKey {
    /// Scope of the variable.
    pub scope: Scope,
    /// Variable name.
    pub key: String,
    /// Why it was excluded.
    pub reason: String,
}

impl Plan {
    /// Returns true if the plan has no changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of changes.
    #[must_use]
    pub const fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Returns the identity a change applies to.
    #[must_use]
    pub fn identity(&self, change: &PlanChange) -> VariableIdentity {
        VariableIdentity::new(&self.project, &self.environment, change.scope.clone(), &change.key)
    }

    /// Returns a plan restricted to the given changes, for retries.
    #[must_use]
    pub fn with_changes(&self, changes: Vec<PlanChange>) -> Self {
        let mut plan = self.clone();
        plan.summary = PlanSummary {
            to_add: changes.iter().filter(|c| c.action == ChangeAction::Add).count(),
            to_update: changes.iter().filter(|c| c.action == ChangeAction::Update).count(),
            to_delete: changes.iter().filter(|c| c.action == ChangeAction::Delete).count(),
            unchanged: 0,
            conflicts: 0,
        };
        plan.changes = changes;
        plan
    }
}

impl PlanSummary {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.to_add > 0 || self.to_update > 0 || self.to_delete > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.to_add + self.to_update + self.to_delete
    }
}

impl PlanChange {
    /// Returns a human-readable description of the change.
    #[must_use]
    pub fn description(&self) -> String {
        let kind = if self.sensitive { "secret" } else { "config" };
        match self.action {
            ChangeAction::Add => format!("Add {kind} {} to {}", self.key, self.scope),
            ChangeAction::Update => format!("Update {kind} {} in {}", self.key, self.scope),
            ChangeAction::Delete => format!("Delete {kind} {} from {}", self.key, self.scope),
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlanChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.action, self.scope, self.key)
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.key)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changes.is_empty() {
            write!(f, "No changes required for {}/{}", self.project, self.environment)?;
        } else {
            writeln!(
                f,
                "Sync plan for {}/{} ({} changes):",
                self.project,
                self.environment,
                self.changes.len()
            )?;
            for (i, change) in self.changes.iter().enumerate() {
                writeln!(f, "  {i}. {}", change.description())?;
            }
        }

        if !self.remote_only.is_empty() {
            writeln!(f, "\nRemote only (pruning disabled):")?;
            for variable in &self.remote_only {
                writeln!(f, "  - {variable}")?;
            }
        }

        if !self.skipped.is_empty() {
            writeln!(f, "\nSkipped (could not decrypt):")?;
            for skipped in &self.skipped {
                writeln!(f, "  - {}/{}: {}", skipped.scope, skipped.key, skipped.reason)?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f, "\nWarnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  - {warning}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: &str, action: ChangeAction) -> PlanChange {
        PlanChange {
            key: key.to_string(),
            scope: Scope::Shared,
            action,
            sensitive: true,
            local_value: Some(String::from("secret-local")),
            remote_value: Some(String::from("secret-remote")),
        }
    }

    #[test]
    fn test_values_are_never_serialized() {
        let json = serde_json::to_string(&change("API_KEY", ChangeAction::Update)).expect("serialize");
        assert!(!json.contains("secret-local"));
        assert!(!json.contains("secret-remote"));
        assert!(json.contains("\"action\":\"update\""));
    }

    #[test]
    fn test_description() {
        assert_eq!(
            change("API_KEY", ChangeAction::Add).description(),
            "Add secret API_KEY to shared"
        );
        assert_eq!(change("API_KEY", ChangeAction::Delete).to_string(), "delete shared/API_KEY");
    }

    #[test]
    fn test_summary_totals() {
        let summary = PlanSummary {
            to_add: 1,
            to_update: 2,
            to_delete: 3,
            unchanged: 4,
            conflicts: 5,
        };
        assert!(summary.has_changes());
        assert_eq!(summary.total_changes(), 6);
        assert!(!PlanSummary::default().has_changes());
    }
}
