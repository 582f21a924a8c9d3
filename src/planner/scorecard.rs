//! Environment health scorecard.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::config::VaulterConfig;
use crate::governance::{VariableCheck, check_single_variable};
use crate::model::{SensitivityChoice, glob_match};

use super::diff::Snapshot;

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Nothing to report.
    #[default]
    Healthy,
    /// Drift, warnings or overdue rotations.
    Warning,
    /// Policy violations or missing required variables.
    Critical,
}

/// Local versus remote drift counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DriftCounts {
    /// Keys only present locally.
    pub local_only: usize,
    /// Keys only present remotely.
    pub remote_only: usize,
    /// Keys whose values differ.
    pub different: usize,
    /// Keys in sync.
    pub in_sync: usize,
}

/// A secret past its rotation deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverdueRotation {
    /// Variable name, in `scope/key` form.
    pub key: String,
    /// Days since the last write.
    pub age_days: i64,
    /// Configured maximum age.
    pub max_age_days: u32,
}

/// Health report for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Scorecard {
    /// Drift counts.
    pub drift: DriftCounts,
    /// Local variables the policy would refuse.
    pub policy_violations: Vec<String>,
    /// Policy warnings on local variables.
    pub policy_warnings: Vec<String>,
    /// Required variables defined nowhere.
    pub missing_required: Vec<String>,
    /// Secrets past their rotation deadline.
    pub overdue_rotations: Vec<OverdueRotation>,
    /// Overall health.
    pub health: Health,
}

impl Scorecard {
    /// Computes the scorecard of an environment from its two snapshots.
    #[must_use]
    pub fn compute(
        config: &VaulterConfig,
        environment: &str,
        local: &Snapshot,
        remote: &Snapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let mut card = Self::default();

        for (id, ours) in local {
            match remote.get(id) {
                None => card.drift.local_only += 1,
                Some(theirs) if theirs.value == ours.value && theirs.sensitive == ours.sensitive => {
                    card.drift.in_sync += 1;
                }
                Some(_) => card.drift.different += 1,
            }
        }
        card.drift.remote_only = remote.keys().filter(|id| !local.contains_key(*id)).count();

        for ((scope, key), entry) in local {
            let check = VariableCheck {
                key: key.clone(),
                value: entry.value.clone(),
                scope: scope.clone(),
                sensitive: Some(SensitivityChoice::Explicit(entry.sensitive)),
                environment: environment.to_string(),
            };
            let result = check_single_variable(&check, config);
            if let Some(reason) = result.block_reason {
                card.policy_violations.push(format!("{scope}/{key}: {reason}"));
            }
            card.policy_warnings
                .extend(result.warnings.into_iter().map(|w| format!("{scope}/{key}: {w}")));
        }

        for required in config.policy.required.iter().filter(|r| r.applies_to(environment)) {
            let defined = local
                .keys()
                .chain(remote.keys())
                .any(|(_, key)| key == &required.key);
            if !defined {
                card.missing_required.push(required.key.clone());
            }
        }

        for ((scope, key), entry) in remote {
            if !entry.sensitive {
                continue;
            }
            let Some(updated_at) = entry.updated_at else {
                continue;
            };
            let Some(rule) = config
                .policy
                .rotation
                .iter()
                .find(|rule| glob_match(&rule.pattern, key))
            else {
                continue;
            };
            let age_days = (now - updated_at).num_days();
            if age_days > i64::from(rule.max_age_days) {
                card.overdue_rotations.push(OverdueRotation {
                    key: format!("{scope}/{key}"),
                    age_days,
                    max_age_days: rule.max_age_days,
                });
            }
        }

        card.health = if !card.policy_violations.is_empty() || !card.missing_required.is_empty() {
            Health::Critical
        } else if card.drift.local_only + card.drift.remote_only + card.drift.different > 0
            || !card.policy_warnings.is_empty()
            || !card.overdue_rotations.is_empty()
        {
            Health::Warning
        } else {
            Health::Healthy
        };

        card
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForbiddenRules, RequiredVariable, RotationRule};
    use crate::model::Scope;
    use crate::planner::diff::SnapshotEntry;
    use chrono::Duration;

    fn snapshot(entries: &[(&str, &str, bool, Option<DateTime<Utc>>)]) -> Snapshot {
        entries
            .iter()
            .map(|(key, value, sensitive, updated_at)| {
                (
                    (Scope::Shared, (*key).to_string()),
                    SnapshotEntry {
                        value: (*value).to_string(),
                        sensitive: *sensitive,
                        updated_at: *updated_at,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_in_sync_is_healthy() {
        let config = VaulterConfig::new("app");
        let local = snapshot(&[("PORT", "80", false, None)]);
        let card = Scorecard::compute(&config, "dev", &local, &local.clone(), Utc::now());
        assert_eq!(card.health, Health::Healthy);
        assert_eq!(card.drift.in_sync, 1);
    }

    #[test]
    fn test_drift_counts() {
        let config = VaulterConfig::new("app");
        let local = snapshot(&[("A", "1", false, None), ("B", "1", false, None)]);
        let remote = snapshot(&[("B", "2", false, None), ("C", "3", false, None)]);
        let card = Scorecard::compute(&config, "dev", &local, &remote, Utc::now());
        assert_eq!(
            card.drift,
            DriftCounts {
                local_only: 1,
                remote_only: 1,
                different: 1,
                in_sync: 0,
            }
        );
        assert_eq!(card.health, Health::Warning);
    }

    #[test]
    fn test_missing_required_is_critical() {
        let mut config = VaulterConfig::new("app");
        config.policy.required.push(RequiredVariable {
            key: String::from("DATABASE_URL"),
            environments: vec![String::from("prd")],
        });

        let prd = Scorecard::compute(&config, "prd", &Snapshot::new(), &Snapshot::new(), Utc::now());
        assert_eq!(prd.missing_required, vec![String::from("DATABASE_URL")]);
        assert_eq!(prd.health, Health::Critical);

        let dev = Scorecard::compute(&config, "dev", &Snapshot::new(), &Snapshot::new(), Utc::now());
        assert!(dev.missing_required.is_empty());
    }

    #[test]
    fn test_policy_violations() {
        let mut config = VaulterConfig::new("app");
        config.policy.forbidden.insert(
            String::from("prd"),
            ForbiddenRules {
                keys: vec![String::from("DEBUG")],
                scopes: vec![],
            },
        );
        let local = snapshot(&[("DEBUG", "1", false, None)]);
        let card = Scorecard::compute(&config, "prd", &local, &Snapshot::new(), Utc::now());
        assert_eq!(card.policy_violations.len(), 1);
        assert_eq!(card.health, Health::Critical);
    }

    #[test]
    fn test_overdue_rotation() {
        let mut config = VaulterConfig::new("app");
        config.policy.rotation.push(RotationRule {
            pattern: String::from("*_TOKEN"),
            max_age_days: 30,
        });
        let now = Utc::now();
        let remote = snapshot(&[
            ("OLD_TOKEN", "x", true, Some(now - Duration::days(45))),
            ("NEW_TOKEN", "y", true, Some(now - Duration::days(2))),
        ]);
        let card = Scorecard::compute(&config, "dev", &remote, &remote.clone(), now);
        assert_eq!(card.overdue_rotations.len(), 1);
        assert_eq!(card.overdue_rotations[0].key, "shared/OLD_TOKEN");
        assert_eq!(card.health, Health::Warning);
    }
}
