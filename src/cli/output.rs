//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::crypto::GeneratedKey;
use crate::local::{LocalState, LocalWriteResult};
use crate::model::Variable;
use crate::planner::{ApplyResult, ChangeOutcome, Plan};
use crate::sync::{ExportResult, KeyRotation};
use crate::versions::VersionRecord;

use super::commands::OutputFormat;

/// Placeholder shown instead of secret values.
const MASK: &str = "********";

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct PlanChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
}

/// Apply outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Local variable row for table and JSON display.
#[derive(Tabled, Serialize)]
struct VariableRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Secret")]
    sensitive: bool,
}

/// Remote variable row for table and JSON display.
#[derive(Tabled, Serialize)]
struct RemoteVariableRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Secret")]
    sensitive: bool,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

/// Version row for table and JSON display.
#[derive(Tabled, Serialize)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Actor")]
    actor: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "When")]
    timestamp: String,
    #[tabled(rename = "Checksum")]
    checksum: String,
}

/// JSON shape of a local write.
#[derive(Serialize)]
struct WriteJson<'a> {
    success: bool,
    warnings: &'a [String],
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Serializes a value for JSON output.
    fn json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats a sync plan.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => Self::json(plan),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        let mut output = String::new();

        if plan.is_empty() {
            let _ = writeln!(
                output,
                "No changes required for {}/{}.",
                plan.project, plan.environment
            );
        } else {
            let _ = writeln!(output, "\nSync plan for {}/{}\n", plan.project, plan.environment);
            let rows: Vec<PlanChangeRow> = plan
                .changes
                .iter()
                .enumerate()
                .map(|(i, c)| PlanChangeRow {
                    index: i + 1,
                    action: c.action.to_string(),
                    scope: c.scope.to_string(),
                    key: c.key.clone(),
                    kind: if c.sensitive { "secret" } else { "config" },
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
            let _ = writeln!(
                output,
                "\nPlan: {} to add, {} to update, {} to delete, {} unchanged",
                plan.summary.to_add, plan.summary.to_update, plan.summary.to_delete, plan.summary.unchanged
            );
        }

        if !plan.remote_only.is_empty() {
            let _ = writeln!(output, "\nRemote only (pruning disabled):");
            for variable in &plan.remote_only {
                let _ = writeln!(output, "   - {variable}");
            }
        }
        if !plan.skipped.is_empty() {
            let _ = writeln!(output, "\nSkipped (could not decrypt):");
            for skipped in &plan.skipped {
                let _ = writeln!(output, "   - {}/{}: {}", skipped.scope, skipped.key, skipped.reason);
            }
        }
        if !plan.warnings.is_empty() {
            let _ = writeln!(output, "\nWarnings:");
            for warning in &plan.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        let card = &plan.scorecard;
        let _ = writeln!(output, "\nHealth: {}", card.health);
        let _ = writeln!(
            output,
            "   drift: {} local only, {} remote only, {} different, {} in sync",
            card.drift.local_only, card.drift.remote_only, card.drift.different, card.drift.in_sync
        );
        for violation in &card.policy_violations {
            let _ = writeln!(output, "   violation: {violation}");
        }
        for missing in &card.missing_required {
            let _ = writeln!(output, "   missing required: {missing}");
        }
        for overdue in &card.overdue_rotations {
            let _ = writeln!(
                output,
                "   rotation overdue: {} ({} days, max {})",
                overdue.key, overdue.age_days, overdue.max_age_days
            );
        }

        output
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_apply(&self, result: &ApplyResult) -> String {
        match self.format {
            OutputFormat::Json => Self::json(result),
            OutputFormat::Text => {
                let rows: Vec<OutcomeRow> = result
                    .results
                    .iter()
                    .map(|r| OutcomeRow {
                        change: r.change.to_string(),
                        outcome: match &r.outcome {
                            ChangeOutcome::Succeeded { version } => format!("ok (v{version})"),
                            ChangeOutcome::Unchanged => String::from("unchanged"),
                            ChangeOutcome::WouldApply => String::from("would apply"),
                            ChangeOutcome::Failed { error, retryable } => {
                                let hint = if *retryable { ", retryable" } else { "" };
                                format!("failed{hint}: {error}")
                            }
                        },
                    })
                    .collect();

                let mut output = String::new();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                let _ = writeln!(output, "\n{result}");
                output
            }
        }
    }

    /// Formats local variables. Secret values are masked unless `reveal`.
    #[must_use]
    pub fn format_local_state(&self, state: &LocalState, reveal: bool) -> String {
        let rows: Vec<VariableRow> = state
            .entries
            .iter()
            .map(|((scope, key), entry)| VariableRow {
                scope: scope.to_string(),
                key: key.clone(),
                value: if entry.sensitive && !reveal {
                    String::from(MASK)
                } else {
                    entry.value.clone()
                },
                sensitive: entry.sensitive,
            })
            .collect();

        match self.format {
            OutputFormat::Json => Self::json(&rows),
            OutputFormat::Text if rows.is_empty() => {
                format!("No local variables in {}.\n", state.environment)
            }
            OutputFormat::Text => format!("{}\n", Table::new(rows)),
        }
    }

    /// Formats decrypted remote variables. Secret values are masked unless
    /// `reveal`.
    #[must_use]
    pub fn format_remote_variables(&self, environment: &str, variables: &[Variable], reveal: bool) -> String {
        let rows: Vec<RemoteVariableRow> = variables
            .iter()
            .map(|v| RemoteVariableRow {
                scope: v.scope.to_string(),
                key: v.key.clone(),
                value: if v.sensitive && !reveal {
                    String::from(MASK)
                } else {
                    v.value.clone()
                },
                sensitive: v.sensitive,
                version: v.version,
                updated_at: v.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();

        match self.format {
            OutputFormat::Json => Self::json(&rows),
            OutputFormat::Text if rows.is_empty() => format!("No remote variables in {environment}.\n"),
            OutputFormat::Text => format!("{}\n", Table::new(rows)),
        }
    }

    /// Formats a version history.
    #[must_use]
    pub fn format_versions(&self, versions: &[VersionRecord]) -> String {
        let rows: Vec<VersionRow> = versions
            .iter()
            .map(|v| VersionRow {
                version: v.version,
                operation: v.operation.to_string(),
                actor: v.actor.clone(),
                source: format!("{:?}", v.source).to_lowercase(),
                timestamp: v.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                checksum: v.checksum.chars().take(12).collect(),
            })
            .collect();

        match self.format {
            OutputFormat::Json => Self::json(&rows),
            OutputFormat::Text if rows.is_empty() => String::from("No versions recorded.\n"),
            OutputFormat::Text => format!("{}\n", Table::new(rows)),
        }
    }

    /// Formats the result of a local mutation.
    #[must_use]
    pub fn format_write(&self, action: &str, result: &LocalWriteResult) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&WriteJson {
                success: result.success,
                warnings: &result.warnings,
            }),
            OutputFormat::Text => {
                let mut output = if result.success {
                    format!("{action}\n")
                } else {
                    format!("{action} refused\n")
                };
                for warning in &result.warnings {
                    let _ = writeln!(output, "   - {warning}");
                }
                output
            }
        }
    }

    /// Formats a generated key.
    #[must_use]
    pub fn format_key(&self, environment: &str, key: &GeneratedKey) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({
                "environment": environment,
                "mode": key.mode.to_string(),
                "secret_path": key.secret_path,
                "public_path": key.public_path,
                "public_key": key.public_key,
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "Generated {} key for {environment} at {}\n",
                    key.mode,
                    key.secret_path.display()
                );
                if let Some(public) = &key.public_key {
                    let _ = writeln!(output, "Public key: {public}");
                }
                output
            }
        }
    }

    /// Formats a key rotation.
    #[must_use]
    pub fn format_rotation(&self, rotation: &KeyRotation) -> String {
        match self.format {
            OutputFormat::Json => Self::json(rotation),
            OutputFormat::Text => {
                let mut output = format!(
                    "Rotated key of {}: {} values re-encrypted, new key at {}\n",
                    rotation.environment,
                    rotation.reencrypted,
                    rotation.key_path.display()
                );
                for backup in &rotation.backups {
                    let _ = writeln!(output, "   backup: {}", backup.display());
                }
                output
            }
        }
    }

    /// Formats an export.
    #[must_use]
    pub fn format_export(&self, result: &ExportResult) -> String {
        match self.format {
            OutputFormat::Json => Self::json(result),
            OutputFormat::Text => {
                let mut output = format!(
                    "Exported {} variables to {}\n",
                    result.variables,
                    result.path.display()
                );
                for skipped in &result.skipped {
                    let _ = writeln!(output, "   skipped {}/{}: {}", skipped.scope, skipped.key, skipped.reason);
                }
                output
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalEntry;
    use crate::model::Scope;
    use std::collections::BTreeMap;

    fn state() -> LocalState {
        let mut entries = BTreeMap::new();
        entries.insert(
            (Scope::Shared, String::from("API_KEY")),
            LocalEntry {
                value: String::from("s3cret"),
                sensitive: true,
            },
        );
        entries.insert(
            (Scope::Shared, String::from("PORT")),
            LocalEntry {
                value: String::from("8080"),
                sensitive: false,
            },
        );
        LocalState {
            environment: String::from("dev"),
            entries,
        }
    }

    #[test]
    fn test_secrets_are_masked() {
        let text = OutputFormatter::new(OutputFormat::Text).format_local_state(&state(), false);
        assert!(!text.contains("s3cret"));
        assert!(text.contains(MASK));
        assert!(text.contains("8080"));

        let json = OutputFormatter::new(OutputFormat::Json).format_local_state(&state(), false);
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn test_reveal_shows_secrets() {
        let text = OutputFormatter::new(OutputFormat::Text).format_local_state(&state(), true);
        assert!(text.contains("s3cret"));
    }

    #[test]
    fn test_remote_secrets_are_masked() {
        let variables = vec![
            Variable {
                key: String::from("API_KEY"),
                value: String::from("s3cret"),
                environment: String::from("dev"),
                scope: Scope::Shared,
                sensitive: true,
                updated_at: chrono::Utc::now(),
                version: 3,
            },
            Variable {
                key: String::from("PORT"),
                value: String::from("8080"),
                environment: String::from("dev"),
                scope: Scope::Service(String::from("api")),
                sensitive: false,
                updated_at: chrono::Utc::now(),
                version: 1,
            },
        ];

        let json = OutputFormatter::new(OutputFormat::Json).format_remote_variables("dev", &variables, false);
        assert!(!json.contains("s3cret"));
        assert!(json.contains("\"version\": 3") || json.contains("\"version\":3"));

        let text = OutputFormatter::new(OutputFormat::Text).format_remote_variables("dev", &variables, true);
        assert!(text.contains("s3cret"));
        assert!(text.contains("8080"));

        let empty = OutputFormatter::new(OutputFormat::Text).format_remote_variables("dev", &[], false);
        assert_eq!(empty, "No remote variables in dev.\n");
    }

    #[test]
    fn test_refused_write() {
        let result = LocalWriteResult::refused("PORT already exists in dev/service:api");
        let text = OutputFormatter::new(OutputFormat::Text).format_write("Moved PORT", &result);
        assert!(text.starts_with("Moved PORT refused"));
        assert!(text.contains("already exists"));
    }
}
