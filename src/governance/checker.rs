//! Write policy checks.
//!
//! `check_single_variable` is pure: it looks at one proposed write and the
//! policy section of the configuration and never touches local or remote
//! state.

use tracing::debug;

use crate::config::{ExpectedScope, PolicyMode, ScopeRule, VaulterConfig};
use crate::error::{GovernanceError, Result};
use crate::model::{Scope, SensitivityChoice, glob_match, is_probably_sensitive, parse_scope};

use super::encoding::{Confidence, detect_encoding};

/// A proposed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableCheck {
    /// Variable name.
    pub key: String,
    /// Proposed value.
    pub value: String,
    /// Target scope.
    pub scope: Scope,
    /// Sensitivity chosen by the caller, if any.
    pub sensitive: Option<SensitivityChoice>,
    /// Target environment.
    pub environment: String,
}

/// Verdict on a proposed write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GovernanceResult {
    /// Whether the write must be refused.
    pub blocked: bool,
    /// Why it was refused. Always set when `blocked`.
    pub block_reason: Option<String>,
    /// Sensitivity to store the value with.
    pub effective_sensitive: bool,
    /// Whether the heuristic changed the caller's default sensitivity.
    pub sensitive_auto_correct: bool,
    /// Non-blocking findings.
    pub warnings: Vec<String>,
    /// Actionable hints.
    pub suggestions: Vec<String>,
}

impl GovernanceResult {
    /// Marks the result blocked. The first reason is kept.
    fn block(&mut self, reason: String) {
        if self.block_reason.is_none() {
            self.block_reason = Some(reason);
        }
        self.blocked = true;
    }

    /// Converts a blocked result into an error.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::Blocked` if the write was refused.
    pub fn into_result(self, key: &str) -> Result<Self> {
        if self.blocked {
            return Err(GovernanceError::Blocked {
                key: key.to_string(),
                reason: self
                    .block_reason
                    .unwrap_or_else(|| String::from("blocked by policy")),
                suggestions: self.suggestions,
            }
            .into());
        }
        Ok(self)
    }
}

/// Runs every policy check against one proposed write.
#[must_use]
pub fn check_single_variable(check: &VariableCheck, config: &VaulterConfig) -> GovernanceResult {
    let mut result = GovernanceResult::default();

    check_environment(check, config, &mut result);
    check_forbidden(check, config, &mut result);
    check_scope_rules(check, config, &mut result);
    classify_sensitivity(check, config, &mut result);
    check_encoding(check, &mut result);

    debug!(
        "Governance for {}/{}/{}: blocked={} warnings={}",
        check.environment,
        check.scope,
        check.key,
        result.blocked,
        result.warnings.len()
    );
    result
}

fn check_environment(check: &VariableCheck, config: &VaulterConfig, result: &mut GovernanceResult) {
    if !config.has_environment(&check.environment) {
        result.warnings.push(format!(
            "environment '{}' is not declared in the project configuration",
            check.environment
        ));
        result.suggestions.push(format!(
            "add '{}' to `environments` in vaulter.yaml",
            check.environment
        ));
    }
}

fn check_forbidden(check: &VariableCheck, config: &VaulterConfig, result: &mut GovernanceResult) {
    if config.policy.mode == PolicyMode::Off {
        return;
    }
    let Some(rules) = config.policy.forbidden.get(&check.environment) else {
        return;
    };

    if let Some(pattern) = rules.keys.iter().find(|p| glob_match(p, &check.key)) {
        result.block(format!(
            "{} matches forbidden pattern '{pattern}' in {}",
            check.key, check.environment
        ));
    }

    let scope_forbidden = rules
        .scopes
        .iter()
        .filter_map(|raw| parse_scope(raw))
        .any(|scope| scope == check.scope);
    if scope_forbidden {
        result.block(format!(
            "writes to {} are forbidden in {}",
            check.scope, check.environment
        ));
        result
            .suggestions
            .push(String::from("choose another scope with --scope"));
    }
}

fn check_scope_rules(check: &VariableCheck, config: &VaulterConfig, result: &mut GovernanceResult) {
    let mode = config.policy.mode;
    if mode == PolicyMode::Off {
        return;
    }
    let Some(rule) = config
        .policy
        .scope_rules
        .iter()
        .find(|rule| glob_match(&rule.pattern, &check.key))
    else {
        return;
    };
    let Some(expected) = expected_scope(rule, &check.scope) else {
        return;
    };

    let mut message = format!(
        "{} is expected in {expected} but targets {}",
        check.key, check.scope
    );
    if let Some(reason) = &rule.reason {
        message.push_str(&format!(" ({reason})"));
    }
    result
        .suggestions
        .push(format!("use --scope {expected} for {}", check.key));

    match mode {
        PolicyMode::Strict => result.block(message),
        PolicyMode::Warn => result.warnings.push(message),
        PolicyMode::Off => {}
    }
}

/// Returns the expected scope description when the rule is violated.
fn expected_scope(rule: &ScopeRule, actual: &Scope) -> Option<String> {
    match (rule.expected, actual) {
        (ExpectedScope::Shared, Scope::Shared) => None,
        (ExpectedScope::Shared, Scope::Service(_)) => Some(Scope::Shared.to_string()),
        (ExpectedScope::Service, Scope::Service(name)) => match &rule.service {
            Some(wanted) if wanted != name => Some(format!("service:{wanted}")),
            _ => None,
        },
        (ExpectedScope::Service, Scope::Shared) => Some(
            rule.service
                .as_ref()
                .map_or_else(|| String::from("a service scope"), |s| format!("service:{s}")),
        ),
    }
}

fn classify_sensitivity(check: &VariableCheck, config: &VaulterConfig, result: &mut GovernanceResult) {
    let looks_sensitive = is_probably_sensitive(&check.key, &config.policy.sensitive_patterns);
    let choice = check.sensitive.unwrap_or(SensitivityChoice::Default(false));

    match choice {
        SensitivityChoice::Explicit(sensitive) => {
            result.effective_sensitive = sensitive;
            if !sensitive && looks_sensitive {
                result
                    .warnings
                    .push(format!("{} looks like a secret but is stored as config", check.key));
                result
                    .suggestions
                    .push(format!("write {}=<value> to store it as a secret", check.key));
            }
        }
        SensitivityChoice::Default(sensitive) => {
            result.effective_sensitive = sensitive || looks_sensitive;
            if result.effective_sensitive != sensitive {
                result.sensitive_auto_correct = true;
                result
                    .warnings
                    .push(format!("{} classified as sensitive from its name", check.key));
            }
        }
    }
}

fn check_encoding(check: &VariableCheck, result: &mut GovernanceResult) {
    let Some(detection) = detect_encoding(&check.value) else {
        return;
    };

    result.warnings.push(format!(
        "value of {} looks like a {} ({} confidence)",
        check.key, detection.kind, detection.confidence
    ));
    if detection.confidence >= Confidence::Medium {
        result.suggestions.push(String::from(
            "store the raw value; vaulter encrypts it before it leaves this machine",
        ));
    }
}
