//! Variables, identities and sensitivity classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

use super::scope::Scope;

/// Key suffixes that mark a variable as probably sensitive.
const SENSITIVE_SUFFIXES: &[&str] = &[
    "_KEY",
    "_SECRET",
    "_TOKEN",
    "_PASSWORD",
    "_PASS",
    "_PWD",
    "_CREDENTIALS",
    "_PRIVATE_KEY",
];

/// Key prefixes that mark a variable as probably sensitive.
const SENSITIVE_PREFIXES: &[&str] = &["SECRET_", "PRIVATE_"];

/// Exact key names that carry credentials.
const SENSITIVE_NAMES: &[&str] = &["DATABASE_URL", "REDIS_URL", "MONGODB_URI", "PASSWORD", "SECRET"];

/// A single environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name.
    pub key: String,
    /// Plaintext value.
    pub value: String,
    /// Environment the variable belongs to.
    pub environment: String,
    /// Scope within the environment.
    pub scope: Scope,
    /// Whether the value is a secret.
    pub sensitive: bool,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Version number (0 for variables never written to a backend).
    pub version: u64,
}

/// Identity of a variable: exactly one current remote value exists per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableIdentity {
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Scope within the environment.
    pub scope: Scope,
    /// Variable name.
    pub key: String,
}

/// How the sensitivity of a write was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityChoice {
    /// Chosen by the user through write syntax; never auto-corrected.
    Explicit(bool),
    /// A default the governance heuristic may correct.
    Default(bool),
}

/// A parsed `KEY=value` (secret) or `KEY::value` (config) assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Variable name.
    pub key: String,
    /// Value to write.
    pub value: String,
    /// Sensitivity forced by the separator.
    pub sensitivity: SensitivityChoice,
}

/// Validates a variable key against `[A-Za-z0-9_]+`.
///
/// # Errors
///
/// Returns an error if the key is empty or contains other characters.
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::InvalidKey {
            key: key.to_string(),
            reason: String::from("key cannot be empty"),
        });
    }

    if let Some(bad) = key.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(ValidationError::InvalidKey {
            key: key.to_string(),
            reason: format!("invalid character '{bad}'"),
        });
    }

    Ok(())
}

/// Parses a write expression.
///
/// `KEY=value` forces a secret, `KEY::value` forces a config. When both
/// separators appear, the earliest one wins, so `URL::http://a=b` is a config.
///
/// # Errors
///
/// Returns an error if no separator is present or the key is invalid.
pub fn parse_assignment(raw: &str) -> Result<Assignment, ValidationError> {
    let config_at = raw.find("::");
    let secret_at = raw.find('=');

    let (key, value, sensitive) = match (config_at, secret_at) {
        (Some(c), Some(s)) if c < s => (&raw[..c], &raw[c + 2..], false),
        (_, Some(s)) => (&raw[..s], &raw[s + 1..], true),
        (Some(c), None) => (&raw[..c], &raw[c + 2..], false),
        (None, None) => {
            return Err(ValidationError::InvalidAssignment {
                raw: raw.to_string(),
            });
        }
    };

    let key = key.trim();
    validate_key(key)?;

    Ok(Assignment {
        key: key.to_string(),
        value: value.to_string(),
        sensitivity: SensitivityChoice::Explicit(sensitive),
    })
}

/// Returns true if the key name looks like it holds a secret.
///
/// `extra_patterns` are glob patterns (`*` wildcard) from the policy config.
#[must_use]
pub fn is_probably_sensitive(key: &str, extra_patterns: &[String]) -> bool {
    let upper = key.to_ascii_uppercase();

    SENSITIVE_NAMES.contains(&upper.as_str())
        || SENSITIVE_SUFFIXES.iter().any(|s| upper.ends_with(s))
        || SENSITIVE_PREFIXES.iter().any(|p| upper.starts_with(p))
        || extra_patterns.iter().any(|p| glob_match(p, key))
}

/// Case-insensitive glob match (`*`, `?`, `[...]`). Invalid patterns match nothing.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    glob::Pattern::new(&pattern.to_ascii_uppercase())
        .map(|p| p.matches(&text.to_ascii_uppercase()))
        .unwrap_or(false)
}

impl SensitivityChoice {
    /// Returns the chosen sensitivity.
    #[must_use]
    pub const fn value(self) -> bool {
        match self {
            Self::Explicit(v) | Self::Default(v) => v,
        }
    }

    /// Returns true when the user chose the sensitivity explicitly.
    #[must_use]
    pub const fn is_explicit(self) -> bool {
        matches!(self, Self::Explicit(_))
    }
}

impl VariableIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(project: &str, environment: &str, scope: Scope, key: &str) -> Self {
        Self {
            project: project.to_string(),
            environment: environment.to_string(),
            scope,
            key: key.to_string(),
        }
    }
}

impl fmt::Display for VariableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project, self.environment, self.scope, self.key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("API_KEY").is_ok());
        assert!(validate_key("a1_b2").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("API-KEY").is_err());
        assert!(validate_key("API KEY").is_err());
        assert!(validate_key("ÄPI").is_err());
    }

    #[test]
    fn test_assignment_separators() {
        let secret = parse_assignment("API_KEY=abc").expect("valid");
        assert_eq!(secret.key, "API_KEY");
        assert_eq!(secret.value, "abc");
        assert_eq!(secret.sensitivity, SensitivityChoice::Explicit(true));

        let config = parse_assignment("LOG_LEVEL::debug").expect("valid");
        assert_eq!(config.value, "debug");
        assert_eq!(config.sensitivity, SensitivityChoice::Explicit(false));
    }

    #[test]
    fn test_assignment_earliest_separator_wins() {
        let config = parse_assignment("URL::http://host/?a=b").expect("valid");
        assert_eq!(config.key, "URL");
        assert_eq!(config.value, "http://host/?a=b");
        assert!(!config.sensitivity.value());

        let secret = parse_assignment("TOKEN=a::b").expect("valid");
        assert_eq!(secret.value, "a::b");
        assert!(secret.sensitivity.value());
    }

    #[test]
    fn test_assignment_rejects_bad_input() {
        assert!(parse_assignment("NOSEPARATOR").is_err());
        assert!(parse_assignment("=value").is_err());
        assert!(parse_assignment("BAD-KEY=value").is_err());
    }

    #[test]
    fn test_sensitivity_heuristic() {
        assert!(is_probably_sensitive("STRIPE_SECRET", &[]));
        assert!(is_probably_sensitive("github_token", &[]));
        assert!(is_probably_sensitive("DATABASE_URL", &[]));
        assert!(is_probably_sensitive("SECRET_SAUCE", &[]));
        assert!(!is_probably_sensitive("LOG_LEVEL", &[]));
        assert!(!is_probably_sensitive("PORT", &[]));
        assert!(is_probably_sensitive("SENTRY_DSN", &[String::from("*_DSN")]));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*_KEY", "API_KEY"));
        assert!(glob_match("next_public_*", "NEXT_PUBLIC_URL"));
        assert!(glob_match("A?C", "ABC"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("*_KEY", "KEYS"));
        assert!(!glob_match("DEBUG", "DEBUG_MODE"));
        assert!(glob_match("DB_[RW]*", "db_read_url"));
        assert!(!glob_match("[", "["));
    }

    #[test]
    fn test_identity_display() {
        let id = VariableIdentity::new("app", "dev", Scope::Service(String::from("api")), "PORT");
        assert_eq!(id.to_string(), "app/dev/service:api/PORT");
    }
}
