//! Configuration validation for project configs.
//!
//! This module checks a parsed configuration for values the rest of the crate
//! cannot work with, collecting every error and warning before failing.

use crate::error::{ConfigError, Result, VaulterError};
use crate::model::{is_valid_service_name, parse_scope};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{BackendConfig, BackendType, EncryptionMode, VaulterConfig};

/// Upper bound for `sync.concurrency`.
const MAX_CONCURRENCY: usize = 64;

/// Validator for project configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all issues found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationIssue>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a project configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &VaulterConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_services(&config.services, &mut result);
        Self::validate_backend(&config.backend, &mut result);
        Self::validate_encryption(config, &mut result);
        Self::validate_sync(config, &mut result);
        Self::validate_policy(config, &mut result);
        Self::validate_versioning(config, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(VaulterError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project name and environments.
    fn validate_project(config: &VaulterConfig, result: &mut ValidationResult) {
        if config.project.is_empty() {
            result.push_error("project", "Project name cannot be empty");
        } else if !is_valid_name(&config.project) {
            result.push_error(
                "project",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.project
                ),
            );
        }

        if config.environments.is_empty() {
            result.push_error("environments", "At least one environment must be declared");
        }

        let mut seen = HashSet::new();
        for (i, env) in config.environments.iter().enumerate() {
            if !is_valid_name(env) {
                result.push_error(
                    format!("environments[{i}]"),
                    format!("Environment name '{env}' is invalid"),
                );
            }
            if !seen.insert(env) {
                result.push_error(
                    format!("environments[{i}]"),
                    format!("Duplicate environment: {env}"),
                );
            }
        }

        if !config.has_environment(&config.default_environment) {
            result.push_error(
                "default_environment",
                format!(
                    "Default environment '{}' is not declared in environments",
                    config.default_environment
                ),
            );
        }
    }

    /// Validates service names.
    fn validate_services(services: &[String], result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, service) in services.iter().enumerate() {
            if !is_valid_service_name(service) {
                result.push_error(
                    format!("services[{i}]"),
                    format!("Service name '{service}' is invalid"),
                );
            }
            if !seen.insert(service) {
                result.push_error(
                    format!("services[{i}]"),
                    format!("Duplicate service: {service}"),
                );
            }
        }
    }

    /// Validates backend configuration.
    fn validate_backend(backend: &BackendConfig, result: &mut ValidationResult) {
        match backend.backend_type {
            BackendType::S3 => {
                if backend.bucket.as_ref().is_none_or(String::is_empty) {
                    result.push_error(
                        "backend.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            BackendType::Fs => {
                if backend.path.is_none() {
                    result
                        .warnings
                        .push(String::from("backend.path: not set, using the default remote directory"));
                }
            }
        }
    }

    /// Validates encryption settings.
    fn validate_encryption(config: &VaulterConfig, result: &mut ValidationResult) {
        let encryption = &config.encryption;

        if let Some(env) = &encryption.shared_key_environment {
            if !config.has_environment(env) {
                result.push_error(
                    "encryption.shared_key_environment",
                    format!("Environment '{env}' is not declared"),
                );
            }
        }

        for env in encryption.keys.keys() {
            if !config.has_environment(env) {
                result.push_error(
                    format!("encryption.keys.{env}"),
                    format!("Environment '{env}' is not declared"),
                );
            }
        }

        if !encryption.keys.is_empty() {
            if encryption.mode == EncryptionMode::Asymmetric {
                result.push_error(
                    "encryption.keys",
                    "Inline keys are only supported in symmetric mode",
                );
            } else {
                result.warnings.push(String::from(
                    "encryption.keys: inline keys are stored in plain text in the config file",
                ));
            }
        }

        let kdf = &encryption.kdf;
        if kdf.iterations == 0 || kdf.parallelism == 0 {
            result.push_error("encryption.kdf", "Iterations and parallelism must be at least 1");
        }
        if kdf.memory_kib < 8 * kdf.parallelism {
            result.push_error(
                "encryption.kdf.memory_kib",
                "Memory cost must be at least 8 KiB per lane",
            );
        }
    }

    /// Validates plan and apply settings.
    fn validate_sync(config: &VaulterConfig, result: &mut ValidationResult) {
        let sync = &config.sync;

        if sync.concurrency == 0 {
            result.push_error("sync.concurrency", "Concurrency must be at least 1");
        } else if sync.concurrency > MAX_CONCURRENCY {
            result.warnings.push(format!(
                "sync.concurrency: {} is above {MAX_CONCURRENCY} and may hit backend rate limits",
                sync.concurrency
            ));
        }

        if sync.timeout_secs == 0 {
            result.push_error("sync.timeout_secs", "Timeout must be at least 1 second");
        }
    }

    /// Validates policy rules.
    fn validate_policy(config: &VaulterConfig, result: &mut ValidationResult) {
        for (env, rules) in &config.policy.forbidden {
            if !config.has_environment(env) {
                result.warnings.push(format!(
                    "policy.forbidden.{env}: environment is not declared"
                ));
            }
            for (i, scope) in rules.scopes.iter().enumerate() {
                if parse_scope(scope).is_none() {
                    result.push_error(
                        format!("policy.forbidden.{env}.scopes[{i}]"),
                        format!("Invalid scope '{scope}'"),
                    );
                }
            }
        }

        for (i, rule) in config.policy.scope_rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                result.push_error(
                    format!("policy.scope_rules[{i}].pattern"),
                    "Pattern cannot be empty",
                );
            }
            if let Some(service) = &rule.service {
                if !is_valid_service_name(service) {
                    result.push_error(
                        format!("policy.scope_rules[{i}].service"),
                        format!("Service name '{service}' is invalid"),
                    );
                }
            }
        }

        for (i, rule) in config.policy.rotation.iter().enumerate() {
            if rule.max_age_days == 0 {
                result.push_error(
                    format!("policy.rotation[{i}].max_age_days"),
                    "Rotation age must be at least 1 day",
                );
            }
        }
    }

    /// Validates retention settings.
    fn validate_versioning(config: &VaulterConfig, result: &mut ValidationResult) {
        let versioning = &config.versioning;
        if versioning.enabled && versioning.max_versions == 0 {
            result.warnings.push(String::from(
                "versioning.max_versions: 0 keeps only the latest version",
            ));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Records an error.
    fn push_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForbiddenRules;

    fn valid_config() -> VaulterConfig {
        let mut config = VaulterConfig::new("my-app");
        config.backend.path = Some(String::from("/tmp/remote"));
        config
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("my-app"));
        assert!(is_valid_name("prd"));
        assert!(is_valid_name("a1"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("My-App")); // uppercase
        assert!(!is_valid_name("1app")); // starts with number
        assert!(!is_valid_name("my_app")); // underscore
        assert!(!is_valid_name("app-")); // ends with hyphen
        assert!(!is_valid_name("my--app")); // consecutive hyphens
    }

    #[test]
    fn test_default_config_is_valid() {
        let result = ConfigValidator::new().validate(&valid_config()).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = valid_config();
        config.backend.backend_type = BackendType::S3;
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn test_undeclared_default_environment() {
        let mut config = valid_config();
        config.default_environment = String::from("qa");
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = valid_config();
        config.sync.concurrency = 0;
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert!(matches!(
            err,
            VaulterError::Config(ConfigError::ValidationError { field: Some(ref f), .. }) if f == "sync.concurrency"
        ));
    }

    #[test]
    fn test_invalid_forbidden_scope() {
        let mut config = valid_config();
        config.policy.forbidden.insert(
            String::from("prd"),
            ForbiddenRules {
                keys: vec![],
                scopes: vec![String::from("service:")],
            },
        );
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_inline_keys_warn() {
        let mut config = valid_config();
        config
            .encryption
            .keys
            .insert(String::from("dev"), String::from("passphrase"));
        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert_eq!(result.warning_count(), 1);
    }
}
