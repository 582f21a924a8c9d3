//! Configuration schema types for the sync core.
//!
//! This module defines all the structs that map to the `vaulter.yaml` file.
//! Every section except `project` is optional and falls back to defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root configuration structure for a Vaulter project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaulterConfig {
    /// Project name.
    pub project: String,
    /// Environment used when none is given.
    #[serde(default = "default_environment")]
    pub default_environment: String,
    /// Declared environments.
    #[serde(default = "default_environments")]
    pub environments: Vec<String>,
    /// Declared services (optional; an empty list accepts any valid name).
    #[serde(default)]
    pub services: Vec<String>,
    /// Local state settings.
    #[serde(default)]
    pub local: LocalConfig,
    /// Remote backend settings.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Encryption and key resolution settings.
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Plan and apply settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Write policy settings.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Version history settings.
    #[serde(default)]
    pub versioning: VersioningConfig,
}

/// Local state settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalConfig {
    /// Root directory of the local state files.
    #[serde(default = "default_local_path")]
    pub path: String,
}

/// Remote backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackendConfig {
    /// Backend type.
    #[serde(rename = "type", default)]
    pub backend_type: BackendType,
    /// Root directory (fs backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for the s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (uses the AWS default chain if unset).
    #[serde(default)]
    pub region: Option<String>,
}

/// Backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Directory tree of JSON records.
    #[default]
    Fs,
    /// AWS S3 objects.
    S3,
}

/// Encryption and key resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Encryption mode.
    #[serde(default)]
    pub mode: EncryptionMode,
    /// Directory holding key files (defaults to `~/.vaulter/projects/<project>/keys`).
    #[serde(default)]
    pub key_dir: Option<String>,
    /// Environment whose key encrypts shared-scope values.
    #[serde(default)]
    pub shared_key_environment: Option<String>,
    /// Lifetime of resolved keys in the cache, in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Inline per-environment passphrases (symmetric mode only).
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
    /// Key derivation parameters.
    #[serde(default)]
    pub kdf: KdfConfig,
}

/// Encryption modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Passphrase-derived AES-256-GCM.
    #[default]
    Symmetric,
    /// age x25519 public/private key pair.
    Asymmetric,
}

/// Argon2id parameters for deriving symmetric keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfConfig {
    /// Memory cost in KiB.
    #[serde(default = "default_kdf_memory")]
    pub memory_kib: u32,
    /// Number of passes.
    #[serde(default = "default_kdf_iterations")]
    pub iterations: u32,
    /// Degree of parallelism.
    #[serde(default = "default_kdf_parallelism")]
    pub parallelism: u32,
}

/// Plan and apply settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// How differing local and remote values are resolved.
    #[serde(default)]
    pub conflict: ConflictStrategy,
    /// Whether remote-only variables are deleted.
    #[serde(default)]
    pub prune: bool,
    /// Maximum number of backend calls in flight during apply.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Deadline for a single backend call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Conflict strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Local value wins.
    #[default]
    Local,
    /// Remote value wins; no change is planned.
    Remote,
    /// Planning fails listing every conflicting key.
    Error,
}

/// Write policy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PolicyConfig {
    /// Enforcement mode for scope rules.
    #[serde(default)]
    pub mode: PolicyMode,
    /// Extra glob patterns marking keys as sensitive.
    #[serde(default)]
    pub sensitive_patterns: Vec<String>,
    /// Forbidden keys and scopes per environment.
    #[serde(default)]
    pub forbidden: BTreeMap<String, ForbiddenRules>,
    /// Expected scope per key pattern.
    #[serde(default)]
    pub scope_rules: Vec<ScopeRule>,
    /// Variables every environment must define.
    #[serde(default)]
    pub required: Vec<RequiredVariable>,
    /// Maximum age of matching secrets before rotation is due.
    #[serde(default)]
    pub rotation: Vec<RotationRule>,
}

/// Policy enforcement modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Scope rules are ignored.
    Off,
    /// Violations produce warnings.
    #[default]
    Warn,
    /// Violations block the write.
    Strict,
}

/// Forbidden keys and scopes for one environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ForbiddenRules {
    /// Glob patterns of keys that cannot be written.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Scopes that cannot be written (`shared`, `service:<name>`).
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Expected scope for keys matching a pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeRule {
    /// Glob pattern of keys.
    pub pattern: String,
    /// Scope kind the keys belong in.
    pub expected: ExpectedScope,
    /// Specific service, when `expected` is `service`.
    #[serde(default)]
    pub service: Option<String>,
    /// Explanation shown with violations.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Scope kinds for scope rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedScope {
    /// The shared scope.
    Shared,
    /// Any (or a specific) service scope.
    Service,
}

/// A variable that must be defined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequiredVariable {
    /// Variable name.
    pub key: String,
    /// Environments the requirement applies to (empty means all).
    #[serde(default)]
    pub environments: Vec<String>,
}

/// Rotation deadline for keys matching a pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationRule {
    /// Glob pattern of keys.
    pub pattern: String,
    /// Maximum age in days.
    pub max_age_days: u32,
}

/// Version history settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersioningConfig {
    /// Whether version records are written.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Retention mode.
    #[serde(default)]
    pub retention_mode: RetentionMode,
    /// Versions kept in `count` mode.
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
    /// Days kept in `days` mode.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Retention modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    /// Keep the last `max_versions` entries.
    #[default]
    Count,
    /// Keep entries newer than `retention_days`.
    Days,
    /// Keep entries satisfying either rule.
    Both,
}

// Default value functions

const fn default_true() -> bool {
    true
}

const fn default_cache_ttl_ms() -> u64 {
    1_000
}

const fn default_kdf_memory() -> u32 {
    19_456
}

const fn default_kdf_iterations() -> u32 {
    2
}

const fn default_kdf_parallelism() -> u32 {
    1
}

const fn default_concurrency() -> usize {
    4
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_versions() -> usize {
    10
}

const fn default_retention_days() -> u32 {
    30
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_environments() -> Vec<String> {
    vec![
        String::from("dev"),
        String::from("stg"),
        String::from("prd"),
    ]
}

fn default_local_path() -> String {
    String::from(".vaulter/local")
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            mode: EncryptionMode::default(),
            key_dir: None,
            shared_key_environment: None,
            cache_ttl_ms: default_cache_ttl_ms(),
            keys: BTreeMap::new(),
            kdf: KdfConfig::default(),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_kdf_memory(),
            iterations: default_kdf_iterations(),
            parallelism: default_kdf_parallelism(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict: ConflictStrategy::default(),
            prune: false,
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_mode: RetentionMode::default(),
            max_versions: default_max_versions(),
            retention_days: default_retention_days(),
        }
    }
}

impl VaulterConfig {
    /// Creates a configuration with defaults for every optional section.
    #[must_use]
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            default_environment: default_environment(),
            environments: default_environments(),
            services: Vec::new(),
            local: LocalConfig::default(),
            backend: BackendConfig::default(),
            encryption: EncryptionConfig::default(),
            sync: SyncConfig::default(),
            policy: PolicyConfig::default(),
            versioning: VersioningConfig::default(),
        }
    }

    /// Returns the environment whose key encrypts shared-scope values.
    #[must_use]
    pub fn shared_key_environment(&self) -> &str {
        self.encryption
            .shared_key_environment
            .as_deref()
            .unwrap_or(&self.default_environment)
    }

    /// Returns true if the environment is declared.
    #[must_use]
    pub fn has_environment(&self, name: &str) -> bool {
        self.environments.iter().any(|e| e == name)
    }

    /// Returns the local state root.
    #[must_use]
    pub fn local_root(&self) -> PathBuf {
        PathBuf::from(&self.local.path)
    }

    /// Returns the rotation deadline in days for a key, if any rule matches.
    #[must_use]
    pub fn rotation_days_for(&self, key: &str) -> Option<u32> {
        self.policy
            .rotation
            .iter()
            .find(|rule| crate::model::glob_match(&rule.pattern, key))
            .map(|rule| rule.max_age_days)
    }
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symmetric => write!(f, "symmetric"),
            Self::Asymmetric => write!(f, "asymmetric"),
        }
    }
}

impl RequiredVariable {
    /// Returns true if the requirement applies to the environment.
    #[must_use]
    pub fn applies_to(&self, environment: &str) -> bool {
        self.environments.is_empty() || self.environments.iter().any(|e| e == environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VaulterConfig::new("app");
        assert_eq!(config.default_environment, "dev");
        assert_eq!(config.shared_key_environment(), "dev");
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.timeout_secs, 30);
        assert_eq!(config.encryption.cache_ttl_ms, 1_000);
        assert_eq!(config.encryption.kdf.memory_kib, 19_456);
        assert!(config.versioning.enabled);
        assert!(config.has_environment("prd"));
        assert!(!config.has_environment("qa"));
    }

    #[test]
    fn test_shared_key_environment_override() {
        let mut config = VaulterConfig::new("app");
        config.encryption.shared_key_environment = Some(String::from("prd"));
        assert_eq!(config.shared_key_environment(), "prd");
    }

    #[test]
    fn test_rotation_lookup() {
        let mut config = VaulterConfig::new("app");
        config.policy.rotation.push(RotationRule {
            pattern: String::from("*_TOKEN"),
            max_age_days: 90,
        });
        assert_eq!(config.rotation_days_for("GITHUB_TOKEN"), Some(90));
        assert_eq!(config.rotation_days_for("PORT"), None);
    }

    #[test]
    fn test_required_applies_to() {
        let everywhere = RequiredVariable {
            key: String::from("DATABASE_URL"),
            environments: vec![],
        };
        let prod_only = RequiredVariable {
            key: String::from("SENTRY_DSN"),
            environments: vec![String::from("prd")],
        };
        assert!(everywhere.applies_to("dev"));
        assert!(prod_only.applies_to("prd"));
        assert!(!prod_only.applies_to("dev"));
    }
}
