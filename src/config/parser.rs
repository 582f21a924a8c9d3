//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, VaulterError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{BackendType, VaulterConfig};

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["vaulter.yaml", "vaulter.yml", ".vaulter/config.yaml"];

/// Configuration parser for loading project configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// Relative `local.path`, `backend.path` and `encryption.key_dir` values
    /// are resolved against the base path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<VaulterConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(VaulterError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            VaulterError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        self.resolve_paths(&mut config);
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<VaulterConfig> {
        debug!("Parsing YAML configuration");

        let config: VaulterConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            VaulterError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Successfully parsed configuration for project: {}", config.project);
        Ok(config)
    }

    /// Loads configuration with process environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<VaulterConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies `VAULTER_*` overrides read through `lookup`.
    pub fn apply_env_overrides(config: &mut VaulterConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(project) = lookup("VAULTER_PROJECT") {
            debug!("Overriding project from environment");
            config.project = project;
        }

        if let Some(environment) = lookup("VAULTER_ENVIRONMENT") {
            debug!("Overriding default_environment from environment");
            config.default_environment = environment;
        }

        if let Some(path) = lookup("VAULTER_BACKEND_PATH") {
            debug!("Overriding backend.path from environment");
            config.backend.path = Some(path);
        }

        if let Some(bucket) = lookup("VAULTER_BACKEND_BUCKET") {
            debug!("Overriding backend.bucket from environment");
            config.backend.backend_type = BackendType::S3;
            config.backend.bucket = Some(bucket);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                VaulterError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Makes relative paths absolute against the base path.
    fn resolve_paths(&self, config: &mut VaulterConfig) {
        let Some(base) = &self.base_path else {
            return;
        };

        let resolve = |raw: &str| -> String {
            let path = Path::new(raw);
            if path.is_absolute() {
                raw.to_string()
            } else {
                base.join(path).display().to_string()
            }
        };

        config.local.path = resolve(&config.local.path);
        if let Some(path) = config.backend.path.as_deref() {
            config.backend.path = Some(resolve(path));
        }
        if let Some(dir) = config.encryption.key_dir.as_deref() {
            config.encryption.key_dir = Some(resolve(dir));
        }
    }
}

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(VaulterError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConflictStrategy, EncryptionMode, PolicyMode, RetentionMode};
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project: my-app
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("valid config");
        assert_eq!(config.project, "my-app");
        assert_eq!(config.default_environment, "dev");
        assert_eq!(config.backend.backend_type, BackendType::Fs);
        assert_eq!(config.sync.conflict, ConflictStrategy::Local);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
project: my-app
default_environment: dev
environments: [dev, prd]
services: [api, worker]
local:
  path: .vaulter/local
backend:
  type: s3
  bucket: my-bucket
  prefix: vaulter
  region: eu-west-1
encryption:
  mode: asymmetric
  shared_key_environment: prd
  cache_ttl_ms: 500
sync:
  conflict: error
  prune: true
  concurrency: 8
  timeout_secs: 10
policy:
  mode: strict
  sensitive_patterns: ["*_DSN"]
  forbidden:
    prd:
      keys: ["DEBUG*"]
      scopes: ["service:sandbox"]
  scope_rules:
    - pattern: "DATABASE_*"
      expected: shared
      reason: databases are shared
  required:
    - key: DATABASE_URL
  rotation:
    - pattern: "*_TOKEN"
      max_age_days: 90
versioning:
  retention_mode: both
  max_versions: 5
  retention_days: 14
"#;
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("valid config");
        assert_eq!(config.backend.backend_type, BackendType::S3);
        assert_eq!(config.backend.bucket.as_deref(), Some("my-bucket"));
        assert_eq!(config.encryption.mode, EncryptionMode::Asymmetric);
        assert_eq!(config.shared_key_environment(), "prd");
        assert_eq!(config.sync.conflict, ConflictStrategy::Error);
        assert!(config.sync.prune);
        assert_eq!(config.policy.mode, PolicyMode::Strict);
        assert_eq!(config.policy.forbidden["prd"].keys, vec![String::from("DEBUG*")]);
        assert_eq!(config.policy.scope_rules.len(), 1);
        assert_eq!(config.versioning.retention_mode, RetentionMode::Both);
        assert_eq!(config.versioning.max_versions, 5);
    }

    #[test]
    fn test_parse_rejects_unknown_enum() {
        let yaml = r"
project: my-app
sync:
  conflict: newest
";
        let result = ConfigParser::new().parse_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(VaulterError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = VaulterConfig::new("my-app");
        let vars: HashMap<&str, &str> = [
            ("VAULTER_PROJECT", "other"),
            ("VAULTER_ENVIRONMENT", "prd"),
            ("VAULTER_BACKEND_BUCKET", "bucket"),
        ]
        .into_iter()
        .collect();

        ConfigParser::apply_env_overrides(&mut config, |name| {
            vars.get(name).map(|v| (*v).to_string())
        });

        assert_eq!(config.project, "other");
        assert_eq!(config.default_environment, "prd");
        assert_eq!(config.backend.backend_type, BackendType::S3);
        assert_eq!(config.backend.bucket.as_deref(), Some("bucket"));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("vaulter.yaml"), "project: app\n").expect("write");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, dir.path().join("vaulter.yaml"));
    }

    #[test]
    fn test_load_file_resolves_relative_paths() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("vaulter.yaml");
        std::fs::write(&path, "project: app\nbackend:\n  path: remote\n").expect("write");

        let config = ConfigParser::new()
            .with_base_path(dir.path())
            .load_file(&path)
            .expect("loaded");
        assert_eq!(config.local_root(), dir.path().join(".vaulter/local"));
        assert_eq!(
            config.backend.path.as_deref(),
            Some(dir.path().join("remote").display().to_string().as_str())
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = ConfigParser::new().load_file("/nonexistent/vaulter.yaml");
        assert!(matches!(
            result,
            Err(VaulterError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
