//! Per-environment key resolution.
//!
//! Keys are looked up in a fixed priority order; the first hit wins:
//!
//! 1. `VAULTER_KEY_<ENV>` (asymmetric: `VAULTER_PUBLIC_KEY_<ENV>` and
//!    `VAULTER_PRIVATE_KEY_<ENV>`), then inline `encryption.keys.<env>`
//! 2. `<key_dir>/<env>` (asymmetric: `<env>.pub` and `<env>.key`)
//! 3. `VAULTER_KEY` (asymmetric: `VAULTER_PUBLIC_KEY` and `VAULTER_PRIVATE_KEY`)
//! 4. `<key_dir>/master` (asymmetric: `master.pub` and `master.key`)

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::config::{EncryptionMode, KdfConfig, VaulterConfig};
use crate::error::{KeyError, Result, ValidationError, VaulterError};
use crate::model::{Scope, is_valid_service_name};

use super::cipher::{KeyMaterial, generate_age_keypair, generate_passphrase};

/// Prefix of every variable the resolver reads from the process environment.
const VAR_PREFIX: &str = "VAULTER_";

/// Name of the global fallback key.
const MASTER_KEY_NAME: &str = "master";

/// Cache key: (project, environment, mode).
type CacheKey = (String, String, EncryptionMode);

/// A place key material may be read from.
enum Location {
    /// A process environment variable.
    Var(String),
    /// An inline key from the configuration file.
    Inline(String),
    /// A key file.
    File(PathBuf),
}

/// Paths written by [`KeyResolver::generate_key`].
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Encryption mode of the new key.
    pub mode: EncryptionMode,
    /// Secret file (passphrase or age identity).
    pub secret_path: PathBuf,
    /// Public key file, for asymmetric keys.
    pub public_path: Option<PathBuf>,
    /// age recipient, for asymmetric keys.
    pub public_key: Option<String>,
}

/// Resolves encryption key material per environment.
pub struct KeyResolver {
    /// Project name.
    project: String,
    /// Configured encryption mode.
    mode: EncryptionMode,
    /// Directory holding key files.
    key_dir: PathBuf,
    /// Environment that encrypts shared-scope values.
    shared_key_environment: String,
    /// Inline per-environment passphrases.
    inline_keys: BTreeMap<String, String>,
    /// Argon2 parameters.
    kdf: KdfConfig,
    /// Snapshot of `VAULTER_*` process variables.
    vars: HashMap<String, String>,
    /// Resolved material.
    cache: TtlCache<CacheKey, KeyMaterial>,
}

/// Turns an environment name into a variable suffix (`prd-eu` becomes `PRD_EU`).
fn var_suffix(environment: &str) -> String {
    environment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Returns the default key directory for a project.
fn default_key_dir(project: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".vaulter").join("projects").join(project).join("keys"))
}

impl KeyResolver {
    /// Creates a resolver from the configuration, snapshotting `VAULTER_*`
    /// process variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no key directory is configured and the home
    /// directory cannot be determined.
    pub fn from_config(config: &VaulterConfig) -> Result<Self> {
        let key_dir = match &config.encryption.key_dir {
            Some(dir) => PathBuf::from(dir),
            None => default_key_dir(&config.project).ok_or_else(|| {
                VaulterError::internal("Cannot determine home directory for the key directory")
            })?,
        };

        let vars = std::env::vars()
            .filter(|(name, _)| name.starts_with(VAR_PREFIX))
            .collect();

        Ok(Self {
            project: config.project.clone(),
            mode: config.encryption.mode,
            key_dir,
            shared_key_environment: config.shared_key_environment().to_string(),
            inline_keys: config.encryption.keys.clone(),
            kdf: config.encryption.kdf,
            vars,
            cache: TtlCache::new(Duration::from_millis(config.encryption.cache_ttl_ms)),
        })
    }

    /// Replaces the process variable snapshot.
    #[must_use]
    pub fn with_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars = vars;
        self.cache.invalidate();
        self
    }

    /// Overrides the key directory.
    #[must_use]
    pub fn with_key_dir(mut self, key_dir: impl Into<PathBuf>) -> Self {
        self.key_dir = key_dir.into();
        self.cache.invalidate();
        self
    }

    /// Returns the key directory.
    #[must_use]
    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Returns the configured encryption mode.
    #[must_use]
    pub const fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Resolves key material for an environment.
    ///
    /// Returns `Ok(None)` when no source provides a key.
    ///
    /// # Errors
    ///
    /// Returns an error if a source exists but cannot be read or parsed.
    pub fn resolve(&self, environment: &str) -> Result<Option<KeyMaterial>> {
        let cache_key = (self.project.clone(), environment.to_string(), self.mode);
        if let Some(material) = self.cache.get(&cache_key) {
            return Ok(Some(material));
        }

        let resolved = match self.mode {
            EncryptionMode::Symmetric => self.resolve_symmetric(environment)?,
            EncryptionMode::Asymmetric => self.resolve_asymmetric(environment)?,
        };

        match &resolved {
            Some(material) => {
                debug!(
                    "Resolved {} key for {}/{} from {}",
                    material.algorithm(),
                    self.project,
                    environment,
                    material.source()
                );
                self.cache.insert(cache_key, material.clone());
            }
            None => debug!("No key found for {}/{}", self.project, environment),
        }

        Ok(resolved)
    }

    /// Resolves key material, failing when none exists.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::NotFound` when no source provides a key.
    pub fn require(&self, environment: &str) -> Result<KeyMaterial> {
        self.resolve(environment)?.ok_or_else(|| {
            KeyError::NotFound {
                project: self.project.clone(),
                environment: environment.to_string(),
            }
            .into()
        })
    }

    /// Returns the environment whose key encrypts values of `scope`.
    #[must_use]
    pub fn key_environment<'a>(&'a self, environment: &'a str, scope: &Scope) -> &'a str {
        if scope.is_shared() {
            &self.shared_key_environment
        } else {
            environment
        }
    }

    /// Resolves key material for a scope; shared values use the shared key environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source exists but cannot be read or parsed.
    pub fn resolve_for_scope(&self, environment: &str, scope: &Scope) -> Result<Option<KeyMaterial>> {
        self.resolve(self.key_environment(environment, scope))
    }

    /// Resolves key material for a scope, failing when none exists.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::NotFound` when no source provides a key.
    pub fn require_for_scope(&self, environment: &str, scope: &Scope) -> Result<KeyMaterial> {
        self.require(self.key_environment(environment, scope))
    }

    /// Drops every cached key.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Drops cached keys for one environment.
    pub fn invalidate_environment(&self, environment: &str) {
        self.cache.invalidate_where(|(_, env, _)| env == environment);
    }

    /// Returns the override that would shadow a key file for `environment`,
    /// if one is set.
    ///
    /// A key written by [`Self::generate_key`] is only used when this is `None`.
    #[must_use]
    pub fn shadowing_override(&self, environment: &str) -> Option<String> {
        let suffix = var_suffix(environment);
        let candidates = match self.mode {
            EncryptionMode::Symmetric => vec![
                Location::Var(format!("VAULTER_KEY_{suffix}")),
                Location::Inline(environment.to_string()),
            ],
            EncryptionMode::Asymmetric => vec![
                Location::Var(format!("VAULTER_PUBLIC_KEY_{suffix}")),
                Location::Var(format!("VAULTER_PRIVATE_KEY_{suffix}")),
            ],
        };

        candidates
            .into_iter()
            .find(|location| matches!(self.read(location), Ok(Some(_))))
            .map(|location| location.describe())
    }

    /// Generates a fresh key for an environment (or `master`) in the key directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, a key already exists and
    /// `force` is false, or the files cannot be written.
    pub fn generate_key(&self, environment: &str, force: bool) -> Result<GeneratedKey> {
        if !is_valid_service_name(environment) {
            return Err(ValidationError::InvalidKey {
                key: environment.to_string(),
                reason: String::from("not a valid environment name"),
            }
            .into());
        }

        std::fs::create_dir_all(&self.key_dir).map_err(|e| KeyError::FileError {
            path: self.key_dir.clone(),
            message: e.to_string(),
        })?;
        set_mode(&self.key_dir, 0o700)?;

        let generated = match self.mode {
            EncryptionMode::Symmetric => {
                let path = self.key_dir.join(environment);
                refuse_overwrite(&path, force)?;
                write_key_file(&path, &generate_passphrase(), 0o600)?;
                GeneratedKey {
                    mode: self.mode,
                    secret_path: path,
                    public_path: None,
                    public_key: None,
                }
            }
            EncryptionMode::Asymmetric => {
                let secret_path = self.key_dir.join(format!("{environment}.key"));
                let public_path = self.key_dir.join(format!("{environment}.pub"));
                refuse_overwrite(&secret_path, force)?;

                let (private, public) = generate_age_keypair();
                write_key_file(&secret_path, &private, 0o600)?;
                write_key_file(&public_path, &public, 0o644)?;
                GeneratedKey {
                    mode: self.mode,
                    secret_path,
                    public_path: Some(public_path),
                    public_key: Some(public),
                }
            }
        };

        if environment == MASTER_KEY_NAME {
            self.invalidate();
        } else {
            self.invalidate_environment(environment);
        }

        info!(
            "Generated {} key for {}/{} at {}",
            self.mode,
            self.project,
            environment,
            generated.secret_path.display()
        );
        Ok(generated)
    }

    /// Copies the key files of an environment to `<name>.<timestamp>.bak`
    /// in the key directory. Missing files are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a copy fails.
    pub fn backup_key(&self, environment: &str) -> Result<Vec<PathBuf>> {
        let names = match self.mode {
            EncryptionMode::Symmetric => vec![environment.to_string()],
            EncryptionMode::Asymmetric => vec![format!("{environment}.key"), format!("{environment}.pub")],
        };
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");

        let mut backups = Vec::new();
        for name in names {
            let path = self.key_dir.join(&name);
            if !path.is_file() {
                continue;
            }
            let copy = self.key_dir.join(format!("{name}.{stamp}.bak"));
            std::fs::copy(&path, &copy).map_err(|e| KeyError::FileError {
                path: copy.clone(),
                message: e.to_string(),
            })?;
            debug!("Backed up {} to {}", path.display(), copy.display());
            backups.push(copy);
        }
        Ok(backups)
    }

    /// Finds the backed-up key of an environment whose fingerprint matches.
    ///
    /// Only backups written by [`Self::backup_key`] are considered.
    ///
    /// # Errors
    ///
    /// Returns an error if the key directory or a backup cannot be read.
    pub fn retired_key(&self, environment: &str, fingerprint: &str) -> Result<Option<KeyMaterial>> {
        if !self.key_dir.is_dir() {
            return Ok(None);
        }
        let secret_name = match self.mode {
            EncryptionMode::Symmetric => environment.to_string(),
            EncryptionMode::Asymmetric => format!("{environment}.key"),
        };

        let entries = std::fs::read_dir(&self.key_dir).map_err(|e| KeyError::FileError {
            path: self.key_dir.clone(),
            message: e.to_string(),
        })?;
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| is_backup_of(name, &secret_name))
            })
            .collect();
        // Newest first.
        backups.sort_unstable_by(|a, b| b.cmp(a));

        for path in backups {
            let location = Location::File(path);
            let Some(secret) = self.read(&location)? else {
                continue;
            };
            let material = match self.mode {
                EncryptionMode::Symmetric => KeyMaterial::symmetric(
                    &self.project,
                    environment,
                    &location.describe(),
                    &secret,
                    &self.kdf,
                )?,
                EncryptionMode::Asymmetric => {
                    KeyMaterial::asymmetric(&self.project, environment, &location.describe(), None, Some(&secret))?
                }
            };
            if material.fingerprint() == fingerprint {
                debug!("Found retired key {fingerprint} of {environment} at {}", location.describe());
                return Ok(Some(material));
            }
        }
        Ok(None)
    }

    /// Walks the symmetric priority chain.
    fn resolve_symmetric(&self, environment: &str) -> Result<Option<KeyMaterial>> {
        let chain = [
            Location::Var(format!("VAULTER_KEY_{}", var_suffix(environment))),
            Location::Inline(environment.to_string()),
            Location::File(self.key_dir.join(environment)),
            Location::Var(String::from("VAULTER_KEY")),
            Location::File(self.key_dir.join(MASTER_KEY_NAME)),
        ];

        for location in &chain {
            if let Some(passphrase) = self.read(location)? {
                let material = KeyMaterial::symmetric(
                    &self.project,
                    environment,
                    &location.describe(),
                    &passphrase,
                    &self.kdf,
                )?;
                return Ok(Some(material));
            }
        }

        Ok(None)
    }

    /// Walks the asymmetric priority chain.
    fn resolve_asymmetric(&self, environment: &str) -> Result<Option<KeyMaterial>> {
        let suffix = var_suffix(environment);
        let chain = [
            (
                Location::Var(format!("VAULTER_PUBLIC_KEY_{suffix}")),
                Location::Var(format!("VAULTER_PRIVATE_KEY_{suffix}")),
            ),
            (
                Location::File(self.key_dir.join(format!("{environment}.pub"))),
                Location::File(self.key_dir.join(format!("{environment}.key"))),
            ),
            (
                Location::Var(String::from("VAULTER_PUBLIC_KEY")),
                Location::Var(String::from("VAULTER_PRIVATE_KEY")),
            ),
            (
                Location::File(self.key_dir.join(format!("{MASTER_KEY_NAME}.pub"))),
                Location::File(self.key_dir.join(format!("{MASTER_KEY_NAME}.key"))),
            ),
        ];

        for (public_location, private_location) in &chain {
            let public = self.read(public_location)?;
            let private = self.read(private_location)?;
            if public.is_none() && private.is_none() {
                continue;
            }

            let source = if private.is_some() {
                private_location.describe()
            } else {
                public_location.describe()
            };
            let material = KeyMaterial::asymmetric(
                &self.project,
                environment,
                &source,
                public.as_deref(),
                private.as_deref(),
            )?;
            return Ok(Some(material));
        }

        Ok(None)
    }

    /// Reads a location, treating blank values as absent.
    fn read(&self, location: &Location) -> Result<Option<String>> {
        let raw = match location {
            Location::Var(name) => self.vars.get(name).cloned(),
            Location::Inline(env) => self.inline_keys.get(env).cloned(),
            Location::File(path) => {
                if !path.is_file() {
                    return Ok(None);
                }
                let content = std::fs::read_to_string(path).map_err(|e| KeyError::FileError {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                Some(content)
            }
        };

        Ok(raw
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }
}

impl Location {
    /// Describes the location for logs and errors, never the value.
    fn describe(&self) -> String {
        match self {
            Self::Var(name) => format!("env:{name}"),
            Self::Inline(env) => format!("config:encryption.keys.{env}"),
            Self::File(path) => path.display().to_string(),
        }
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("project", &self.project)
            .field("mode", &self.mode)
            .field("key_dir", &self.key_dir)
            .field("shared_key_environment", &self.shared_key_environment)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Returns true if `name` is `<secret_name>.<timestamp>.bak`.
fn is_backup_of(name: &str, secret_name: &str) -> bool {
    name.strip_prefix(secret_name)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(".bak"))
        .is_some_and(|stamp| {
            !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit() || c == 'T' || c == 'Z')
        })
}

/// Fails if a key file exists and overwriting was not requested.
fn refuse_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(KeyError::FileError {
            path: path.to_path_buf(),
            message: String::from("key already exists; pass force to replace it"),
        }
        .into());
    }
    Ok(())
}

/// Writes a key file with the given permissions.
fn write_key_file(path: &Path, content: &str, mode: u32) -> Result<()> {
    std::fs::write(path, format!("{content}\n")).map_err(|e| KeyError::FileError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    set_mode(path, mode)
}

/// Restricts file permissions on Unix.
#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        KeyError::FileError {
            path: path.to_path_buf(),
            message: format!("failed to set permissions: {e}"),
        }
        .into()
    })
}

/// Permissions are left to the platform default elsewhere.
#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(mode: EncryptionMode) -> VaulterConfig {
        let mut config = VaulterConfig::new("app");
        config.encryption.mode = mode;
        config.encryption.kdf = KdfConfig {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        };
        config
    }

    fn resolver(config: &VaulterConfig, dir: &TempDir, vars: &[(&str, &str)]) -> KeyResolver {
        KeyResolver::from_config(config)
            .expect("resolver")
            .with_key_dir(dir.path())
            .with_vars(
                vars.iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            )
    }

    #[test]
    fn test_none_when_no_source() {
        let dir = TempDir::new().expect("temp dir");
        let resolver = resolver(&config(EncryptionMode::Symmetric), &dir, &[]);
        assert!(resolver.resolve("dev").expect("resolve").is_none());
        assert!(matches!(
            resolver.require("dev"),
            Err(VaulterError::Key(KeyError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_symmetric_priority_chain() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("master"), "master-pass\n").expect("write");
        std::fs::write(dir.path().join("prd"), "file-pass\n").expect("write");

        let mut cfg = config(EncryptionMode::Symmetric);
        cfg.encryption
            .keys
            .insert(String::from("stg"), String::from("inline-pass"));

        let resolver = resolver(
            &cfg,
            &dir,
            &[("VAULTER_KEY_DEV", "env-pass"), ("VAULTER_KEY", "global-pass")],
        );

        let source = |env: &str| resolver.require(env).expect("key").source().to_string();
        assert_eq!(source("dev"), "env:VAULTER_KEY_DEV");
        assert_eq!(source("stg"), "config:encryption.keys.stg");
        assert_eq!(source("prd"), dir.path().join("prd").display().to_string());
        assert_eq!(source("qa"), "env:VAULTER_KEY");
    }

    #[test]
    fn test_master_file_is_last_resort() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("master"), "master-pass").expect("write");
        let resolver = resolver(&config(EncryptionMode::Symmetric), &dir, &[]);
        let key = resolver.require("qa").expect("key");
        assert_eq!(key.source(), dir.path().join("master").display().to_string());
    }

    #[test]
    fn test_env_var_beats_inline_key() {
        let dir = TempDir::new().expect("temp dir");
        let mut cfg = config(EncryptionMode::Symmetric);
        cfg.encryption
            .keys
            .insert(String::from("prd-eu"), String::from("inline"));
        let resolver = resolver(&cfg, &dir, &[("VAULTER_KEY_PRD_EU", "env")]);
        assert_eq!(
            resolver.require("prd-eu").expect("key").source(),
            "env:VAULTER_KEY_PRD_EU"
        );
    }

    #[test]
    fn test_shared_scope_uses_shared_key_environment() {
        let dir = TempDir::new().expect("temp dir");
        let mut cfg = config(EncryptionMode::Symmetric);
        cfg.encryption.shared_key_environment = Some(String::from("prd"));
        let resolver = resolver(
            &cfg,
            &dir,
            &[("VAULTER_KEY_PRD", "shared-pass"), ("VAULTER_KEY_DEV", "dev-pass")],
        );

        let shared = resolver.require_for_scope("dev", &Scope::Shared).expect("key");
        assert_eq!(shared.environment(), "prd");

        let service = resolver
            .require_for_scope("dev", &Scope::Service(String::from("api")))
            .expect("key");
        assert_eq!(service.environment(), "dev");
    }

    #[test]
    fn test_cache_and_invalidate() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("dev");
        std::fs::write(&path, "pass").expect("write");

        let resolver = resolver(&config(EncryptionMode::Symmetric), &dir, &[]);
        assert!(resolver.resolve("dev").expect("resolve").is_some());

        std::fs::remove_file(&path).expect("remove");
        assert!(resolver.resolve("dev").expect("cached").is_some());

        resolver.invalidate_environment("dev");
        assert!(resolver.resolve("dev").expect("resolve").is_none());
    }

    #[test]
    fn test_generate_symmetric_key() {
        let dir = TempDir::new().expect("temp dir");
        let resolver = resolver(&config(EncryptionMode::Symmetric), &dir, &[]);

        let generated = resolver.generate_key("dev", false).expect("generated");
        assert_eq!(generated.secret_path, dir.path().join("dev"));
        assert!(generated.public_key.is_none());

        let key = resolver.require("dev").expect("key");
        let stored = key.encrypt("value").expect("encrypt");
        assert_eq!(key.decrypt(&stored).expect("decrypt"), "value");

        assert!(resolver.generate_key("dev", false).is_err());
        assert!(resolver.generate_key("dev", true).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let resolver = resolver(&config(EncryptionMode::Asymmetric), &dir, &[]);
        let generated = resolver.generate_key("prd", false).expect("generated");

        let secret_mode = std::fs::metadata(&generated.secret_path)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(secret_mode & 0o777, 0o600);

        let public_path = generated.public_path.expect("public path");
        let public_mode = std::fs::metadata(public_path)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(public_mode & 0o777, 0o644);
    }

    #[test]
    fn test_asymmetric_files_and_public_only_var() {
        let dir = TempDir::new().expect("temp dir");
        let cfg = config(EncryptionMode::Asymmetric);
        let generator = resolver(&cfg, &dir, &[]);
        let generated = generator.generate_key("prd", false).expect("generated");
        let public = generated.public_key.expect("public key");

        let full = generator.require("prd").expect("key");
        assert!(full.can_decrypt());
        assert_eq!(full.public_key().as_deref(), Some(public.as_str()));

        let other_dir = TempDir::new().expect("temp dir");
        let encrypt_only = resolver(&cfg, &other_dir, &[("VAULTER_PUBLIC_KEY_PRD", public.as_str())]);
        let key = encrypt_only.require("prd").expect("key");
        assert!(!key.can_decrypt());

        let stored = key.encrypt("value").expect("encrypt");
        assert_eq!(full.decrypt(&stored).expect("decrypt"), "value");
        assert!(matches!(
            key.decrypt(&stored),
            Err(VaulterError::Key(KeyError::PrivateKeyMissing { .. }))
        ));
    }

    #[test]
    fn test_invalid_key_material_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let resolver = resolver(
            &config(EncryptionMode::Asymmetric),
            &dir,
            &[("VAULTER_PRIVATE_KEY", "not-an-age-key")],
        );
        assert!(matches!(
            resolver.resolve("dev"),
            Err(VaulterError::Key(KeyError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_shadowing_override() {
        let dir = TempDir::new().expect("temp dir");
        let mut cfg = config(EncryptionMode::Symmetric);
        cfg.encryption
            .keys
            .insert(String::from("stg"), String::from("inline"));
        let resolver = resolver(&cfg, &dir, &[("VAULTER_KEY_PRD", "env")]);

        assert_eq!(
            resolver.shadowing_override("prd").as_deref(),
            Some("env:VAULTER_KEY_PRD")
        );
        assert_eq!(
            resolver.shadowing_override("stg").as_deref(),
            Some("config:encryption.keys.stg")
        );
        assert!(resolver.shadowing_override("dev").is_none());
    }

    #[test]
    fn test_backup_names() {
        assert!(is_backup_of("prd.20260101T120000123Z.bak", "prd"));
        assert!(is_backup_of("prd.key.20260101T120000Z.bak", "prd.key"));
        assert!(!is_backup_of("prd.pub.20260101T120000Z.bak", "prd.key"));
        assert!(!is_backup_of("prd-eu.20260101T120000Z.bak", "prd"));
        assert!(!is_backup_of("prd..bak", "prd"));
        assert!(!is_backup_of("prd", "prd"));
    }

    #[test]
    fn test_retired_symmetric_key_found_by_fingerprint() {
        let dir = TempDir::new().expect("temp dir");
        let resolver = resolver(&config(EncryptionMode::Symmetric), &dir, &[]);
        resolver.generate_key("prd", false).expect("generated");
        let old = resolver.require("prd").expect("key");

        let backups = resolver.backup_key("prd").expect("backup");
        assert_eq!(backups.len(), 1);
        resolver.generate_key("prd", true).expect("rotated");
        let new = resolver.require("prd").expect("key");
        assert_ne!(old.fingerprint(), new.fingerprint());

        let retired = resolver
            .retired_key("prd", &old.fingerprint())
            .expect("scan")
            .expect("retired key");
        let stored = old.encrypt("value").expect("encrypt");
        assert_eq!(retired.decrypt(&stored).expect("decrypt"), "value");
        assert!(resolver.retired_key("prd", "0000000000000000").expect("scan").is_none());
    }

    #[test]
    fn test_retired_asymmetric_key_found_by_fingerprint() {
        let dir = TempDir::new().expect("temp dir");
        let resolver = resolver(&config(EncryptionMode::Asymmetric), &dir, &[]);
        resolver.generate_key("prd", false).expect("generated");
        let old = resolver.require("prd").expect("key");

        let backups = resolver.backup_key("prd").expect("backup");
        assert_eq!(backups.len(), 2);
        resolver.generate_key("prd", true).expect("rotated");

        let retired = resolver
            .retired_key("prd", &old.fingerprint())
            .expect("scan")
            .expect("retired key");
        assert!(retired.can_decrypt());
        assert_eq!(retired.public_key(), old.public_key());
    }

    #[test]
    fn test_generate_rejects_path_names() {
        let dir = TempDir::new().expect("temp dir");
        let resolver = resolver(&config(EncryptionMode::Symmetric), &dir, &[]);
        assert!(resolver.generate_key("../escape", false).is_err());
    }
}
