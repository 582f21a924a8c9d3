//! Local state store.
//!
//! Variables live in dotenv files under the local root:
//!
//! ```text
//! <root>/<env>/configs.env
//! <root>/<env>/secrets.env
//! <root>/<env>/services/<name>/configs.env
//! <root>/<env>/services/<name>/secrets.env
//! <root>/provenance.jsonl
//! ```
//!
//! Expected conditions ("already exists", "not found") are reported through
//! `LocalWriteResult::success` and warnings, never as errors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, StateError, ValidationError};
use crate::model::{Scope, is_probably_sensitive, is_valid_service_name, validate_key};

use super::envfile::{read_env_file, write_env_file};
use super::provenance::{MutationContext, Operation, ProvenanceLog};

/// File holding non-sensitive values.
pub const CONFIGS_FILE: &str = "configs.env";

/// File holding sensitive values.
pub const SECRETS_FILE: &str = "secrets.env";

/// Directory holding per-service files.
const SERVICES_DIR: &str = "services";

/// Provenance log file name.
const PROVENANCE_FILE: &str = "provenance.jsonl";

/// A write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableWrite {
    /// Variable name.
    pub key: String,
    /// Plaintext value.
    pub value: String,
    /// Target environment.
    pub environment: String,
    /// Target scope.
    pub scope: Scope,
    /// Whether the value is a secret.
    pub sensitive: bool,
}

/// Outcome of a local mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalWriteResult {
    /// Whether the mutation was performed.
    pub success: bool,
    /// Human-readable notes.
    pub warnings: Vec<String>,
}

/// Options for [`LocalStateStore::move_variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOptions {
    /// Replace the key when the destination already holds it.
    pub overwrite: bool,
    /// Remove the key from the source scope (false copies).
    pub delete_original: bool,
}

/// A locally stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Plaintext value.
    pub value: String,
    /// Whether it lives in the secrets file.
    pub sensitive: bool,
}

/// Every local variable of one environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalState {
    /// Environment name.
    pub environment: String,
    /// Entries keyed by scope and key.
    pub entries: BTreeMap<(Scope, String), LocalEntry>,
}

/// Both files of one scope.
#[derive(Debug, Default)]
struct ScopeFiles {
    configs: BTreeMap<String, String>,
    secrets: BTreeMap<String, String>,
}

/// Dotenv-backed store of local variables.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Root directory.
    root: PathBuf,
    /// Provenance log.
    provenance: ProvenanceLog,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            delete_original: true,
        }
    }
}

impl LocalWriteResult {
    /// A performed mutation.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            warnings: Vec::new(),
        }
    }

    /// A refused mutation with its reason.
    #[must_use]
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            warnings: vec![reason.into()],
        }
    }

    /// Adds a note.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

impl LocalState {
    /// Returns the entry for a scope and key.
    #[must_use]
    pub fn get(&self, scope: &Scope, key: &str) -> Option<&LocalEntry> {
        self.entries.get(&(scope.clone(), key.to_string()))
    }

    /// Returns the plaintext values of one scope.
    #[must_use]
    pub fn scope_values(&self, scope: &Scope) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|((_, key), entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Returns every scope present.
    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes: Vec<Scope> = self.entries.keys().map(|(s, _)| s.clone()).collect();
        scopes.dedup();
        scopes
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ScopeFiles {
    fn get(&self, key: &str) -> Option<LocalEntry> {
        self.secrets
            .get(key)
            .map(|value| LocalEntry {
                value: value.clone(),
                sensitive: true,
            })
            .or_else(|| {
                self.configs.get(key).map(|value| LocalEntry {
                    value: value.clone(),
                    sensitive: false,
                })
            })
    }

    /// Inserts into one file and removes from the other. Returns true if the
    /// key changed files.
    fn put(&mut self, key: &str, value: &str, sensitive: bool) -> bool {
        let (target, other) = if sensitive {
            (&mut self.secrets, &mut self.configs)
        } else {
            (&mut self.configs, &mut self.secrets)
        };
        target.insert(key.to_string(), value.to_string());
        other.remove(key).is_some()
    }

    fn remove(&mut self, key: &str) -> Option<LocalEntry> {
        let secret = self.secrets.remove(key).map(|value| LocalEntry {
            value,
            sensitive: true,
        });
        let config = self.configs.remove(key).map(|value| LocalEntry {
            value,
            sensitive: false,
        });
        secret.or(config)
    }
}

/// Rejects environment names that cannot be used as a directory.
fn check_environment(environment: &str) -> Result<()> {
    if is_valid_service_name(environment) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEnvironment {
            name: environment.to_string(),
        }
        .into())
    }
}

impl LocalStateStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let provenance = ProvenanceLog::new(root.join(PROVENANCE_FILE));
        Self { root, provenance }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the provenance log.
    #[must_use]
    pub const fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    /// Returns the directory holding a scope's files.
    #[must_use]
    pub fn scope_dir(&self, environment: &str, scope: &Scope) -> PathBuf {
        let env_dir = self.root.join(environment);
        match scope {
            Scope::Shared => env_dir,
            Scope::Service(name) => env_dir.join(SERVICES_DIR).join(name),
        }
    }

    /// Writes a variable, recorded as `set`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or environment is invalid or the files
    /// cannot be written.
    pub fn write_variable(&self, write: &VariableWrite, ctx: &MutationContext) -> Result<LocalWriteResult> {
        self.put(write, Operation::Set, ctx)
    }

    /// Replaces the value of an existing variable, recorded as `rotate`.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read or written.
    pub fn rotate_variable(&self, write: &VariableWrite, ctx: &MutationContext) -> Result<LocalWriteResult> {
        check_environment(&write.environment)?;
        let files = self.load_scope(&write.environment, &write.scope)?;
        if files.get(&write.key).is_none() {
            return Ok(LocalWriteResult::refused(format!(
                "{} not found in {}/{}; nothing to rotate",
                write.key, write.environment, write.scope
            )));
        }
        self.put(write, Operation::Rotate, ctx)
    }

    /// Writes a variable recorded under `operation`.
    pub(crate) fn put(
        &self,
        write: &VariableWrite,
        operation: Operation,
        ctx: &MutationContext,
    ) -> Result<LocalWriteResult> {
        validate_key(&write.key)?;
        check_environment(&write.environment)?;

        let mut files = self.load_scope(&write.environment, &write.scope)?;
        let switched = files.put(&write.key, &write.value, write.sensitive);
        self.save_scope(&write.environment, &write.scope, &files)?;

        self.provenance.append(&ctx.entry(
            operation,
            &write.key,
            &write.scope,
            &write.environment,
        ))?;

        debug!(
            "Wrote {} to {}/{} ({operation})",
            write.key, write.environment, write.scope
        );

        let mut result = LocalWriteResult::ok();
        if switched {
            let (from, to) = if write.sensitive {
                (CONFIGS_FILE, SECRETS_FILE)
            } else {
                (SECRETS_FILE, CONFIGS_FILE)
            };
            result = result.with_warning(format!("{} moved from {from} to {to}", write.key));
        }
        Ok(result)
    }

    /// Deletes a variable, recorded as `delete`.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read or written.
    pub fn delete_variable(
        &self,
        environment: &str,
        scope: &Scope,
        key: &str,
        ctx: &MutationContext,
    ) -> Result<LocalWriteResult> {
        check_environment(environment)?;

        let mut files = self.load_scope(environment, scope)?;
        if files.remove(key).is_none() {
            return Ok(LocalWriteResult::refused(format!(
                "{key} not found in {environment}/{scope}"
            )));
        }
        self.save_scope(environment, scope, &files)?;
        self.provenance
            .append(&ctx.entry(Operation::Delete, key, scope, environment))?;

        debug!("Deleted {key} from {environment}/{scope}");
        Ok(LocalWriteResult::ok())
    }

    /// Moves (or copies) a variable between scopes of one environment.
    ///
    /// The destination is written and verified before the source is touched;
    /// if the source cannot be updated the destination is restored, so exactly
    /// one scope holds the key after a failed move.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read or written.
    pub fn move_variable(
        &self,
        environment: &str,
        key: &str,
        from: &Scope,
        to: &Scope,
        options: MoveOptions,
        ctx: &MutationContext,
    ) -> Result<LocalWriteResult> {
        check_environment(environment)?;

        if from == to {
            return Ok(LocalWriteResult::refused(format!(
                "source and destination are both {from}"
            )));
        }

        let mut source_files = self.load_scope(environment, from)?;
        let Some(entry) = source_files.get(key) else {
            return Ok(LocalWriteResult::refused(format!(
                "{key} not found in {environment}/{from}"
            )));
        };

        let mut dest_files = self.load_scope(environment, to)?;
        let previous = dest_files.get(key);
        if previous.is_some() && !options.overwrite {
            return Ok(LocalWriteResult::refused(format!(
                "{key} already exists in {environment}/{to}; use overwrite to replace it"
            )));
        }

        // Stage the destination.
        dest_files.put(key, &entry.value, entry.sensitive);
        self.save_scope(environment, to, &dest_files)?;

        let staged = self.load_scope(environment, to)?.get(key);
        if staged.as_ref() != Some(&entry) {
            self.restore_destination(environment, to, key, previous.as_ref())?;
            return Err(StateError::WriteFailed {
                path: self.scope_dir(environment, to),
                message: format!("staged value of {key} did not verify"),
            }
            .into());
        }

        if options.delete_original {
            source_files.remove(key);
            if let Err(e) = self.save_scope(environment, from, &source_files) {
                warn!("Source update failed for {key}; restoring {environment}/{to}");
                self.restore_destination(environment, to, key, previous.as_ref())?;
                return Err(e);
            }
        }

        self.provenance
            .append(&ctx.entry(Operation::Move, key, to, environment))?;

        info!(
            "{} {key} from {environment}/{from} to {environment}/{to}",
            if options.delete_original { "Moved" } else { "Copied" }
        );

        let mut result = LocalWriteResult::ok();
        if previous.is_some() {
            result = result.with_warning(format!("overwrote {key} in {environment}/{to}"));
        }
        Ok(result)
    }

    /// Reads every variable of an environment, optionally limited to one scope.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed.
    pub fn read_state(&self, environment: &str, scope: Option<&Scope>) -> Result<LocalState> {
        check_environment(environment)?;

        let scopes = match scope {
            Some(scope) => vec![scope.clone()],
            None => self.list_scopes(environment)?,
        };

        let mut state = LocalState {
            environment: environment.to_string(),
            entries: BTreeMap::new(),
        };

        for scope in scopes {
            let files = self.load_scope(environment, &scope)?;
            for (key, value) in files.configs {
                state.entries.insert(
                    (scope.clone(), key),
                    LocalEntry {
                        value,
                        sensitive: false,
                    },
                );
            }
            for (key, value) in files.secrets {
                let previous = state.entries.insert(
                    (scope.clone(), key.clone()),
                    LocalEntry {
                        value,
                        sensitive: true,
                    },
                );
                if previous.is_some() {
                    warn!("{key} appears in both files of {environment}/{scope}; using {SECRETS_FILE}");
                }
            }
        }

        Ok(state)
    }

    /// Imports parsed dotenv variables into a scope, recording each write
    /// as `import`.
    ///
    /// Sensitivity is `sensitive` when given, otherwise the key-name heuristic
    /// with `sensitive_patterns`. Invalid keys are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn import_variables(
        &self,
        vars: BTreeMap<String, String>,
        environment: &str,
        scope: &Scope,
        sensitive: Option<bool>,
        sensitive_patterns: &[String],
        ctx: &MutationContext,
    ) -> Result<LocalWriteResult> {
        check_environment(environment)?;

        let mut result = LocalWriteResult::ok();
        let mut imported = 0usize;
        for (key, value) in vars {
            if let Err(e) = validate_key(&key) {
                result = result.with_warning(format!("skipped {key}: {e}"));
                continue;
            }
            let write = VariableWrite {
                sensitive: sensitive.unwrap_or_else(|| is_probably_sensitive(&key, sensitive_patterns)),
                key,
                value,
                environment: environment.to_string(),
                scope: scope.clone(),
            };
            let outcome = self.put(&write, Operation::Import, ctx)?;
            result.warnings.extend(outcome.warnings);
            imported += 1;
        }

        info!("Imported {imported} variables into {environment}/{scope}");
        Ok(result)
    }

    /// Copies every variable of one environment into another, recording each
    /// write as `clone`. Existing keys are kept unless `overwrite`.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or written.
    pub fn clone_environment(
        &self,
        from: &str,
        to: &str,
        overwrite: bool,
        ctx: &MutationContext,
    ) -> Result<LocalWriteResult> {
        check_environment(to)?;

        if from == to {
            return Ok(LocalWriteResult::refused(format!(
                "source and destination are both {from}"
            )));
        }

        let source = self.read_state(from, None)?;
        if source.is_empty() {
            return Ok(LocalWriteResult::refused(format!("{from} has no variables")));
        }
        let target = self.read_state(to, None)?;

        let mut result = LocalWriteResult::ok();
        for ((scope, key), entry) in &source.entries {
            if target.get(scope, key).is_some() && !overwrite {
                result = result.with_warning(format!("kept existing {key} in {to}/{scope}"));
                continue;
            }
            let write = VariableWrite {
                key: key.clone(),
                value: entry.value.clone(),
                environment: to.to_string(),
                scope: scope.clone(),
                sensitive: entry.sensitive,
            };
            self.put(&write, Operation::Clone, ctx)?;
        }

        info!("Cloned {} variables from {from} to {to}", source.len());
        Ok(result)
    }

    /// Lists the scopes that have files in an environment.
    fn list_scopes(&self, environment: &str) -> Result<Vec<Scope>> {
        let mut scopes = vec![Scope::Shared];

        let services_dir = self.root.join(environment).join(SERVICES_DIR);
        if !services_dir.is_dir() {
            return Ok(scopes);
        }

        let entries = std::fs::read_dir(&services_dir).map_err(|e| StateError::ReadFailed {
            path: services_dir.clone(),
            message: e.to_string(),
        })?;

        let mut services = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StateError::ReadFailed {
                path: services_dir.clone(),
                message: e.to_string(),
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().to_str().and_then(|name| Scope::service(name).ok()) {
                Some(scope) => services.push(scope),
                None => warn!("Ignoring unexpected directory {}", entry.path().display()),
            }
        }
        services.sort();
        scopes.extend(services);
        Ok(scopes)
    }

    fn load_scope(&self, environment: &str, scope: &Scope) -> Result<ScopeFiles> {
        let dir = self.scope_dir(environment, scope);
        Ok(ScopeFiles {
            configs: read_env_file(&dir.join(CONFIGS_FILE))?,
            secrets: read_env_file(&dir.join(SECRETS_FILE))?,
        })
    }

    fn save_scope(&self, environment: &str, scope: &Scope, files: &ScopeFiles) -> Result<()> {
        let dir = self.scope_dir(environment, scope);
        write_env_file(&dir.join(CONFIGS_FILE), &files.configs, false)?;
        write_env_file(&dir.join(SECRETS_FILE), &files.secrets, true)
    }

    /// Puts the destination back to its state before a staged move.
    fn restore_destination(
        &self,
        environment: &str,
        scope: &Scope,
        key: &str,
        previous: Option<&LocalEntry>,
    ) -> Result<()> {
        let mut files = self.load_scope(environment, scope)?;
        match previous {
            Some(entry) => {
                files.put(key, &entry.value, entry.sensitive);
            }
            None => {
                files.remove(key);
            }
        }
        self.save_scope(environment, scope, &files)
    }
}
