//! Orchestration of local state, keys, backend and version history.
//!
//! [`AppContext`] is the composition root: it owns the configuration, the
//! key resolver, the backend pool and the local store. A [`Synchronizer`]
//! borrows them for one project and drives plan, apply, rollback, key
//! rotation and export.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendPool, Collection, RecordKey, StoredRecord};
use crate::config::{ConfigValidator, VaulterConfig};
use crate::crypto::{GeneratedKey, KeyResolver};
use crate::error::{KeyError, Result, VaulterError};
use crate::governance::{GovernanceResult, VariableCheck, check_single_variable};
use crate::local::{
    LocalStateStore, LocalWriteResult, MoveOptions, MutationContext, Operation, Source, VariableWrite,
    read_import_file, render_env_output, write_atomic,
};
use crate::model::{Assignment, Scope, SensitivityChoice, Variable, VariableIdentity, validate_key};
use crate::planner::{
    ApplyEngine, ApplyResult, DiffEngine, DiffOptions, Plan, Scorecard, SkippedKey, Snapshot,
    SnapshotEntry, local_snapshot,
};
use crate::versions::{RetentionPolicy, VersionRecord, VersionStore};

/// Composition root owning every long-lived resource.
#[derive(Debug)]
pub struct AppContext {
    /// Validated configuration.
    config: VaulterConfig,
    /// Key resolver with its cache.
    resolver: KeyResolver,
    /// Connected backend handles.
    pool: BackendPool,
    /// Local state store.
    local: LocalStateStore,
    /// Actor and source of every mutation.
    ctx: MutationContext,
}

/// Outcome of a local write.
#[derive(Debug, Clone)]
pub struct SetOutcome {
    /// Policy verdict.
    pub governance: GovernanceResult,
    /// Local store result.
    pub write: LocalWriteResult,
}

/// Decrypted remote state of one environment.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    /// Decrypted values.
    pub snapshot: Snapshot,
    /// Records that could not be decrypted.
    pub skipped: Vec<SkippedKey>,
}

/// Result of an encryption key rotation.
#[derive(Debug, Clone, Serialize)]
pub struct KeyRotation {
    /// Environment whose key was replaced.
    pub environment: String,
    /// Records re-encrypted with the new key.
    pub reencrypted: usize,
    /// New secret key file.
    pub key_path: PathBuf,
    /// Copies of the previous key files.
    pub backups: Vec<PathBuf>,
}

/// Result of an export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    /// File written.
    pub path: PathBuf,
    /// Number of variables in the managed block.
    pub variables: usize,
    /// Records left out because they could not be decrypted.
    pub skipped: Vec<SkippedKey>,
}

/// Drives sync operations for one project.
#[derive(Debug)]
pub struct Synchronizer<'a> {
    /// Configuration.
    config: &'a VaulterConfig,
    /// Key resolver.
    resolver: &'a KeyResolver,
    /// Local state store.
    local: &'a LocalStateStore,
    /// Remote store.
    backend: Arc<dyn Backend>,
    /// Actor and source of every mutation.
    ctx: MutationContext,
}

impl AppContext {
    /// Builds the context from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the key
    /// directory cannot be determined.
    pub fn new(config: VaulterConfig, source: Source) -> Result<Self> {
        let validation = ConfigValidator::new().validate(&config)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }

        let resolver = KeyResolver::from_config(&config)?;
        let local = LocalStateStore::new(config.local_root());

        Ok(Self {
            config,
            resolver,
            pool: BackendPool::default(),
            local,
            ctx: MutationContext::current(source),
        })
    }

    /// Replaces the key resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: KeyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replaces the mutation context.
    #[must_use]
    pub fn with_context(mut self, ctx: MutationContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &VaulterConfig {
        &self.config
    }

    /// Returns the key resolver.
    #[must_use]
    pub const fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Returns the local state store.
    #[must_use]
    pub const fn local(&self) -> &LocalStateStore {
        &self.local
    }

    /// Returns the mutation context.
    #[must_use]
    pub const fn context(&self) -> &MutationContext {
        &self.ctx
    }

    /// Returns the backend pool.
    #[must_use]
    pub const fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Returns the connected backend for this project.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    pub async fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.pool.get(&self.config).await
    }

    /// Returns a synchronizer over the pooled backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    pub async fn synchronizer(&self) -> Result<Synchronizer<'_>> {
        let backend = self.backend().await?;
        Ok(Synchronizer::new(
            &self.config,
            &self.resolver,
            &self.local,
            backend,
            self.ctx.clone(),
        ))
    }

    /// Checks a write against policy and stores it locally.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::Blocked` if policy refuses the write, or an
    /// error if the local files cannot be written.
    pub fn set_variable(&self, environment: &str, scope: &Scope, assignment: &Assignment) -> Result<SetOutcome> {
        let check = VariableCheck {
            key: assignment.key.clone(),
            value: assignment.value.clone(),
            scope: scope.clone(),
            sensitive: Some(assignment.sensitivity),
            environment: environment.to_string(),
        };
        let governance = check_single_variable(&check, &self.config).into_result(&assignment.key)?;
        if governance.sensitive_auto_correct {
            info!("{} looks sensitive; storing it as a secret", assignment.key);
        }

        let write = self.local.write_variable(
            &VariableWrite {
                key: assignment.key.clone(),
                value: assignment.value.clone(),
                environment: environment.to_string(),
                scope: scope.clone(),
                sensitive: governance.effective_sensitive,
            },
            &self.ctx,
        )?;

        Ok(SetOutcome { governance, write })
    }

    /// Moves (or copies) a variable between scopes once policy accepts it
    /// in the destination scope.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::Blocked` if policy refuses the destination,
    /// or an error if the local files cannot be read or written.
    pub fn move_variable(
        &self,
        environment: &str,
        key: &str,
        from: &Scope,
        to: &Scope,
        options: MoveOptions,
    ) -> Result<LocalWriteResult> {
        let source = self.local.read_state(environment, Some(from))?;
        let mut warnings = Vec::new();
        if let Some(entry) = source.get(from, key) {
            warnings = self.check_writes([VariableCheck {
                key: key.to_string(),
                value: entry.value.clone(),
                scope: to.clone(),
                sensitive: Some(SensitivityChoice::Explicit(entry.sensitive)),
                environment: environment.to_string(),
            }])?;
        }

        let mut result = self.local.move_variable(environment, key, from, to, options, &self.ctx)?;
        result.warnings.extend(warnings);
        Ok(result)
    }

    /// Imports a dotenv file into a scope. Every key is checked against
    /// policy before the first one is written.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::Blocked` if policy refuses any key, or an
    /// error if the file cannot be read or a write fails.
    pub fn import_file(
        &self,
        path: &Path,
        environment: &str,
        scope: &Scope,
        sensitive: Option<bool>,
        sensitive_patterns: &[String],
    ) -> Result<LocalWriteResult> {
        let vars = read_import_file(path)?;
        let warnings = self.check_writes(vars.iter().filter(|(key, _)| validate_key(key).is_ok()).map(
            |(key, value)| VariableCheck {
                key: key.clone(),
                value: value.clone(),
                scope: scope.clone(),
                sensitive: sensitive.map(SensitivityChoice::Explicit),
                environment: environment.to_string(),
            },
        ))?;

        let ctx = MutationContext {
            actor: self.ctx.actor.clone(),
            source: Source::Import,
        };
        let mut result =
            self.local
                .import_variables(vars, environment, scope, sensitive, sensitive_patterns, &ctx)?;
        info!("Imported {} into {environment}/{scope}", path.display());
        result.warnings.extend(warnings);
        Ok(result)
    }

    /// Copies every variable of one environment into another. Every value
    /// that would be written is checked against the destination's policy
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `GovernanceError::Blocked` if policy refuses any value, or an
    /// error if a file cannot be read or written.
    pub fn clone_environment(&self, from: &str, to: &str, overwrite: bool) -> Result<LocalWriteResult> {
        let mut warnings = Vec::new();
        if from != to {
            let source = self.local.read_state(from, None)?;
            let target = self.local.read_state(to, None)?;
            warnings = self.check_writes(
                source
                    .entries
                    .iter()
                    .filter(|((scope, key), _)| overwrite || target.get(scope, key).is_none())
                    .map(|((scope, key), entry)| VariableCheck {
                        key: key.clone(),
                        value: entry.value.clone(),
                        scope: scope.clone(),
                        sensitive: Some(SensitivityChoice::Explicit(entry.sensitive)),
                        environment: to.to_string(),
                    }),
            )?;
        }

        let mut result = self.local.clone_environment(from, to, overwrite, &self.ctx)?;
        result.warnings.extend(warnings);
        Ok(result)
    }

    /// Runs policy over a batch of writes, failing on the first blocked one.
    /// Returns the distinct warnings.
    fn check_writes(&self, checks: impl IntoIterator<Item = VariableCheck>) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        for check in checks {
            let verdict = check_single_variable(&check, &self.config).into_result(&check.key)?;
            for warning in verdict.warnings {
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
        }
        Ok(warnings)
    }
}

impl<'a> Synchronizer<'a> {
    /// Creates a synchronizer over an explicit backend.
    #[must_use]
    pub fn new(
        config: &'a VaulterConfig,
        resolver: &'a KeyResolver,
        local: &'a LocalStateStore,
        backend: Arc<dyn Backend>,
        ctx: MutationContext,
    ) -> Self {
        Self {
            config,
            resolver,
            local,
            backend,
            ctx,
        }
    }

    /// Returns the version store over this backend.
    fn versions(&self) -> VersionStore {
        VersionStore::new(
            Arc::clone(&self.backend),
            RetentionPolicy::from(&self.config.versioning),
        )
    }

    /// Loads and decrypts the remote variables of an environment.
    ///
    /// Records that fail to decrypt are reported in `skipped`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a key cannot be
    /// resolved.
    pub async fn load_remote(&self, environment: &str, scope: Option<&Scope>) -> Result<RemoteSnapshot> {
        let (variables, skipped) = self.decrypt_remote(environment, scope).await?;
        let snapshot = variables
            .into_iter()
            .map(|variable| {
                (
                    (variable.scope, variable.key),
                    SnapshotEntry {
                        value: variable.value,
                        sensitive: variable.sensitive,
                        updated_at: Some(variable.updated_at),
                    },
                )
            })
            .collect();
        Ok(RemoteSnapshot { snapshot, skipped })
    }

    /// Lists the decrypted remote variables of an environment with their
    /// versions. Undecryptable records are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a key cannot be
    /// resolved.
    pub async fn list_remote(&self, environment: &str, scope: Option<&Scope>) -> Result<Vec<Variable>> {
        let (variables, _) = self.decrypt_remote(environment, scope).await?;
        Ok(variables)
    }

    async fn decrypt_remote(
        &self,
        environment: &str,
        scope: Option<&Scope>,
    ) -> Result<(Vec<Variable>, Vec<SkippedKey>)> {
        let records = self
            .backend
            .list(Collection::Variables, &self.config.project, environment)
            .await?;

        let mut variables = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();
        for record in records {
            if scope.is_some_and(|s| s != &record.id.scope) {
                continue;
            }

            let material = self.resolver.require_for_scope(environment, &record.id.scope)?;
            match material.decrypt(&record.value) {
                Ok(value) => variables.push(Variable {
                    key: record.id.key,
                    value,
                    environment: record.id.environment,
                    scope: record.id.scope,
                    sensitive: record.sensitive,
                    updated_at: record.updated_at,
                    version: record.version,
                }),
                Err(VaulterError::Decryption(e)) => {
                    warn!("Skipping {}: {e}", record.id);
                    skipped.push(SkippedKey {
                        scope: record.id.scope.clone(),
                        key: record.id.key.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Loaded {} remote variables for {}/{} ({} skipped)",
            variables.len(),
            self.config.project,
            environment,
            skipped.len()
        );
        Ok((variables, skipped))
    }

    /// Computes the plan that makes the remote state match local state.
    ///
    /// Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if either side cannot be read, or a `ConflictError`
    /// under the `error` conflict strategy.
    pub async fn compute_plan(&self, environment: &str, scope: Option<&Scope>) -> Result<Plan> {
        let state = self.local.read_state(environment, scope)?;
        let local = local_snapshot(&state);
        let remote = self.load_remote(environment, scope).await?;

        let diff = DiffEngine::compute(&local, &remote.snapshot, DiffOptions::from(&self.config.sync))?;
        let scorecard = Scorecard::compute(self.config, environment, &local, &remote.snapshot, Utc::now());

        let mut warnings = diff.warnings;
        if !self.config.has_environment(environment) {
            warnings.insert(0, format!("Environment '{environment}' is not declared"));
        }

        let plan = Plan {
            project: self.config.project.clone(),
            environment: environment.to_string(),
            scope: scope.cloned(),
            created_at: Utc::now(),
            changes: diff.changes,
            summary: diff.summary,
            remote_only: diff.remote_only,
            skipped: remote.skipped,
            warnings,
            scorecard,
        };

        info!(
            "Plan for {}/{}: {} add, {} update, {} delete, {} unchanged",
            plan.project,
            plan.environment,
            plan.summary.to_add,
            plan.summary.to_update,
            plan.summary.to_delete,
            plan.summary.unchanged
        );
        Ok(plan)
    }

    /// Applies a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan belongs to another project.
    pub async fn apply_plan(&self, plan: &Plan, dry_run: bool) -> Result<ApplyResult> {
        if plan.project != self.config.project {
            return Err(VaulterError::internal(format!(
                "plan targets project '{}' but the configuration is for '{}'",
                plan.project, self.config.project
            )));
        }

        ApplyEngine::new(
            Arc::clone(&self.backend),
            self.resolver,
            self.config,
            self.ctx.clone(),
        )
        .with_provenance(self.local.provenance())
        .with_dry_run(dry_run)
        .apply(plan)
        .await
    }

    /// Lists the versions of a variable, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the history cannot be read.
    pub async fn list_versions(&self, environment: &str, scope: &Scope, key: &str) -> Result<Vec<VersionRecord>> {
        validate_key(key)?;
        let identity = VariableIdentity::new(&self.config.project, environment, scope.clone(), key);
        self.versions().list_versions(&identity).await
    }

    /// Restores an earlier version as the current value, remotely and locally.
    ///
    /// A version encrypted with a rotated-out key is decrypted with its key
    /// backup and re-encrypted with the current key. History only records
    /// the rollback once the backend holds the restored value.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the version is missing or a tombstone,
    /// `KeyError::RetiredKeyMissing` if its key was rotated without a
    /// backup, or an error if a write fails.
    pub async fn rollback(&self, environment: &str, scope: &Scope, key: &str, target: u64) -> Result<VersionRecord> {
        validate_key(key)?;
        let identity = VariableIdentity::new(&self.config.project, environment, scope.clone(), key);
        let versions = self.versions();

        let source = versions.rollback_target(&identity, target).await?;
        let current = self.resolver.require_for_scope(environment, scope)?;
        let current_fingerprint = current.fingerprint();

        let (value, stored) = match source.key_fingerprint.as_deref() {
            Some(fingerprint) if fingerprint != current_fingerprint => {
                let key_environment = self.resolver.key_environment(environment, scope);
                let retired = self
                    .resolver
                    .retired_key(key_environment, fingerprint)?
                    .ok_or_else(|| KeyError::RetiredKeyMissing {
                        environment: key_environment.to_string(),
                        fingerprint: fingerprint.to_string(),
                    })?;
                let value = retired.decrypt(&source.value)?;
                debug!("Re-encrypting version {target} of {identity} with the current key");
                let stored = current.encrypt(&value)?;
                (value, stored)
            }
            _ => (current.decrypt(&source.value)?, source.value.clone()),
        };

        let record_key = RecordKey::from(&identity);
        let previous = self.backend.get(Collection::Variables, &record_key).await?;
        let next = previous.map_or(0, |r| r.version) + 1;
        let restored = StoredRecord::new(record_key, stored.clone(), source.sensitive, next)
            .with_updated_by(&self.ctx.actor);
        self.backend.set(Collection::Variables, &restored).await?;

        let record = if stored == source.value {
            versions.rollback(&identity, target, &self.ctx).await?
        } else {
            versions
                .append_version(
                    &identity,
                    &stored,
                    source.sensitive,
                    Operation::Rollback,
                    Some(&current_fingerprint),
                    &self.ctx,
                )
                .await?
        };

        self.local.put(
            &VariableWrite {
                key: key.to_string(),
                value,
                environment: environment.to_string(),
                scope: scope.clone(),
                sensitive: source.sensitive,
            },
            Operation::Rollback,
            &self.ctx,
        )?;

        info!("Restored {identity} from version {target}");
        Ok(record)
    }

    /// Replaces the key of an environment and re-encrypts every value it
    /// protects.
    ///
    /// Every value is decrypted with the old key before anything changes.
    ///
    /// # Errors
    ///
    /// Returns an error if an override would shadow the new key file, any
    /// value cannot be decrypted, or a write fails.
    pub async fn rotate_encryption_key(&self, environment: &str, backup: bool) -> Result<KeyRotation> {
        if let Some(source) = self.resolver.shadowing_override(environment) {
            return Err(KeyError::invalid(
                source,
                format!("overrides the key file of '{environment}'; remove it before rotating"),
            )
            .into());
        }

        let old = self.resolver.require(environment)?;
        let records: Vec<StoredRecord> = self
            .backend
            .export(Collection::Variables, &self.config.project)
            .await?
            .into_iter()
            .filter(|r| self.resolver.key_environment(&r.id.environment, &r.id.scope) == environment)
            .collect();

        let mut plaintexts = Vec::with_capacity(records.len());
        for record in &records {
            plaintexts.push(old.decrypt(&record.value)?);
        }

        let backups = if backup {
            self.resolver.backup_key(environment)?
        } else {
            Vec::new()
        };

        let generated: GeneratedKey = self.resolver.generate_key(environment, true)?;
        let new = self.resolver.require(environment)?;
        let new_fingerprint = new.fingerprint();
        let versions = self.config.versioning.enabled.then(|| self.versions());

        for (record, plaintext) in records.iter().zip(&plaintexts) {
            let stored = new.encrypt(plaintext)?;
            let rotated = StoredRecord::new(record.id.clone(), stored.clone(), record.sensitive, record.version + 1)
                .with_updated_by(&self.ctx.actor);
            if let Err(e) = self.backend.set(Collection::Variables, &rotated).await {
                error!("Rotation of {} stopped at {}: {e}", environment, record.id);
                return Err(e);
            }

            let identity = VariableIdentity::from(&record.id);
            if let Some(versions) = &versions {
                versions
                    .append_version(
                        &identity,
                        &stored,
                        record.sensitive,
                        Operation::Rotate,
                        Some(&new_fingerprint),
                        &self.ctx,
                    )
                    .await?;
            }
            self.local.provenance().append(&self.ctx.entry(
                Operation::Rotate,
                &identity.key,
                &identity.scope,
                &identity.environment,
            ))?;
        }

        info!(
            "Rotated key of {}/{}: {} values re-encrypted",
            self.config.project,
            environment,
            records.len()
        );
        Ok(KeyRotation {
            environment: environment.to_string(),
            reencrypted: records.len(),
            key_path: generated.secret_path,
            backups,
        })
    }

    /// Writes the decrypted remote variables of an environment into the
    /// managed block of a dotenv file.
    ///
    /// Shared values come first; a service's values override them. Content
    /// outside the managed block is preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote state cannot be read or the file
    /// cannot be written.
    pub async fn export_env(&self, environment: &str, service: Option<&str>, path: &Path) -> Result<ExportResult> {
        let service_scope = service.map(Scope::service).transpose()?;
        let remote = self.load_remote(environment, None).await?;

        let values = |scope: &Scope| -> BTreeMap<String, String> {
            remote
                .snapshot
                .iter()
                .filter(|((s, _), _)| s == scope)
                .map(|((_, key), entry)| (key.clone(), entry.value.clone()))
                .collect()
        };
        let shared = values(&Scope::Shared);
        let service_values = service_scope.as_ref().map(values);

        let existing = if path.is_file() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        let content = render_env_output(&existing, &shared, service_values.as_ref());
        write_atomic(path, &content, true)?;

        let mut merged: Vec<&String> = shared.keys().collect();
        if let Some(service_values) = &service_values {
            merged.extend(service_values.keys());
        }
        merged.sort();
        merged.dedup();

        info!("Exported {} variables to {}", merged.len(), path.display());
        Ok(ExportResult {
            path: path.to_path_buf(),
            variables: merged.len(),
            skipped: remote.skipped,
        })
    }
}
