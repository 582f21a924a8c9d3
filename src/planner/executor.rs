//! Apply engine for sync plans.
//!
//! Changes are encrypted and written to the backend with bounded
//! concurrency. Changes on the same identity run one after another in plan
//! order. A failing key never aborts the batch.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, Collection, RecordKey, StoredRecord};
use crate::config::VaulterConfig;
use crate::crypto::KeyResolver;
use crate::error::{BackendError, Result, VaulterError};
use crate::local::{MutationContext, Operation, ProvenanceLog};
use crate::model::Scope;
use crate::versions::{RetentionPolicy, VersionStore};

use super::plan::{ChangeAction, Plan, PlanChange};

/// Applies plans to a backend.
#[derive(Debug)]
pub struct ApplyEngine<'a> {
    /// Remote store.
    backend: Arc<dyn Backend>,
    /// Key resolution.
    resolver: &'a KeyResolver,
    /// Version history, when versioning is enabled.
    versions: Option<VersionStore>,
    /// Local provenance log.
    provenance: Option<&'a ProvenanceLog>,
    /// Actor and source recorded for every write.
    ctx: MutationContext,
    /// Maximum identities in flight.
    concurrency: usize,
    /// Deadline for each backend call.
    timeout: Duration,
    /// Report without writing.
    dry_run: bool,
}

/// Outcome of one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// Written; carries the new version number.
    Succeeded {
        /// Version recorded for the write.
        version: u64,
    },
    /// The remote already matched.
    Unchanged,
    /// Would be written (dry run).
    WouldApply,
    /// Not written.
    Failed {
        /// Error message.
        error: String,
        /// Whether retrying may succeed.
        retryable: bool,
    },
}

/// Result of one change.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeResult {
    /// The change.
    pub change: PlanChange,
    /// What happened.
    pub outcome: ChangeOutcome,
}

/// Result of applying a plan.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    /// Identifier of this run.
    pub run_id: Uuid,
    /// Whether nothing was written.
    pub dry_run: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-change results, in plan order.
    pub results: Vec<ChangeResult>,
}

impl<'a> ApplyEngine<'a> {
    /// Creates an engine using the sync and versioning settings of `config`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        resolver: &'a KeyResolver,
        config: &VaulterConfig,
        ctx: MutationContext,
    ) -> Self {
        let versions = config
            .versioning
            .enabled
            .then(|| VersionStore::new(Arc::clone(&backend), RetentionPolicy::from(&config.versioning)));

        Self {
            backend,
            resolver,
            versions,
            provenance: None,
            ctx,
            concurrency: config.sync.concurrency.max(1),
            timeout: Duration::from_secs(config.sync.timeout_secs),
            dry_run: false,
        }
    }

    /// Records provenance entries in `log`.
    #[must_use]
    pub const fn with_provenance(mut self, log: &'a ProvenanceLog) -> Self {
        self.provenance = Some(log);
        self
    }

    /// Sets dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Overrides the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Overrides the per-call deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Applies a plan.
    ///
    /// Per-key failures are reported in the result, not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the plan itself is unusable.
    pub async fn apply(&self, plan: &Plan) -> Result<ApplyResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Applying plan for {}/{} with {} changes (run {run_id}{})",
            plan.project,
            plan.environment,
            plan.changes.len(),
            if self.dry_run { ", dry run" } else { "" }
        );

        // Group by identity, keeping plan order within and across groups.
        let mut groups: Vec<Vec<(usize, &PlanChange)>> = Vec::new();
        let mut group_of: HashMap<(&Scope, &str), usize> = HashMap::new();
        for (index, change) in plan.changes.iter().enumerate() {
            let id = (&change.scope, change.key.as_str());
            let group = *group_of.entry(id).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push((index, change));
        }

        let mut indexed: Vec<(usize, ChangeResult)> = stream::iter(groups)
            .map(|group| self.apply_group(plan, group))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        let result = ApplyResult {
            run_id,
            dry_run: self.dry_run,
            started_at,
            finished_at: Utc::now(),
            results: indexed.into_iter().map(|(_, r)| r).collect(),
        };
        info!("{result}");
        Ok(result)
    }

    async fn apply_group(&self, plan: &Plan, group: Vec<(usize, &PlanChange)>) -> Vec<(usize, ChangeResult)> {
        let mut results = Vec::with_capacity(group.len());
        for (index, change) in group {
            let outcome = match self.apply_change(plan, change).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Failed to {change}: {e}");
                    ChangeOutcome::Failed {
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    }
                }
            };
            results.push((
                index,
                ChangeResult {
                    change: change.clone(),
                    outcome,
                },
            ));
        }
        results
    }

    async fn apply_change(&self, plan: &Plan, change: &PlanChange) -> Result<ChangeOutcome> {
        let key = RecordKey::new(&plan.project, &plan.environment, change.scope.clone(), &change.key);
        let existing = self
            .call_with_deadline("get", self.backend.get(Collection::Variables, &key))
            .await?;

        match change.action {
            ChangeAction::Add | ChangeAction::Update => {
                let material = self.resolver.require_for_scope(&plan.environment, &change.scope)?;
                let value = change.local_value.as_deref().ok_or_else(|| {
                    VaulterError::internal(format!("{change} has no local value"))
                })?;

                if let Some(current) = &existing {
                    if current.sensitive == change.sensitive
                        && matches!(material.decrypt(&current.value), Ok(plain) if plain == value)
                    {
                        debug!("{key} already up to date");
                        return Ok(ChangeOutcome::Unchanged);
                    }
                }
                if self.dry_run {
                    return Ok(ChangeOutcome::WouldApply);
                }

                let stored = material.encrypt(value)?;
                let next = existing.as_ref().map_or(0, |r| r.version) + 1;
                let record = StoredRecord::new(key.clone(), stored.clone(), change.sensitive, next)
                    .with_updated_by(&self.ctx.actor);
                self.call_with_deadline("set", self.backend.set(Collection::Variables, &record))
                    .await?;

                let version = self
                    .record_version(plan, change, &stored, Some(&material.fingerprint()), Operation::Set)
                    .await?
                    .unwrap_or(next);
                Ok(ChangeOutcome::Succeeded { version })
            }
            ChangeAction::Delete => {
                let Some(current) = existing else {
                    debug!("{key} already absent");
                    return Ok(ChangeOutcome::Unchanged);
                };
                if self.dry_run {
                    return Ok(ChangeOutcome::WouldApply);
                }

                self.call_with_deadline("delete", self.backend.delete(Collection::Variables, &key))
                    .await?;
                let version = self
                    .record_version(plan, change, "", None, Operation::Delete)
                    .await?
                    .unwrap_or(current.version + 1);
                Ok(ChangeOutcome::Succeeded { version })
            }
        }
    }

    /// Appends the version record and the provenance entry of a write.
    async fn record_version(
        &self,
        plan: &Plan,
        change: &PlanChange,
        stored: &str,
        fingerprint: Option<&str>,
        operation: Operation,
    ) -> Result<Option<u64>> {
        let version = match &self.versions {
            Some(versions) => {
                let identity = plan.identity(change);
                let record = self
                    .call_with_deadline(
                        "append_version",
                        versions.append_version(&identity, stored, change.sensitive, operation, fingerprint, &self.ctx),
                    )
                    .await?;
                Some(record.version)
            }
            None => None,
        };

        if let Some(log) = self.provenance {
            log.append(&self.ctx.entry(operation, &change.key, &change.scope, &plan.environment))?;
        }
        Ok(version)
    }

    /// Runs a backend call under the configured deadline.
    async fn call_with_deadline<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Backend call {operation} timed out");
                Err(BackendError::Timeout {
                    operation: operation.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
                .into())
            }
        }
    }
}

impl ApplyResult {
    fn count(&self, predicate: impl Fn(&ChangeOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }

    /// Returns the number of written changes.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ChangeOutcome::Succeeded { .. }))
    }

    /// Returns the number of changes that were already applied.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ChangeOutcome::Unchanged))
    }

    /// Returns the number of failed changes.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ChangeOutcome::Failed { .. }))
    }

    /// Returns true if no change failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Returns the failed changes, for a retry plan.
    #[must_use]
    pub fn failed_changes(&self) -> Vec<PlanChange> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ChangeOutcome::Failed { .. }))
            .map(|r| r.change.clone())
            .collect()
    }
}

impl std::fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.dry_run {
            let pending = self.count(|o| matches!(o, ChangeOutcome::WouldApply));
            return write!(
                f,
                "Dry run: {pending} would change, {} unchanged, {} failed",
                self.unchanged(),
                self.failed()
            );
        }
        write!(
            f,
            "Applied {} changes: {} succeeded, {} unchanged, {} failed",
            self.results.len(),
            self.succeeded(),
            self.unchanged(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FsBackend;
    use crate::local::Source;
    use crate::planner::plan::PlanSummary;
    use crate::planner::scorecard::Scorecard;
    use crate::testing::test_config;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Filesystem backend whose variable writes take `delay` and are
    /// counted while in flight.
    #[derive(Debug)]
    struct DelayedBackend {
        inner: FsBackend,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl DelayedBackend {
        fn new(root: &std::path::Path, delay: Duration) -> Self {
            Self {
                inner: FsBackend::new(root),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Backend for DelayedBackend {
        async fn connect(&self) -> Result<()> {
            self.inner.connect().await
        }

        async fn disconnect(&self) -> Result<()> {
            self.inner.disconnect().await
        }

        async fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>> {
            self.inner.get(collection, key).await
        }

        async fn list(&self, collection: Collection, project: &str, environment: &str) -> Result<Vec<StoredRecord>> {
            self.inner.list(collection, project, environment).await
        }

        async fn set(&self, collection: Collection, record: &StoredRecord) -> Result<()> {
            if collection == Collection::Variables {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            self.inner.set(collection, record).await
        }

        async fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool> {
            self.inner.delete(collection, key).await
        }

        async fn export(&self, collection: Collection, project: &str) -> Result<Vec<StoredRecord>> {
            self.inner.export(collection, project).await
        }

        fn backend_type(&self) -> &'static str {
            "delayed"
        }
    }

    struct Fixture {
        config: VaulterConfig,
        resolver: KeyResolver,
        backend: Arc<dyn Backend>,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let config = test_config(dir.path());
        let resolver = KeyResolver::from_config(&config).expect("resolver");
        let backend: Arc<dyn Backend> = Arc::new(FsBackend::new(dir.path().join("remote")));
        Fixture {
            config,
            resolver,
            backend,
            dir,
        }
    }

    fn change(key: &str, action: ChangeAction, value: Option<&str>) -> PlanChange {
        PlanChange {
            key: key.to_string(),
            scope: Scope::Shared,
            action,
            sensitive: true,
            local_value: value.map(String::from),
            remote_value: None,
        }
    }

    fn plan(changes: Vec<PlanChange>) -> Plan {
        Plan {
            project: String::from("app"),
            environment: String::from("dev"),
            scope: None,
            created_at: Utc::now(),
            changes,
            summary: PlanSummary::default(),
            remote_only: vec![],
            skipped: vec![],
            warnings: vec![],
            scorecard: Scorecard::default(),
        }
    }

    fn ctx() -> MutationContext {
        MutationContext::new("tester", Source::Api)
    }

    #[tokio::test]
    async fn test_apply_add_encrypts_and_versions() {
        let fx = fixture();
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &fx.resolver, &fx.config, ctx());

        let result = engine
            .apply(&plan(vec![change("API_KEY", ChangeAction::Add, Some("s3cret"))]))
            .await
            .expect("apply");
        assert!(result.is_success());
        assert_eq!(result.results[0].outcome, ChangeOutcome::Succeeded { version: 1 });

        let key = RecordKey::new("app", "dev", Scope::Shared, "API_KEY");
        let stored = fx
            .backend
            .get(Collection::Variables, &key)
            .await
            .expect("get")
            .expect("stored");
        assert!(stored.value.starts_with("vaulter:v1:"));
        assert!(!stored.value.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_reapply_is_unchanged() {
        let fx = fixture();
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &fx.resolver, &fx.config, ctx());
        let plan = plan(vec![change("API_KEY", ChangeAction::Add, Some("s3cret"))]);

        engine.apply(&plan).await.expect("apply");
        let again = engine.apply(&plan).await.expect("apply");
        assert_eq!(again.unchanged(), 1);
        assert_eq!(again.succeeded(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let fx = fixture();
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &fx.resolver, &fx.config, ctx()).with_dry_run(true);

        let result = engine
            .apply(&plan(vec![change("API_KEY", ChangeAction::Add, Some("s3cret"))]))
            .await
            .expect("apply");
        assert_eq!(result.results[0].outcome, ChangeOutcome::WouldApply);
        assert!(fx
            .backend
            .list(Collection::Variables, "app", "dev")
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn test_same_identity_runs_in_plan_order() {
        let fx = fixture();
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &fx.resolver, &fx.config, ctx());

        let result = engine
            .apply(&plan(vec![
                change("TOKEN", ChangeAction::Add, Some("one")),
                change("TOKEN", ChangeAction::Update, Some("two")),
                change("TOKEN", ChangeAction::Delete, None),
            ]))
            .await
            .expect("apply");

        let versions: Vec<ChangeOutcome> = result.results.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(
            versions,
            vec![
                ChangeOutcome::Succeeded { version: 1 },
                ChangeOutcome::Succeeded { version: 2 },
                ChangeOutcome::Succeeded { version: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let fx = fixture();
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &fx.resolver, &fx.config, ctx());

        let result = engine
            .apply(&plan(vec![
                change("GOOD", ChangeAction::Add, Some("1")),
                change("BROKEN", ChangeAction::Add, None),
            ]))
            .await
            .expect("apply");

        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.failed(), 1);
        let retry = result.failed_changes();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].key, "BROKEN");
    }

    #[tokio::test]
    async fn test_delete_missing_is_unchanged() {
        let fx = fixture();
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &fx.resolver, &fx.config, ctx());
        let result = engine
            .apply(&plan(vec![change("GONE", ChangeAction::Delete, None)]))
            .await
            .expect("apply");
        assert_eq!(result.unchanged(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_fails_change() {
        let fx = fixture();
        let mut config = fx.config.clone();
        config.encryption.keys.clear();
        let resolver = KeyResolver::from_config(&config)
            .expect("resolver")
            .with_vars(HashMap::new());
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &resolver, &config, ctx());

        let result = engine
            .apply(&plan(vec![change("API_KEY", ChangeAction::Add, Some("x"))]))
            .await
            .expect("apply");
        let ChangeOutcome::Failed { retryable, .. } = &result.results[0].outcome else {
            panic!("expected failure");
        };
        assert!(!retryable);
    }

    #[tokio::test]
    async fn test_slow_backend_call_times_out() {
        let fx = fixture();
        let backend = Arc::new(DelayedBackend::new(&fx.dir.path().join("slow"), Duration::from_secs(5)));
        let engine = ApplyEngine::new(backend.clone(), &fx.resolver, &fx.config, ctx())
            .with_timeout(Duration::from_millis(50));

        let result = engine
            .apply(&plan(vec![change("API_KEY", ChangeAction::Add, Some("s3cret"))]))
            .await
            .expect("apply");

        let ChangeOutcome::Failed { error, retryable } = &result.results[0].outcome else {
            panic!("expected timeout");
        };
        assert!(retryable);
        assert!(error.contains("'set' timed out"));
        let key = RecordKey::new("app", "dev", Scope::Shared, "API_KEY");
        assert!(backend.get(Collection::Variables, &key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_in_flight_writes_respect_concurrency() {
        let fx = fixture();
        let mut config = fx.config.clone();
        config.versioning.enabled = false;
        let backend = Arc::new(DelayedBackend::new(&fx.dir.path().join("gated"), Duration::from_millis(20)));
        let engine = ApplyEngine::new(backend.clone(), &fx.resolver, &config, ctx()).with_concurrency(2);

        let changes = (0..6)
            .map(|i| change(&format!("KEY_{i}"), ChangeAction::Add, Some("v")))
            .collect();
        let result = engine.apply(&plan(changes)).await.expect("apply");

        assert_eq!(result.succeeded(), 6);
        let peak = backend.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak in-flight writes was {peak}");
        assert_eq!(backend.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_needs_no_key() {
        let fx = fixture();
        let key = RecordKey::new("app", "dev", Scope::Shared, "OLD");
        fx.backend
            .set(
                Collection::Variables,
                &StoredRecord::new(key.clone(), String::from("vaulter:v1:opaque"), true, 1),
            )
            .await
            .expect("seed");

        let mut config = fx.config.clone();
        config.encryption.keys.clear();
        let resolver = KeyResolver::from_config(&config)
            .expect("resolver")
            .with_vars(HashMap::new());
        let engine = ApplyEngine::new(Arc::clone(&fx.backend), &resolver, &config, ctx());

        let result = engine
            .apply(&plan(vec![change("OLD", ChangeAction::Delete, None)]))
            .await
            .expect("apply");
        assert!(matches!(result.results[0].outcome, ChangeOutcome::Succeeded { .. }));
        assert!(fx.backend.get(Collection::Variables, &key).await.expect("get").is_none());
    }
}
