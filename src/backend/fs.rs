//! Filesystem backend.
//!
//! Records are JSON files laid out as
//! `<root>/<collection>/<project>/<environment>/<scope marker>/<KEY>.json`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{BackendError, Result, ValidationError};
use crate::model::is_valid_service_name;

use super::store::Backend;
use super::types::{Collection, RecordKey, StoredRecord};

/// Record file extension.
const RECORD_EXT: &str = "json";

/// Directory tree of JSON records.
#[derive(Debug, Clone)]
pub struct FsBackend {
    /// Root directory.
    root: PathBuf,
}

impl FsBackend {
    /// Creates a backend rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection: Collection, key: &RecordKey) -> Result<PathBuf> {
        let relative = key.storage_path()?;
        Ok(self
            .root
            .join(collection.as_str())
            .join(format!("{relative}.{RECORD_EXT}")))
    }

    async fn read_record(path: &Path) -> Result<Option<StoredRecord>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BackendError::storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                ))
                .into());
            }
        };

        let record = serde_json::from_str(&content).map_err(|e| BackendError::Corrupted {
            key: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(record))
    }

    /// Reads every record below `dir`, which holds scope directories.
    async fn read_environment(dir: &Path) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::new();
        for scope_dir in list_dir(dir).await? {
            if !scope_dir.is_dir() {
                continue;
            }
            for file in list_dir(&scope_dir).await? {
                if file.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    continue;
                }
                if let Some(record) = Self::read_record(&file).await? {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

/// Lists a directory. A missing directory is empty.
async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(BackendError::storage(format!("Failed to list {}: {e}", dir.display())).into());
        }
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BackendError::storage(format!("Failed to list {}: {e}", dir.display())))?
    {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn check_segment(project: &str, environment: &str) -> Result<()> {
    if !is_valid_service_name(project) {
        return Err(ValidationError::InvalidKey {
            key: project.to_string(),
            reason: String::from("project name is not a valid path segment"),
        }
        .into());
    }
    if !is_valid_service_name(environment) {
        return Err(ValidationError::InvalidEnvironment {
            name: environment.to_string(),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl Backend for FsBackend {
    async fn connect(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| BackendError::Unavailable {
            message: format!("Cannot create {}: {e}", self.root.display()),
        })?;
        debug!("Connected to fs backend at {}", self.root.display());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("Disconnected from fs backend at {}", self.root.display());
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>> {
        let path = self.record_path(collection, key)?;
        Self::read_record(&path).await
    }

    async fn list(&self, collection: Collection, project: &str, environment: &str) -> Result<Vec<StoredRecord>> {
        check_segment(project, environment)?;
        let dir = self.root.join(collection.as_str()).join(project).join(environment);
        let records = Self::read_environment(&dir).await?;
        debug!(
            "Listed {} {collection} records for {project}/{environment}",
            records.len()
        );
        Ok(records)
    }

    async fn set(&self, collection: Collection, record: &StoredRecord) -> Result<()> {
        let path = self.record_path(collection, &record.id)?;
        let write_failed = |e: std::io::Error| BackendError::storage(format!("Failed to write {}: {e}", path.display()));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| BackendError::storage(format!("Failed to serialize {}: {e}", record.id)))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(write_failed)?;
        file.write_all(content.as_bytes()).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        fs::rename(&temp_path, &path).await.map_err(write_failed)?;

        debug!("Stored {collection} record {}", record.id);
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool> {
        let path = self.record_path(collection, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {collection} record {key}");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::storage(format!("Failed to delete {}: {e}", path.display())).into()),
        }
    }

    async fn export(&self, collection: Collection, project: &str) -> Result<Vec<StoredRecord>> {
        let project_dir = self.root.join(collection.as_str()).join(project);
        let mut records = Vec::new();
        for env_dir in list_dir(&project_dir).await? {
            if !env_dir.is_dir() {
                warn!("Ignoring unexpected file {}", env_dir.display());
                continue;
            }
            records.extend(Self::read_environment(&env_dir).await?);
        }
        info!("Exported {} {collection} records for {project}", records.len());
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "fs"
    }
}
