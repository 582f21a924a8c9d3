//! Connected backend handles, reused across operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::config::{BackendType, VaulterConfig};
use crate::error::{ConfigError, Result};

use super::fs::FsBackend;
use super::s3::S3Backend;
use super::store::Backend;

/// Root of the fs backend when `backend.path` is unset.
pub const DEFAULT_FS_BACKEND_DIR: &str = ".vaulter/remote";

/// How long an idle handle stays cached.
const DEFAULT_POOL_TTL: Duration = Duration::from_secs(300);

/// Cache of connected backends keyed by (connection string, project).
#[derive(Debug)]
pub struct BackendPool {
    /// Connected handles.
    cache: TtlCache<(String, String), Arc<dyn Backend>>,
}

impl Default for BackendPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_TTL)
    }
}

/// Returns the connection string identifying a backend configuration.
///
/// # Errors
///
/// Returns an error if an S3 backend has no bucket.
pub fn connection_string(config: &VaulterConfig) -> Result<String> {
    let backend = &config.backend;
    match backend.backend_type {
        BackendType::Fs => Ok(format!(
            "fs://{}",
            backend.path.as_deref().unwrap_or(DEFAULT_FS_BACKEND_DIR)
        )),
        BackendType::S3 => {
            let bucket = backend
                .bucket
                .as_deref()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| ConfigError::validation("S3 backend requires a bucket", "backend.bucket"))?;
            Ok(format!(
                "s3://{bucket}/{}",
                backend.prefix.as_deref().unwrap_or_default()
            ))
        }
    }
}

impl BackendPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    /// Returns a connected backend for the configuration, connecting on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete or the backend
    /// cannot be reached.
    pub async fn get(&self, config: &VaulterConfig) -> Result<Arc<dyn Backend>> {
        let cache_key = (connection_string(config)?, config.project.clone());
        if let Some(backend) = self.cache.get(&cache_key) {
            debug!("Reusing backend {}", cache_key.0);
            return Ok(backend);
        }

        let backend = create_backend(config).await?;
        backend.connect().await?;
        info!("Connected {} backend {}", backend.backend_type(), cache_key.0);

        self.cache.insert(cache_key, Arc::clone(&backend));
        Ok(backend)
    }

    /// Registers an already connected backend for the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete.
    pub fn register(&self, config: &VaulterConfig, backend: Arc<dyn Backend>) -> Result<()> {
        let cache_key = (connection_string(config)?, config.project.clone());
        self.cache.insert(cache_key, backend);
        Ok(())
    }

    /// Drops every cached handle.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Drops the handles of one project.
    pub fn invalidate_project(&self, project: &str) {
        self.cache.invalidate_where(|(_, p)| p == project);
    }

    /// Returns the number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if no handle is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Builds an unconnected backend for the configuration.
///
/// # Errors
///
/// Returns an error if an S3 backend has no bucket.
pub async fn create_backend(config: &VaulterConfig) -> Result<Arc<dyn Backend>> {
    let backend = &config.backend;
    match backend.backend_type {
        BackendType::Fs => {
            let root = backend
                .path
                .as_deref()
                .map_or_else(|| PathBuf::from(DEFAULT_FS_BACKEND_DIR), PathBuf::from);
            Ok(Arc::new(FsBackend::new(root)))
        }
        BackendType::S3 => {
            let bucket = backend
                .bucket
                .as_deref()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| ConfigError::validation("S3 backend requires a bucket", "backend.bucket"))?;
            Ok(Arc::new(
                S3Backend::new(bucket, backend.prefix.as_deref(), backend.region.as_deref()).await,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fs_config(dir: &TempDir) -> VaulterConfig {
        let mut config = VaulterConfig::new("app");
        config.backend.path = Some(dir.path().join("remote").display().to_string());
        config
    }

    #[tokio::test]
    async fn test_pool_reuses_handles() {
        let dir = TempDir::new().expect("temp dir");
        let config = fs_config(&dir);
        let pool = BackendPool::default();

        let first = pool.get(&config).await.expect("connect");
        let second = pool.get(&config).await.expect("reuse");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
        assert!(dir.path().join("remote").is_dir());
    }

    #[tokio::test]
    async fn test_invalidate_drops_handles() {
        let dir = TempDir::new().expect("temp dir");
        let config = fs_config(&dir);
        let pool = BackendPool::default();

        let first = pool.get(&config).await.expect("connect");
        pool.invalidate_project("other");
        assert_eq!(pool.len(), 1);

        pool.invalidate();
        assert!(pool.is_empty());
        let second = pool.get(&config).await.expect("reconnect");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_connection_string() {
        let mut config = VaulterConfig::new("app");
        assert_eq!(
            connection_string(&config).expect("fs"),
            format!("fs://{DEFAULT_FS_BACKEND_DIR}")
        );

        config.backend.backend_type = BackendType::S3;
        assert!(connection_string(&config).is_err());

        config.backend.bucket = Some(String::from("bucket"));
        config.backend.prefix = Some(String::from("team"));
        assert_eq!(connection_string(&config).expect("s3"), "s3://bucket/team");
    }
}
