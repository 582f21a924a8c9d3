//! Backend trait definition.
//!
//! This module defines the common interface for remote storage backends.

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;

use super::types::{Collection, RecordKey, StoredRecord};

/// Trait for remote storage backends.
///
/// Each `set` and `delete` is a single atomic write of one record.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Prepares the backend for use.
    async fn connect(&self) -> Result<()>;

    /// Releases any resources held by the backend.
    async fn disconnect(&self) -> Result<()>;

    /// Loads one record.
    ///
    /// Returns `None` if the record does not exist.
    async fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>>;

    /// Lists every record of one project environment.
    async fn list(&self, collection: Collection, project: &str, environment: &str) -> Result<Vec<StoredRecord>>;

    /// Writes one record, replacing any previous one.
    async fn set(&self, collection: Collection, record: &StoredRecord) -> Result<()>;

    /// Writes several records.
    async fn set_many(&self, collection: Collection, records: &[StoredRecord]) -> Result<()> {
        for record in records {
            self.set(collection, record).await?;
        }
        Ok(())
    }

    /// Deletes one record.
    ///
    /// Returns `false` if it did not exist.
    async fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool>;

    /// Deletes several records. Returns how many existed.
    async fn delete_many_by_keys(&self, collection: Collection, keys: &[RecordKey]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(collection, key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Returns every record of a project across environments.
    async fn export(&self, collection: Collection, project: &str) -> Result<Vec<StoredRecord>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
