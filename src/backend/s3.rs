//! S3 backend.
//!
//! Records are JSON objects under
//! `<prefix>/<collection>/<project>/<environment>/<scope marker>/<KEY>.json`.
//! Every write is a single `PutObject` or `DeleteObject`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{BackendError, Result};

use super::store::Backend;
use super::types::{Collection, RecordKey, StoredRecord};

/// AWS S3 (or compatible) backend.
#[derive(Debug, Clone)]
pub struct S3Backend {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending with `/`.
    prefix: String,
}

/// Normalises a key prefix to empty or `path/`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

impl S3Backend {
    /// Creates a backend using the AWS default credential chain.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a backend with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Returns the object key of a record.
    fn object_key(&self, collection: Collection, key: &RecordKey) -> Result<String> {
        Ok(format!("{}{collection}/{}.json", self.prefix, key.storage_path()?))
    }

    /// Returns the listing prefix of a project, or of one of its environments.
    fn list_prefix(&self, collection: Collection, project: &str, environment: Option<&str>) -> String {
        match environment {
            Some(env) => format!("{}{collection}/{project}/{env}/", self.prefix),
            None => format!("{}{collection}/{project}/", self.prefix),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| BackendError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| BackendError::Corrupted {
                    key: key.to_string(),
                    message: format!("Invalid UTF-8 in S3 object: {e}"),
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(BackendError::s3(format!("S3 get error: {service_err}")).into())
                }
            }
        }
    }

    /// Lists every object key under a prefix, following continuation tokens.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| BackendError::s3(format!("S3 list error: {e}")))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| key.ends_with(".json"))
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(next) if response.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn read_all(&self, prefix: &str) -> Result<Vec<StoredRecord>> {
        let mut records = Vec::new();
        for key in self.list_keys(prefix).await? {
            let Some(content) = self.get_object(&key).await? else {
                continue;
            };
            let record = serde_json::from_str(&content).map_err(|e| BackendError::Corrupted {
                key: key.clone(),
                message: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn connect(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable {
                message: format!("Cannot reach bucket {}: {e}", self.bucket),
            })?;
        info!("Connected to s3://{}/{}", self.bucket, self.prefix);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("Disconnected from s3://{}", self.bucket);
        Ok(())
    }

    async fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>> {
        let object_key = self.object_key(collection, key)?;
        let Some(content) = self.get_object(&object_key).await? else {
            return Ok(None);
        };

        let record = serde_json::from_str(&content).map_err(|e| BackendError::Corrupted {
            key: object_key,
            message: e.to_string(),
        })?;
        Ok(Some(record))
    }

    async fn list(&self, collection: Collection, project: &str, environment: &str) -> Result<Vec<StoredRecord>> {
        let prefix = self.list_prefix(collection, project, Some(environment));
        debug!("Listing s3://{}/{prefix}", self.bucket);
        self.read_all(&prefix).await
    }

    async fn set(&self, collection: Collection, record: &StoredRecord) -> Result<()> {
        let object_key = self.object_key(collection, &record.id)?;
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| BackendError::s3(format!("Failed to serialize {}: {e}", record.id)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| BackendError::s3(format!("S3 put error: {e}")))?;

        debug!("Stored s3://{}/{object_key}", self.bucket);
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool> {
        let object_key = self.object_key(collection, key)?;

        // DeleteObject succeeds on missing keys, so check first.
        let existed = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_or_else(
                |sdk_err| {
                    let service_err = sdk_err.into_service_error();
                    if service_err.is_not_found() {
                        Ok(false)
                    } else {
                        Err(BackendError::s3(format!("S3 head error: {service_err}")))
                    }
                },
                |_| Ok(true),
            )?;

        if !existed {
            return Ok(false);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| BackendError::s3(format!("S3 delete error: {e}")))?;

        debug!("Deleted s3://{}/{object_key}", self.bucket);
        Ok(true)
    }

    async fn export(&self, collection: Collection, project: &str) -> Result<Vec<StoredRecord>> {
        let prefix = self.list_prefix(collection, project, None);
        let records = self.read_all(&prefix).await?;
        info!("Exported {} {collection} records for {project}", records.len());
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
