//! Shared fixtures for unit tests.

use async_trait::async_trait;
use mockall::mock;
use std::path::Path;

use crate::backend::{Collection, RecordKey, StoredRecord};
use crate::config::{KdfConfig, VaulterConfig};
use crate::error::Result;

mock! {
    pub Backend {}

    #[async_trait]
    impl crate::backend::Backend for Backend {
        async fn connect(&self) -> Result<()>;
        async fn disconnect(&self) -> Result<()>;
        async fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>>;
        async fn list(&self, collection: Collection, project: &str, environment: &str) -> Result<Vec<StoredRecord>>;
        async fn set(&self, collection: Collection, record: &StoredRecord) -> Result<()>;
        async fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool>;
        async fn export(&self, collection: Collection, project: &str) -> Result<Vec<StoredRecord>>;
        fn backend_type(&self) -> &'static str;
    }
}

// `Backend` requires `Debug`, which `mock!` does not derive.
impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MockBackend")
    }
}

/// Configuration rooted in a temporary directory, with inline symmetric
/// keys for `dev` and `prd` and cheap KDF parameters.
pub fn test_config(root: &Path) -> VaulterConfig {
    let mut config = VaulterConfig::new("app");
    config.local.path = root.join("local").display().to_string();
    config.backend.path = Some(root.join("remote").display().to_string());
    config.encryption.key_dir = Some(root.join("keys").display().to_string());
    config.encryption.kdf = KdfConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };
    config
        .encryption
        .keys
        .insert(String::from("dev"), String::from("dev-passphrase"));
    config
        .encryption
        .keys
        .insert(String::from("prd"), String::from("prd-passphrase"));
    config
}
