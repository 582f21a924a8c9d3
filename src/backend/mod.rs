//! Remote storage backends.
//!
//! This module provides the authoritative store for encrypted variables and
//! their version history, with a filesystem and an S3 implementation.

mod fs;
mod pool;
mod s3;
mod store;
mod types;

pub use fs::FsBackend;
pub use pool::{BackendPool, DEFAULT_FS_BACKEND_DIR, connection_string, create_backend};
pub use s3::S3Backend;
pub use store::Backend;
pub use types::{Collection, RecordKey, StoredRecord};
