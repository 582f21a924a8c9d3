//! Version history: immutable per-identity records with rollback and
//! retention compaction.

pub mod retention;
mod store;
mod types;

pub use retention::compact;
pub use store::VersionStore;
pub use types::{RetentionPolicy, VersionRecord, checksum};
