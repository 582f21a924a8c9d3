//! Local state: dotenv files edited offline, plus the provenance log.
//!
//! The store is synchronous and never talks to a backend. Planning reads it;
//! edits and rollbacks write it.

mod envfile;
mod provenance;
pub mod sections;
mod store;

pub use envfile::{
    parse_env_str, quote_value, read_env_file, read_import_file, write_atomic, write_env_file,
};
pub use provenance::{MutationContext, Operation, ProvenanceEntry, ProvenanceLog, Source, default_actor};
pub use sections::{ManagedFile, render_env_output};
pub use store::{
    CONFIGS_FILE, LocalEntry, LocalState, LocalStateStore, LocalWriteResult, MoveOptions,
    SECRETS_FILE, VariableWrite,
};
