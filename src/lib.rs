// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Vaulter
//!
//! A local-first synchronization core for per-environment secrets and
//! configuration.
//!
//! ## Overview
//!
//! Teams keep variables per environment and per service. Edits happen offline
//! in local dotenv files; a deterministic plan compares them with the
//! authoritative backend, and apply writes the encrypted difference:
//!
//! - Local edits with an append-only provenance log
//! - Write policy checks (forbidden keys, scope rules, sensitivity heuristics)
//! - Per-environment key resolution with AES-256-GCM or age envelopes
//! - Plans with conflict strategies and a health scorecard
//! - Concurrent, idempotent apply with per-key outcomes
//! - Version history with rollback and retention
//!
//! ## Architecture
//!
//! 1. **Local state**: `configs.env` and `secrets.env` per scope, written by [`local`]
//! 2. **Remote state**: encrypted records in a [`backend`] (filesystem or S3)
//! 3. **Sync**: [`planner`] diffs the two and applies changes, [`versions`]
//!    records every write
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`model`]: Scopes, keys and write syntax
//! - [`crypto`]: Key resolution and envelope encryption
//! - [`local`]: Local state files and provenance
//! - [`governance`]: Write policy checks
//! - [`backend`]: Remote storage backends
//! - [`versions`]: Version history and retention
//! - [`planner`]: Diff, plan, scorecard and apply
//! - [`sync`]: Composition root and orchestration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project: my-app
//! environments: [dev, stg, prd]
//! backend:
//!   type: s3
//!   bucket: my-app-secrets
//! encryption:
//!   mode: symmetric
//!   shared_key_environment: prd
//! sync:
//!   conflict: error
//! policy:
//!   mode: strict
//!   forbidden:
//!     prd:
//!       keys: ["DEBUG*"]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod governance;
pub mod local;
pub mod model;
pub mod planner;
pub mod sync;
pub mod versions;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{Backend, BackendPool, FsBackend, S3Backend};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, VaulterConfig};
pub use crypto::{KeyMaterial, KeyResolver};
pub use error::{Result, VaulterError};
pub use local::{LocalStateStore, MutationContext, ProvenanceLog};
pub use model::{Scope, Variable, VariableIdentity};
pub use planner::{ApplyEngine, ApplyResult, DiffEngine, Plan, Scorecard};
pub use sync::{AppContext, Synchronizer};
pub use versions::{VersionRecord, VersionStore};
