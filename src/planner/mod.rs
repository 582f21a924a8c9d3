//! Planning and apply.
//!
//! This module handles:
//! - Computing diffs between local and decrypted remote snapshots
//! - Building sync plans with a health scorecard
//! - Applying plans to a backend with bounded concurrency

mod diff;
mod executor;
mod plan;
mod scorecard;

pub use diff::{DiffEngine, DiffOptions, DiffResult, Snapshot, SnapshotEntry, local_snapshot};
pub use executor::{ApplyEngine, ApplyResult, ChangeOutcome, ChangeResult};
pub use plan::{ChangeAction, Plan, PlanChange, PlanSummary, SkippedKey, VariableRef};
pub use scorecard::{DriftCounts, Health, OverdueRotation, Scorecard};
