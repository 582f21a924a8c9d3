//! Append-only provenance log.
//!
//! One JSON object per line; file order is causal order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, StateError};
use crate::model::Scope;

/// Kinds of mutation recorded in provenance and version history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Value created or changed.
    Set,
    /// Value removed.
    Delete,
    /// Value moved between scopes.
    Move,
    /// Value replaced as part of a rotation.
    Rotate,
    /// Earlier value restored.
    Rollback,
    /// Value copied from another environment.
    Clone,
    /// Value read from a dotenv file.
    Import,
}

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The command line.
    #[default]
    Cli,
    /// An MCP tool call.
    Mcp,
    /// A library caller.
    Api,
    /// A file import.
    Import,
    /// A runtime loader.
    Loader,
}

/// Who performed a mutation and through which surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationContext {
    /// Actor name, usually `user@host`.
    pub actor: String,
    /// Surface the mutation came through.
    pub source: Source,
}

/// A single provenance record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvenanceEntry {
    /// When the mutation happened.
    pub timestamp: DateTime<Utc>,
    /// Kind of mutation.
    pub operation: Operation,
    /// Who performed it.
    pub actor: String,
    /// Surface it came through.
    pub source: Source,
    /// Variable name.
    pub key: String,
    /// Scope of the variable.
    pub scope: Scope,
    /// Environment of the variable.
    pub environment: String,
}

/// Newline-delimited JSON log of local mutations.
#[derive(Debug, Clone)]
pub struct ProvenanceLog {
    /// Path to the log file.
    path: PathBuf,
}

/// Returns `user@host` for the current process.
#[must_use]
pub fn default_actor() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| String::from("unknown"));
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| String::from("localhost"));
    format!("{user}@{host}")
}

impl MutationContext {
    /// Creates a context.
    #[must_use]
    pub fn new(actor: impl Into<String>, source: Source) -> Self {
        Self {
            actor: actor.into(),
            source,
        }
    }

    /// Context for the current user on the given surface.
    #[must_use]
    pub fn current(source: Source) -> Self {
        Self::new(default_actor(), source)
    }

    /// Builds the provenance entry for a mutation.
    #[must_use]
    pub fn entry(&self, operation: Operation, key: &str, scope: &Scope, environment: &str) -> ProvenanceEntry {
        ProvenanceEntry {
            timestamp: Utc::now(),
            operation,
            actor: self.actor.clone(),
            source: self.source,
            key: key.to_string(),
            scope: scope.clone(),
            environment: environment.to_string(),
        }
    }
}

impl ProvenanceLog {
    /// Creates a log at the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or written.
    pub fn append(&self, entry: &ProvenanceEntry) -> Result<()> {
        let write_failed = |message: String| StateError::WriteFailed {
            path: self.path.clone(),
            message,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_failed(e.to_string()))?;
        }

        let mut line = serde_json::to_string(entry).map_err(|e| write_failed(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| write_failed(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| write_failed(e.to_string()))?;

        debug!(
            "Recorded {:?} of {} in {}/{}",
            entry.operation, entry.key, entry.environment, entry.scope
        );
        Ok(())
    }

    /// Reads every entry in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or a line is not valid JSON.
    pub fn read_all(&self) -> Result<Vec<ProvenanceEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| StateError::ReadFailed {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let mut entries = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: ProvenanceEntry =
                serde_json::from_str(line).map_err(|e| StateError::ProvenanceCorrupted {
                    line: i + 1,
                    message: e.to_string(),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Returns the entries for one variable, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub fn history(&self, environment: &str, key: &str) -> Result<Vec<ProvenanceEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|entry| entry.environment == environment && entry.key == key)
            .collect())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Rotate => "rotate",
            Self::Rollback => "rollback",
            Self::Clone => "clone",
            Self::Import => "import",
        };
        write!(f, "{name}")
    }
}
