//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Vaulter - local-first secrets and configuration sync.
#[derive(Parser, Debug)]
#[command(name = "vaulter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "VAULTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Environment and scope selection shared by most commands.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Environment (defaults to the configured default environment).
    #[arg(short, long)]
    pub env: Option<String>,

    /// Scope: `shared`, `service:<name>` or a service name.
    #[arg(short, long, default_value = "shared")]
    pub scope: String,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a variable locally (`KEY=value` for a secret, `KEY::value` for a config).
    Set {
        /// Assignment expression.
        assignment: String,

        /// Target environment and scope.
        #[command(flatten)]
        target: Target,
    },

    /// Delete a local variable.
    Delete {
        /// Variable name.
        key: String,

        /// Target environment and scope.
        #[command(flatten)]
        target: Target,
    },

    /// Move a local variable between scopes.
    Move {
        /// Variable name.
        key: String,

        /// Source scope.
        #[arg(long)]
        from: String,

        /// Destination scope.
        #[arg(long)]
        to: String,

        /// Environment (defaults to the configured default environment).
        #[arg(short, long)]
        env: Option<String>,

        /// Replace the key if the destination already holds it.
        #[arg(long)]
        overwrite: bool,

        /// Keep the source (copy instead of move).
        #[arg(long)]
        copy: bool,
    },

    /// List local variables, or the decrypted remote ones.
    List {
        /// Environment (defaults to the configured default environment).
        #[arg(short, long)]
        env: Option<String>,

        /// Only list one scope.
        #[arg(short, long)]
        scope: Option<String>,

        /// Show secret values.
        #[arg(long)]
        reveal: bool,

        /// List the backend's variables with their versions.
        #[arg(long)]
        remote: bool,
    },

    /// Import a dotenv file into local state.
    Import {
        /// File to read.
        file: PathBuf,

        /// Target environment and scope.
        #[command(flatten)]
        target: Target,

        /// Store every imported value as a secret.
        #[arg(long, conflicts_with = "configs")]
        secrets: bool,

        /// Store every imported value as a config.
        #[arg(long)]
        configs: bool,

        /// Extra glob patterns of keys to treat as secrets.
        #[arg(long = "sensitive")]
        patterns: Vec<String>,
    },

    /// Copy every local variable of one environment into another.
    Clone {
        /// Source environment.
        #[arg(long)]
        from: String,

        /// Destination environment.
        #[arg(long)]
        to: String,

        /// Replace values already present in the destination.
        #[arg(long)]
        overwrite: bool,
    },

    /// Show the changes that would sync local state to the backend.
    Plan {
        /// Environment (defaults to the configured default environment).
        #[arg(short, long)]
        env: Option<String>,

        /// Only plan one scope.
        #[arg(short, long)]
        scope: Option<String>,
    },

    /// Sync local state to the backend.
    Apply {
        /// Environment (defaults to the configured default environment).
        #[arg(short, long)]
        env: Option<String>,

        /// Only apply one scope.
        #[arg(short, long)]
        scope: Option<String>,

        /// Report what would change without writing.
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the version history of a variable.
    Versions {
        /// Variable name.
        key: String,

        /// Target environment and scope.
        #[command(flatten)]
        target: Target,
    },

    /// Restore an earlier version of a variable.
    Rollback {
        /// Variable name.
        key: String,

        /// Version to restore.
        version: u64,

        /// Target environment and scope.
        #[command(flatten)]
        target: Target,
    },

    /// Generate an encryption key for an environment.
    Keygen {
        /// Environment, or `master` for the fallback key.
        #[arg(short, long)]
        env: Option<String>,

        /// Replace an existing key.
        #[arg(short, long)]
        force: bool,
    },

    /// Replace an environment key and re-encrypt every value it protects.
    RotateKey {
        /// Environment (defaults to the configured default environment).
        #[arg(short, long)]
        env: Option<String>,

        /// Keep a copy of the previous key files.
        #[arg(long)]
        backup: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Write remote variables into the managed block of a dotenv file.
    Export {
        /// Environment (defaults to the configured default environment).
        #[arg(short, long)]
        env: Option<String>,

        /// Service whose values override shared ones.
        #[arg(long)]
        service: Option<String>,

        /// File to write.
        #[arg(short = 'f', long, default_value = ".env")]
        file: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let cli = Cli::try_parse_from(["vaulter", "set", "API_KEY=abc", "-e", "prd", "-s", "service:api"])
            .expect("parse");
        let Commands::Set { assignment, target } = cli.command else {
            panic!("expected set");
        };
        assert_eq!(assignment, "API_KEY=abc");
        assert_eq!(target.env.as_deref(), Some("prd"));
        assert_eq!(target.scope, "service:api");
    }

    #[test]
    fn test_scope_defaults_to_shared() {
        let cli = Cli::try_parse_from(["vaulter", "versions", "API_KEY"]).expect("parse");
        let Commands::Versions { target, .. } = cli.command else {
            panic!("expected versions");
        };
        assert_eq!(target.scope, "shared");
        assert!(target.env.is_none());
    }

    #[test]
    fn test_list_remote_flag() {
        let cli = Cli::try_parse_from(["vaulter", "list", "--remote", "-e", "prd"]).expect("parse");
        let Commands::List { env, remote, reveal, .. } = cli.command else {
            panic!("expected list");
        };
        assert!(remote);
        assert!(!reveal);
        assert_eq!(env.as_deref(), Some("prd"));
    }

    #[test]
    fn test_import_modes_conflict() {
        assert!(Cli::try_parse_from(["vaulter", "import", ".env", "--secrets", "--configs"]).is_err());
    }

    #[test]
    fn test_global_output_flag() {
        let cli = Cli::try_parse_from(["vaulter", "plan", "--output", "json"]).expect("parse");
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(!cli.log_json);
    }
}
