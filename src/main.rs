//! Vaulter CLI entrypoint.
//!
//! This is the main entrypoint for the vaulter command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use vaulter::cli::{Cli, Commands, OutputFormat, OutputFormatter, Target};
use vaulter::config::{ConfigParser, find_config_file};
use vaulter::error::Result;
use vaulter::local::{MoveOptions, Source};
use vaulter::model::{Scope, parse_assignment};
use vaulter::sync::AppContext;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns false when the command ran but did not
/// fully succeed.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let app = load_context(cli.config.as_ref())?;

    match cli.command {
        Commands::Set { assignment, target } => cmd_set(&app, &assignment, &target, &formatter),
        Commands::Delete { key, target } => cmd_delete(&app, &key, &target, &formatter),
        Commands::Move {
            key,
            from,
            to,
            env,
            overwrite,
            copy,
        } => {
            let options = MoveOptions {
                overwrite,
                delete_original: !copy,
            };
            cmd_move(&app, &key, &from, &to, env.as_deref(), options, &formatter)
        }
        Commands::List {
            env,
            scope,
            reveal,
            remote,
        } => cmd_list(&app, env.as_deref(), scope.as_deref(), reveal, remote, &formatter).await,
        Commands::Import {
            file,
            target,
            secrets,
            configs,
            patterns,
        } => {
            let sensitive = match (secrets, configs) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd_import(&app, &file, &target, sensitive, &patterns, &formatter)
        }
        Commands::Clone { from, to, overwrite } => {
            let result = app.clone_environment(&from, &to, overwrite)?;
            emit(&formatter.format_write(&format!("Cloned {from} into {to}"), &result))?;
            Ok(result.success)
        }
        Commands::Plan { env, scope } => cmd_plan(&app, env.as_deref(), scope.as_deref(), &formatter).await,
        Commands::Apply {
            env,
            scope,
            dry_run,
            yes,
        } => cmd_apply(&app, env.as_deref(), scope.as_deref(), dry_run, yes, &formatter).await,
        Commands::Versions { key, target } => cmd_versions(&app, &key, &target, &formatter).await,
        Commands::Rollback { key, version, target } => {
            cmd_rollback(&app, &key, version, &target, &formatter).await
        }
        Commands::Keygen { env, force } => {
            let environment = environment(&app, env.as_deref());
            let generated = app.resolver().generate_key(&environment, force)?;
            emit(&formatter.format_key(&environment, &generated))?;
            Ok(true)
        }
        Commands::RotateKey { env, backup, yes } => {
            cmd_rotate_key(&app, env.as_deref(), backup, yes, &formatter).await
        }
        Commands::Export { env, service, file } => {
            let environment = environment(&app, env.as_deref());
            let sync = app.synchronizer().await?;
            let result = sync.export_env(&environment, service.as_deref(), &file).await?;
            emit(&formatter.format_export(&result))?;
            Ok(result.skipped.is_empty())
        }
    }
}

/// Write a variable locally.
fn cmd_set(app: &AppContext, raw: &str, target: &Target, formatter: &OutputFormatter) -> Result<bool> {
    let (environment, scope) = resolve_target(app, target)?;
    let assignment = parse_assignment(raw)?;

    let outcome = app.set_variable(&environment, &scope, &assignment)?;
    for warning in &outcome.governance.warnings {
        warn!("{warning}");
    }
    for suggestion in &outcome.governance.suggestions {
        eprintln!("hint: {suggestion}");
    }

    let kind = if outcome.governance.effective_sensitive {
        "secret"
    } else {
        "config"
    };
    emit(&formatter.format_write(
        &format!("Set {kind} {} in {environment}/{scope}", assignment.key),
        &outcome.write,
    ))?;
    Ok(outcome.write.success)
}

/// Delete a local variable.
fn cmd_delete(app: &AppContext, key: &str, target: &Target, formatter: &OutputFormatter) -> Result<bool> {
    let (environment, scope) = resolve_target(app, target)?;
    let result = app.local().delete_variable(&environment, &scope, key, app.context())?;
    emit(&formatter.format_write(&format!("Deleted {key} from {environment}/{scope}"), &result))?;
    Ok(result.success)
}

/// Move a local variable between scopes.
fn cmd_move(
    app: &AppContext,
    key: &str,
    from: &str,
    to: &str,
    env: Option<&str>,
    options: MoveOptions,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let environment = environment(app, env);
    let from: Scope = from.parse()?;
    let to: Scope = to.parse()?;
    let result = app.move_variable(&environment, key, &from, &to, options)?;
    let verb = if options.delete_original { "Moved" } else { "Copied" };
    emit(&formatter.format_write(&format!("{verb} {key} from {from} to {to}"), &result))?;
    Ok(result.success)
}

/// List local or remote variables.
async fn cmd_list(
    app: &AppContext,
    env: Option<&str>,
    scope: Option<&str>,
    reveal: bool,
    remote: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let environment = environment(app, env);
    let scope = scope.map(str::parse::<Scope>).transpose()?;
    if remote {
        let sync = app.synchronizer().await?;
        let variables = sync.list_remote(&environment, scope.as_ref()).await?;
        emit(&formatter.format_remote_variables(&environment, &variables, reveal))?;
    } else {
        let state = app.local().read_state(&environment, scope.as_ref())?;
        emit(&formatter.format_local_state(&state, reveal))?;
    }
    Ok(true)
}

/// Import a dotenv file.
fn cmd_import(
    app: &AppContext,
    file: &Path,
    target: &Target,
    sensitive: Option<bool>,
    patterns: &[String],
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (environment, scope) = resolve_target(app, target)?;

    let mut sensitive_patterns = app.config().policy.sensitive_patterns.clone();
    sensitive_patterns.extend(patterns.iter().cloned());
    let result = app.import_file(file, &environment, &scope, sensitive, &sensitive_patterns)?;
    emit(&formatter.format_write(
        &format!("Imported {} into {environment}/{scope}", file.display()),
        &result,
    ))?;
    Ok(result.success)
}

/// Show the sync plan.
async fn cmd_plan(
    app: &AppContext,
    env: Option<&str>,
    scope: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let environment = environment(app, env);
    let scope = scope.map(str::parse::<Scope>).transpose()?;

    let sync = app.synchronizer().await?;
    let plan = sync.compute_plan(&environment, scope.as_ref()).await?;
    emit(&formatter.format_plan(&plan))?;
    Ok(true)
}

/// Apply the sync plan.
async fn cmd_apply(
    app: &AppContext,
    env: Option<&str>,
    scope: Option<&str>,
    dry_run: bool,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let environment = environment(app, env);
    let scope = scope.map(str::parse::<Scope>).transpose()?;

    let sync = app.synchronizer().await?;
    let plan = sync.compute_plan(&environment, scope.as_ref()).await?;

    if plan.is_empty() {
        emit(&formatter.format_plan(&plan))?;
        return Ok(true);
    }

    if !dry_run && !auto_approve {
        eprintln!("{}", OutputFormatter::new(OutputFormat::Text).format_plan(&plan));
        if !confirm("Do you want to apply this plan? [y/N]: ")? {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    let result = sync.apply_plan(&plan, dry_run).await?;
    emit(&formatter.format_apply(&result))?;
    Ok(result.is_success())
}

/// Show the version history of a variable.
async fn cmd_versions(app: &AppContext, key: &str, target: &Target, formatter: &OutputFormatter) -> Result<bool> {
    let (environment, scope) = resolve_target(app, target)?;
    let sync = app.synchronizer().await?;
    let versions = sync.list_versions(&environment, &scope, key).await?;
    emit(&formatter.format_versions(&versions))?;
    Ok(true)
}

/// Restore an earlier version.
async fn cmd_rollback(
    app: &AppContext,
    key: &str,
    version: u64,
    target: &Target,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let (environment, scope) = resolve_target(app, target)?;
    let sync = app.synchronizer().await?;
    let record = sync.rollback(&environment, &scope, key, version).await?;
    emit(&formatter.format_versions(std::slice::from_ref(&record)))?;
    Ok(true)
}

/// Rotate the key of an environment.
async fn cmd_rotate_key(
    app: &AppContext,
    env: Option<&str>,
    backup: bool,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let environment = environment(app, env);

    if !auto_approve {
        let prompt = format!("Replace the key of '{environment}' and re-encrypt every value it protects? [y/N]: ");
        if !confirm(&prompt)? {
            eprintln!("Rotation cancelled.");
            return Ok(true);
        }
    }

    let sync = app.synchronizer().await?;
    let rotation = sync.rotate_encryption_key(&environment, backup).await?;
    emit(&formatter.format_rotation(&rotation))?;
    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads the configuration and builds the composition root.
fn load_context(config_path: Option<&PathBuf>) -> Result<AppContext> {
    let config_file = config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    AppContext::new(config, Source::Cli)
}

/// Returns the requested environment or the configured default.
fn environment(app: &AppContext, env: Option<&str>) -> String {
    env.map_or_else(|| app.config().default_environment.clone(), String::from)
}

/// Resolves the environment and scope of a command.
fn resolve_target(app: &AppContext, target: &Target) -> Result<(String, Scope)> {
    let scope: Scope = target.scope.parse()?;
    Ok((environment(app, target.env.as_deref()), scope))
}

/// Asks for a yes/no confirmation on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
