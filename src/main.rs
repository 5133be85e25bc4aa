use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use zsxq_sync::config::{AppConfig, ConfigError, TransformConfig};
use zsxq_sync::logging;
use zsxq_sync::models::SourceRecord;
use zsxq_sync::processor::{finalize_body, transform};
use zsxq_sync::relay::{ObjectRelay, relay_from_config};
use zsxq_sync::state::StateStore;
use zsxq_sync::sync::{SyncError, SyncerBuilder, test_mode_cap};
use zsxq_sync::utils::{
    CONFIG_FILE_NAME, DEFAULT_LOG_FILE, DEFAULT_STATE_FILE, ensure_parent_directory,
    resolve_config_path,
};
use zsxq_sync::wordpress::{WordPressClientBuilder, WordPressError};
use zsxq_sync::zsxq::{Backoff, ZsxqClientBuilder, ZsxqError};

/// zsxq-sync - publish 知识星球 topics to WordPress
#[derive(Parser)]
#[command(name = "zsxq-sync")]
#[command(about = "Synchronize 知识星球 topics to a WordPress site")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./config.json, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Sync state file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file (sync defaults to zsxq_sync.log)
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Fetch new topics and publish them
    Sync(SyncCommand),
    /// Transform a saved topic JSON file and print the result
    Preview(PreviewCommand),
    /// Show sync statistics
    Stats,
    /// Back up and clear the sync state
    Reset(ResetCommand),
    /// Write a configuration template
    Init(InitCommand),
    /// Validate the configuration and print it with secrets masked
    CheckConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SyncMode {
    Incremental,
    Full,
    Concurrent,
}

#[derive(Parser)]
struct SyncCommand {
    #[arg(long, value_enum, default_value_t = SyncMode::Incremental)]
    mode: SyncMode,

    /// Worker threads for concurrent mode
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Skip the connection checks before syncing
    #[arg(long)]
    skip_validation: bool,

    /// Fetch at most this many topics per target
    #[arg(long, value_name = "N")]
    max_topics: Option<usize>,
}

#[derive(Parser)]
struct PreviewCommand {
    /// Topic JSON as returned by the API
    #[arg(value_name = "TOPIC_JSON")]
    path: PathBuf,
}

#[derive(Parser)]
struct ResetCommand {
    /// Confirm the reset
    #[arg(long)]
    yes: bool,
}

#[derive(Parser)]
struct InitCommand {
    /// Where to write the template
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

/// A mistake in how the tool was invoked.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_file = cli.log_file.clone().or_else(|| {
        matches!(cli.command, Commands::Sync(_)).then(|| PathBuf::from(DEFAULT_LOG_FILE))
    });
    if let Err(e) = logging::init(cli.verbose, log_file.as_deref()) {
        eprintln!("Warning: {e:#}");
    }

    let result = match &cli.command {
        Commands::Sync(cmd) => handle_sync(&cli, cmd),
        Commands::Preview(cmd) => handle_preview(&cli, cmd),
        Commands::Stats => handle_stats(&cli.state),
        Commands::Reset(cmd) => handle_reset(&cli.state, cmd),
        Commands::Init(cmd) => handle_init(cmd),
        Commands::CheckConfig => handle_check_config(&cli),
    };

    if let Err(e) = result {
        // Determine exit code based on error type
        let exit_code = if is_user_error(&e) { 1 } else { 2 };
        eprintln!("Error: {}", logging::redact(&format!("{e:#}")));
        std::process::exit(exit_code);
    }
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors are problems the user fixes by editing configuration or
/// arguments: invalid configuration, rejected credentials, bad URLs.
/// Everything else (network, I/O, remote failures) is internal.
fn is_user_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        if cause.is::<UsageError>() || cause.is::<ConfigError>() {
            return true;
        }
        if let Some(e) = cause.downcast_ref::<ZsxqError>() {
            return matches!(
                e,
                ZsxqError::Authentication | ZsxqError::InvalidConfig(_) | ZsxqError::InvalidUrl(_)
            );
        }
        if let Some(e) = cause.downcast_ref::<WordPressError>() {
            return matches!(e, WordPressError::Authentication | WordPressError::InvalidUrl(_));
        }
        if let Some(e) = cause.downcast_ref::<SyncError>() {
            return matches!(
                e,
                SyncError::Source(ZsxqError::Authentication)
                    | SyncError::Publish(WordPressError::Authentication)
            );
        }
        false
    })
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = resolve_config_path(cli.config.as_deref());
    AppConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Handles the sync command: builds the clients and runs the chosen mode.
fn handle_sync(cli: &Cli, cmd: &SyncCommand) -> Result<()> {
    let config = load_config(cli)?;
    let max_topics = cmd
        .max_topics
        .or_else(|| test_mode_cap(|key| std::env::var(key).ok()));
    if let Some(max) = max_topics {
        info!(max, "Limiting topics per target");
    }

    let state = StateStore::load(&cli.state).context("Failed to load sync state")?;

    let source = ZsxqClientBuilder::from_config(&config.zsxq)
        .backoff(Backoff {
            max_attempts: config.sync.max_retries,
            ..Backoff::default()
        })
        .request_delay(Duration::from_secs(config.sync.delay_seconds))
        .build()
        .context("Failed to create source client")?;
    let publisher = WordPressClientBuilder::from_config(&config.wordpress)
        .build()
        .context("Failed to create WordPress client")?;
    let relay: Arc<dyn ObjectRelay> = Arc::from(relay_from_config(&config));

    let syncer = SyncerBuilder::new(config)
        .source(Arc::new(source))
        .publisher(Arc::new(publisher))
        .relay(relay)
        .state(state)
        .max_topics(max_topics)
        .build()?;

    if cmd.skip_validation {
        warn!("Skipping connection checks");
    } else {
        syncer
            .validate_connections()
            .context("Connection check failed")?;
    }

    let stats = match cmd.mode {
        SyncMode::Incremental => syncer.sync_incremental(),
        SyncMode::Full => syncer.sync_full(),
        SyncMode::Concurrent => syncer.sync_full_concurrent(cmd.workers),
    }
    .context("Sync failed")?;

    println!("Sync complete: {stats}");
    Ok(())
}

/// Handles the preview command: an offline transform of one topic.
fn handle_preview(cli: &Cli, cmd: &PreviewCommand) -> Result<()> {
    let text = std::fs::read_to_string(&cmd.path)
        .with_context(|| format!("Failed to read {}", cmd.path.display()))?;
    let record = SourceRecord::from_json(&text)
        .map_err(|e| UsageError(format!("{} is not valid JSON: {e}", cmd.path.display())))?;

    let path = resolve_config_path(cli.config.as_deref());
    let transform_config = if path.exists() {
        TransformConfig::from(&AppConfig::read(&path).with_context(|| {
            format!("Failed to read configuration from {}", path.display())
        })?)
    } else {
        TransformConfig::default()
    };

    let output = transform(&record, &transform_config)
        .map_err(|e| UsageError(format!("Cannot transform topic: {e}")))?;
    let body = finalize_body(&output, &Default::default(), &transform_config);

    let mut preview = serde_json::to_value(&output).context("Failed to serialize preview")?;
    preview["final_body"] = serde_json::Value::String(body);
    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}

/// Handles the stats command.
fn handle_stats(state_path: &Path) -> Result<()> {
    let store = StateStore::load(state_path).context("Failed to load sync state")?;
    let stats = store.statistics();

    println!("Synced topics: {}", stats.total_synced);
    println!(
        "Last sync:     {}",
        stats.last_sync_time.as_deref().unwrap_or("never")
    );
    if let Some(run) = stats.recent_sync {
        println!(
            "Last run:      {} at {} (total {}, success {}, failed {}, skipped {})",
            run.mode, run.timestamp, run.total, run.success, run.failed, run.skipped
        );
    }

    let duplicates = store.duplicate_titles();
    if !duplicates.is_empty() {
        println!("\nTitles synced more than once:");
        for (title, ids) in duplicates {
            println!("  {title} ({})", ids.join(", "));
        }
    }
    Ok(())
}

/// Handles the reset command.
fn handle_reset(state_path: &Path, cmd: &ResetCommand) -> Result<()> {
    if !cmd.yes {
        return Err(UsageError(
            "Reset clears every sync record; pass --yes to confirm".to_string(),
        )
        .into());
    }

    let mut store = StateStore::load(state_path).context("Failed to load sync state")?;
    match store.reset_with_backup().context("Failed to reset sync state")? {
        Some(backup) => println!("Sync state backed up to {}", backup.display()),
        None => println!("No sync state to back up"),
    }
    println!("Sync state cleared");
    Ok(())
}

/// Handles the init command.
fn handle_init(cmd: &InitCommand) -> Result<()> {
    let path = cmd
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    write_template(&path, cmd.force)?;
    println!("Configuration template written to {}", path.display());
    Ok(())
}

/// Writes the configuration template; refuses to overwrite unless `force`.
fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(UsageError(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        ))
        .into());
    }

    ensure_parent_directory(path)?;
    let text = serde_json::to_string_pretty(&AppConfig::template())
        .context("Failed to serialize template")?;
    std::fs::write(path, text + "\n")
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Handles the check-config command.
fn handle_check_config(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let value = serde_json::to_value(&config).context("Failed to serialize configuration")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&logging::mask_sensitive(&value))?
    );

    println!("\nConfiguration is valid.");
    println!(
        "Image relay: {}",
        if config.has_qiniu() { "Qiniu" } else { "disabled" }
    );
    let targets = config.enabled_targets();
    if targets.is_empty() {
        println!("Sync targets: group timeline");
    } else {
        for target in targets {
            println!("Sync target: {}", target.display_name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_parses_sync_with_global_flags() {
        let cli = Cli::try_parse_from([
            "zsxq-sync",
            "sync",
            "--mode",
            "concurrent",
            "--workers",
            "5",
            "--config",
            "my.json",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("my.json")));
        assert_eq!(cli.state, PathBuf::from(DEFAULT_STATE_FILE));
        match cli.command {
            Commands::Sync(cmd) => {
                assert_eq!(cmd.mode, SyncMode::Concurrent);
                assert_eq!(cmd.workers, 5);
                assert!(!cmd.skip_validation);
            }
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn sync_defaults_to_incremental() {
        let cli = Cli::try_parse_from(["zsxq-sync", "sync"]).unwrap();
        match cli.command {
            Commands::Sync(cmd) => assert_eq!(cmd.mode, SyncMode::Incremental),
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn config_errors_are_user_errors() {
        let err = anyhow::Error::new(ConfigError::Missing("zsxq.access_token"))
            .context("Failed to load configuration");
        assert!(is_user_error(&err));
    }

    #[test]
    fn authentication_errors_are_user_errors() {
        let err = anyhow::Error::new(SyncError::Source(ZsxqError::Authentication)).context("Sync failed");
        assert!(is_user_error(&err));
        assert!(is_user_error(&anyhow::Error::new(WordPressError::Authentication)));
    }

    #[test]
    fn remote_failures_are_internal_errors() {
        let err = anyhow::Error::new(ZsxqError::Http { status: 502 });
        assert!(!is_user_error(&err));
        assert!(!is_user_error(&anyhow::anyhow!("disk full")));
    }

    #[test]
    fn reset_requires_confirmation() {
        let dir = tempdir().unwrap();
        let err = handle_reset(&dir.path().join("state.json"), &ResetCommand { yes: false })
            .unwrap_err();
        assert!(is_user_error(&err));
        assert!(err.to_string().contains("--yes"));
    }

    #[test]
    fn template_is_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        write_template(&path, false).unwrap();
        let written = AppConfig::read(&path).unwrap();
        assert_eq!(written, AppConfig::template());

        let err = write_template(&path, false).unwrap_err();
        assert!(is_user_error(&err));
        assert!(write_template(&path, true).is_ok());
    }
}
