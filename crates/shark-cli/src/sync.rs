use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, ValueEnum};
use serde_json::json;
use shark_core::{ConflictStrategy, DiscoveryStrategy};
use shark_storage::SyncStore;
use shark_sync::config::{find_config, CONFIG_FILE_NAME};
use shark_sync::{format_report, EngineConfig, ProjectConfig, SyncEngine, SyncOptions, SyncReport};
use std::path::PathBuf;
use tracing::{info, warn};

const DEFAULT_DOCS_ROOT: &str = "docs/plan";
const DEFAULT_DATABASE: &str = "shark.db";

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    FileWins,
    DatabaseWins,
    NewerWins,
    Manual,
}

impl From<StrategyArg> for ConflictStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::FileWins => ConflictStrategy::FileWins,
            StrategyArg::DatabaseWins => ConflictStrategy::DatabaseWins,
            StrategyArg::NewerWins => ConflictStrategy::NewerWins,
            StrategyArg::Manual => ConflictStrategy::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DiscoveryArg {
    IndexPrecedence,
    FolderPrecedence,
    Merge,
}

impl From<DiscoveryArg> for DiscoveryStrategy {
    fn from(arg: DiscoveryArg) -> Self {
        match arg {
            DiscoveryArg::IndexPrecedence => DiscoveryStrategy::IndexPrecedence,
            DiscoveryArg::FolderPrecedence => DiscoveryStrategy::FolderPrecedence,
            DiscoveryArg::Merge => DiscoveryStrategy::Merge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Docs root to scan (default: config `docs_root`, else docs/plan)
    #[arg(long)]
    pub folder: Option<PathBuf>,
    /// Database file (default: config `database`, else shark.db next to the config)
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Preview changes without applying them
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long, value_enum, default_value_t = StrategyArg::FileWins)]
    pub strategy: StrategyArg,
    /// Enable discovery of epics and features from the index and folders
    #[arg(long)]
    pub index: bool,
    /// Index file to read instead of <folder>/epic-index.md
    #[arg(long, requires = "index")]
    pub index_file: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = DiscoveryArg::Merge)]
    pub discovery_strategy: DiscoveryArg,
    /// Auto-create missing epics and features
    #[arg(long)]
    pub create_missing: bool,
    /// Delete tasks whose files are gone
    #[arg(long)]
    pub cleanup: bool,
    /// Ignore the last sync time and process every file
    #[arg(long)]
    pub force_full_scan: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
    /// Only print errors
    #[arg(long)]
    pub quiet: bool,
}

pub fn run(args: SyncArgs) -> Result<()> {
    let started_at = Utc::now();
    let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
    let config_path = find_config(&cwd).unwrap_or_else(|| cwd.join(CONFIG_FILE_NAME));
    let mut project = ProjectConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let root = args
        .folder
        .clone()
        .or_else(|| project.docs_root_path())
        .unwrap_or_else(|| project.base_dir().join(DEFAULT_DOCS_ROOT));
    let db_path = args
        .db
        .clone()
        .or_else(|| project.database_path())
        .unwrap_or_else(|| project.base_dir().join(DEFAULT_DATABASE));

    let registry = project.registry().context("Invalid pattern configuration")?;
    let config = EngineConfig::new(registry).with_last_sync(project.last_sync_time);
    let engine = SyncEngine::new(config);
    let options = SyncOptions {
        root,
        dry_run: args.dry_run,
        strategy: args.strategy.into(),
        discovery_strategy: args.discovery_strategy.into(),
        discovery_enabled: args.index,
        index_path: args.index_file.clone(),
        create_missing: args.create_missing,
        cleanup: args.cleanup,
        force_full_scan: args.force_full_scan,
        cancellation: None,
    };

    let mut store = SyncStore::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let report = match engine.sync(&mut store, &options) {
        Ok(report) => report,
        Err(err) if args.output == OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "status": "error", "error": err.to_string() }))?
            );
            std::process::exit(1);
        }
        Err(err) => return Err(err).context("Sync failed"),
    };

    if !args.dry_run {
        if let Err(err) = project.update_last_sync_time(started_at) {
            warn!(event = "last_sync_update_failed", path = %config_path.display(), error = %err);
        } else {
            info!(event = "last_sync_updated", at = %started_at.to_rfc3339());
        }
    }

    print_report(&report, args.output, args.quiet)?;
    if report.has_errors() {
        bail!("sync completed with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn print_report(report: &SyncReport, output: OutputFormat, quiet: bool) -> Result<()> {
    match output {
        OutputFormat::Json => {
            let body = serde_json::to_string_pretty(report).context("Failed to encode report")?;
            println!("{body}");
        }
        OutputFormat::Text if quiet => {
            for error in &report.errors {
                eprintln!("ERROR: {error}");
            }
        }
        OutputFormat::Text => print!("{}", format_report(report)),
    }
    Ok(())
}
