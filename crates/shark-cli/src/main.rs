use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod sync;

#[derive(Parser)]
#[command(name = "shark")]
#[command(about = "Keep markdown planning docs and the task database in step", long_about = None)]
struct Cli {
    /// Debug logging on stderr
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile task files with the database
    Sync(sync::SyncArgs),
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("SHARK_LOG_LEVEL") {
        level
    } else {
        "warn".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Sync(args) => sync::run(args),
    }
}
