//! TileVault CLI - command-line interface
//!
//! Front end for the tilevault library: count, download and inspect offline
//! map tiles.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tilevault::logging::{default_log_dir, default_log_file, init_logging};

use commands::common::{Context, GlobalArgs, RegionArgs};
use commands::download::DownloadArgs;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilevault")]
#[command(version, about = "Bounded, resumable offline map tile cache", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count the tiles covering a region
    Count {
        #[command(flatten)]
        region: RegionArgs,
    },
    /// Download every tile of a region for offline use
    Download(DownloadArgs),
    /// Read one tile (cache first) and save it to a file
    Fetch(FetchArgs),
    /// Delete all cached tiles and the saved source
    Clear,
    /// Show cache size and source
    Stats,
}

fn main() {
    let cli = Cli::parse();

    let log_dir = default_log_dir();
    let _logging_guard = match init_logging(&log_dir, default_log_file(), cli.global.verbose) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => CliError::Config(format!("Failed to start runtime: {}", e)).exit(),
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let context = Context::load(&cli.global)?;

    match cli.command {
        Command::Count { region } => commands::count::run(&context, region).await,
        Command::Download(args) => commands::download::run(&context, args).await,
        Command::Fetch(args) => commands::fetch::run(&context, args).await,
        Command::Clear => commands::cache::clear(&context).await,
        Command::Stats => commands::cache::stats(&context).await,
    }
}
