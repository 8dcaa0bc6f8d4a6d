//! Download command - cache a region for offline use.

use clap::Args;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use tilevault::{BulkCacheRequest, JobObservers, JobState};
use tracing::info;

use super::common::{group_thousands, Context, RegionArgs};
use crate::error::CliError;

/// Above this many tiles the prompt suggests Wi-Fi and external power.
const LARGE_DOWNLOAD_TILES: u64 = 1000;

#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub region: RegionArgs,

    /// Re-download tiles that are already cached
    #[arg(long)]
    pub force: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Builds the confirmation prompt for `tile_count` tiles.
pub fn confirmation_message(tile_count: u64) -> String {
    let mut message = format!("Download {} map tiles now?", group_thousands(tile_count));
    if tile_count > LARGE_DOWNLOAD_TILES {
        message.push_str(" Caching may take a long time. It is recommended");
        message.push_str(" that you connect to Wi-Fi and plug in the device.");
    }
    message
}

pub async fn run(context: &Context, args: DownloadArgs) -> Result<(), CliError> {
    let cache = context.open_cache().await?;
    let region = args.region.bounding_box()?;
    let max_zoom = args.region.max_zoom_or(context.config.max_zoom);
    let tile_count = cache.tile_count_for_region(&region, args.region.min_zoom, max_zoom)?;

    if !args.yes {
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(confirmation_message(tile_count))
            .default(tile_count <= LARGE_DOWNLOAD_TILES)
            .interact()
            .map_err(|e| CliError::Prompt(e.to_string()))?;
        if !proceed {
            println!("Download cancelled.");
            return Ok(());
        }
    }

    let bar = ProgressBar::new(tile_count);
    bar.set_style(
        ProgressStyle::with_template(
            "Downloading... {wide_bar:0.white/dim.white} {pos:>9}/{len:9} {per_sec:>12} {eta_precise}",
        )
        .map_err(|e| CliError::Config(e.to_string()))?
        .progress_chars("██▁"),
    );

    let request = BulkCacheRequest::new(region, args.region.min_zoom, max_zoom)
        .with_force_refresh(args.force);
    let observers = {
        let bar = bar.clone();
        JobObservers::new().on_progress(move |completed, total| {
            bar.set_length(total);
            bar.set_position(completed);
        })
    };
    let job = cache.begin_bulk_cache(request, observers)?;
    info!(job_id = job.id(), region = %job.region(), tiles = tile_count, "Download started");

    let interrupted = job.clone();
    ctrlc::set_handler(move || interrupted.cancel())
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let report = job.wait().await;
    bar.abandon();
    info!(job_id = report.id, state = %report.state, "Download finished");

    match report.state {
        JobState::Completed => println!(
            "Cached {} tiles ({} already cached, {} failed) in {:.1}s",
            group_thousands(report.completed_tiles()),
            group_thousands(report.skipped_tiles()),
            group_thousands(report.failed_tiles()),
            report.elapsed.as_secs_f64()
        ),
        JobState::Cancelled => println!(
            "Download cancelled after {} of {} tiles. Downloaded tiles were kept.",
            group_thousands(report.completed_tiles()),
            group_thousands(report.total_tiles())
        ),
        _ => println!(
            "Download failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
    println!("Offline cache: {} MB", cache.size_megabytes());

    cache.shutdown().await;
    Ok(())
}
