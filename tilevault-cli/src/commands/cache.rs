//! Cache management commands.

use tilevault::config::format_size;

use super::common::{group_thousands, Context};
use crate::error::CliError;

/// Clear the offline cache.
pub async fn clear(context: &Context) -> Result<(), CliError> {
    let cache = context.open_cache().await?;
    println!("Clearing offline cache at: {}", context.config.directory.display());

    let result = cache.clear_cache().await?;
    println!("The offline map tile cache was cleared.");
    println!(
        "Deleted {} tiles, freed {}",
        group_thousands(result.entries_removed as u64),
        format_size(result.bytes_freed)
    );

    cache.shutdown().await;
    Ok(())
}

/// Show cache statistics.
pub async fn stats(context: &Context) -> Result<(), CliError> {
    let cache = context.open_cache().await?;

    println!("Offline cache: {}", context.config.directory.display());
    println!("  Tiles:  {}", group_thousands(cache.store().entry_count() as u64));
    println!("  Size:   {} MB", cache.size_megabytes());
    if let Some(limit) = context.config.max_cache_bytes {
        println!("  Limit:  {}", format_size(limit));
    }

    match cache.source_metadata().await? {
        Some(saved) => println!(
            "  Source: {} (cached {})",
            saved.identity,
            saved.saved_at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("  Source: none (an online start is required)"),
    }

    cache.shutdown().await;
    Ok(())
}
