//! Fetch command - read one tile cache-first and write it to a file.

use std::path::PathBuf;

use clap::Args;
use tilevault::TileAddress;

use super::common::Context;
use crate::error::CliError;

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Zoom level
    #[arg(long)]
    pub zoom: u8,
    /// Tile column (x)
    #[arg(long)]
    pub column: u32,
    /// Tile row (y)
    #[arg(long)]
    pub row: u32,
    /// Output file
    #[arg(short, long)]
    pub output: PathBuf,
}

pub async fn run(context: &Context, args: FetchArgs) -> Result<(), CliError> {
    let address = TileAddress::new(args.zoom, args.column, args.row)?;
    let cache = context.open_cache().await?;

    let was_cached = cache.store().has(&address);
    let bytes = cache.fetch_tile(address).await?;

    std::fs::write(&args.output, &bytes).map_err(|error| CliError::FileWrite {
        path: args.output.display().to_string(),
        error,
    })?;

    println!(
        "Tile {} ({} bytes, {}) written to {}",
        address,
        bytes.len(),
        if was_cached { "cached" } else { "downloaded" },
        args.output.display()
    );

    cache.shutdown().await;
    Ok(())
}
