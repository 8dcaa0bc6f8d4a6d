//! Count command - how many tiles a region covers.

use super::common::{group_thousands, Context, RegionArgs};
use crate::error::CliError;

pub async fn run(context: &Context, region: RegionArgs) -> Result<(), CliError> {
    let bbox = region.bounding_box()?;
    let max_zoom = region.max_zoom_or(context.config.max_zoom);
    let count = tilevault::region::tile_count(
        &bbox,
        region.min_zoom,
        max_zoom,
        context.config.max_zoom,
    )?;

    println!("Region: {}", bbox);
    println!("Zoom:   {}-{}", region.min_zoom, max_zoom);
    println!("Tiles:  {}", group_thousands(count));
    Ok(())
}
