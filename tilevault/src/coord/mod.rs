//! Coordinate conversion module
//!
//! Provides conversions between geographic coordinates (latitude/longitude)
//! and Web Mercator slippy-map tile addresses.

mod types;

pub use types::{
    tiles_per_side, BoundingBox, LatLon, TileAddress, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT,
    MIN_LON,
};

use std::f64::consts::PI;

/// Converts a longitude to a tile column at `zoom`.
///
/// Input is clamped to the valid longitude range and the result to the
/// grid, so the east edge (180°) maps to the last column.
#[inline]
pub fn lon_to_column(lon: f64, zoom: u8) -> u32 {
    let n = tiles_per_side(zoom) as f64;
    let lon = lon.clamp(MIN_LON, MAX_LON);
    let col = ((lon + 180.0) / 360.0 * n).floor();
    clamp_index(col, zoom)
}

/// Converts a latitude to a tile row at `zoom`.
///
/// Latitude is clamped to the Web Mercator limits (±85.05112878°) before
/// projection.
#[inline]
pub fn lat_to_row(lat: f64, zoom: u8) -> u32 {
    let n = tiles_per_side(zoom) as f64;
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let lat_rad = lat * PI / 180.0;
    let row = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();
    clamp_index(row, zoom)
}

#[inline]
fn clamp_index(value: f64, zoom: u8) -> u32 {
    let max_index = (tiles_per_side(zoom) - 1) as f64;
    value.clamp(0.0, max_index) as u32
}

/// Converts geographic coordinates to the tile containing them.
#[inline]
pub fn to_tile_address(point: LatLon, zoom: u8) -> TileAddress {
    let zoom = zoom.min(MAX_ZOOM);
    TileAddress::new_unchecked(zoom, lon_to_column(point.lon, zoom), lat_to_row(point.lat, zoom))
}

/// Converts a tile address back to geographic coordinates.
///
/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(tile: &TileAddress) -> LatLon {
    let n = tiles_per_side(tile.zoom()) as f64;

    let lon = tile.column() as f64 / n * 360.0 - 180.0;

    // Inverse Web Mercator
    let y = tile.row() as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    LatLon::new(lat, lon)
}
