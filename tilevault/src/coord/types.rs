//! Coordinate type definitions

use std::fmt;

use crate::error::{CacheError, CacheResult};

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Highest zoom level whose grid fits in `u32` tile indices.
pub const MAX_ZOOM: u8 = 30;

/// Address of one raster tile in the XYZ slippy-map scheme.
///
/// Column grows west to east and row grows north to south; both lie in
/// `0..2^zoom`. Ordering is zoom, then row, then column, which is the order
/// the region enumerator emits tiles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileAddress {
    zoom: u8,
    column: u32,
    row: u32,
}

impl TileAddress {
    /// Creates a tile address, validating it against the grid for `zoom`.
    pub fn new(zoom: u8, column: u32, row: u32) -> CacheResult<Self> {
        if zoom > MAX_ZOOM {
            return Err(CacheError::InvalidAddress { zoom, column, row });
        }
        let size = tiles_per_side(zoom);
        if u64::from(column) >= size || u64::from(row) >= size {
            return Err(CacheError::InvalidAddress { zoom, column, row });
        }
        Ok(Self { zoom, column, row })
    }

    /// Builds an address the caller has already range-checked.
    pub(crate) const fn new_unchecked(zoom: u8, column: u32, row: u32) -> Self {
        Self { zoom, column, row }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn row(&self) -> u32 {
        self.row
    }
}

impl PartialOrd for TileAddress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileAddress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.zoom, self.row, self.column).cmp(&(other.zoom, other.row, other.column))
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

/// Number of tiles along one axis at `zoom`.
#[inline]
pub fn tiles_per_side(zoom: u8) -> u64 {
    1u64 << zoom
}

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (MIN_LON..=MAX_LON).contains(&self.lon)
    }
}

/// A non-wrapping geographic rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south_west: LatLon,
    pub north_east: LatLon,
}

impl BoundingBox {
    /// Creates a bounding box from its south-west and north-east corners.
    ///
    /// Boxes crossing the antimeridian are rejected.
    pub fn new(south_west: LatLon, north_east: LatLon) -> CacheResult<Self> {
        let bbox = Self {
            south_west,
            north_east,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Checks the corner invariants.
    pub fn validate(&self) -> CacheResult<()> {
        if !self.south_west.is_valid() || !self.north_east.is_valid() {
            return Err(CacheError::InvalidRegion(format!(
                "corner coordinates out of range: {}",
                self
            )));
        }
        if self.south_west.lat > self.north_east.lat {
            return Err(CacheError::InvalidRegion(format!(
                "south-west latitude {} is north of north-east latitude {}",
                self.south_west.lat, self.north_east.lat
            )));
        }
        if self.south_west.lon > self.north_east.lon {
            return Err(CacheError::InvalidRegion(format!(
                "south-west longitude {} is east of north-east longitude {}",
                self.south_west.lon, self.north_east.lon
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[({}, {}) .. ({}, {})]",
            self.south_west.lat, self.south_west.lon, self.north_east.lat, self.north_east.lon
        )
    }
}
