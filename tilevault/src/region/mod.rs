//! Region enumeration.
//!
//! Maps a geographic bounding box and a zoom range to the exact set of tile
//! addresses covering it. Each zoom level contributes one rectangular
//! [`TileRange`]; a [`RegionPlan`] is the stack of ranges from `min_zoom` to
//! `max_zoom`.
//!
//! Enumeration is pure arithmetic and performs no I/O. The emitted order is
//! zoom ascending, then row, then column; bulk jobs rely on it being stable
//! for progress indexing.

use crate::coord::{lat_to_row, lon_to_column, BoundingBox, TileAddress, MAX_ZOOM};
use crate::error::{CacheError, CacheResult};

/// Default ceiling on bulk download zoom, bounding download cost.
pub const DEFAULT_MAX_DOWNLOAD_ZOOM: u8 = 17;

/// Inclusive rectangle of tiles at a single zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub col_min: u32,
    pub col_max: u32,
    pub row_min: u32,
    pub row_max: u32,
}

impl TileRange {
    /// Projects a bounding box onto the grid at `zoom`.
    ///
    /// The north-east corner yields the smallest row because rows grow
    /// southward.
    pub(crate) fn from_bbox(region: &BoundingBox, zoom: u8) -> Self {
        Self {
            zoom,
            col_min: lon_to_column(region.south_west.lon, zoom),
            col_max: lon_to_column(region.north_east.lon, zoom),
            row_min: lat_to_row(region.north_east.lat, zoom),
            row_max: lat_to_row(region.south_west.lat, zoom),
        }
    }

    /// Number of columns; zero for an inverted range.
    pub fn width(&self) -> u64 {
        span(self.col_min, self.col_max)
    }

    /// Number of rows; zero for an inverted range.
    pub fn height(&self) -> u64 {
        span(self.row_min, self.row_max)
    }

    pub fn count(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        address.zoom() == self.zoom
            && (self.col_min..=self.col_max).contains(&address.column())
            && (self.row_min..=self.row_max).contains(&address.row())
    }

    /// Iterates the range row by row, west to east within a row.
    pub fn iter(&self) -> impl Iterator<Item = TileAddress> + Send {
        let Self {
            zoom,
            col_min,
            col_max,
            row_min,
            row_max,
        } = *self;
        (row_min..=row_max).flat_map(move |row| {
            (col_min..=col_max).map(move |col| TileAddress::new_unchecked(zoom, col, row))
        })
    }
}

fn span(min: u32, max: u32) -> u64 {
    if max < min {
        0
    } else {
        u64::from(max - min) + 1
    }
}

/// Tile ranges for every zoom level of a region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPlan {
    region: BoundingBox,
    ranges: Vec<TileRange>,
}

impl RegionPlan {
    /// Validates the request and projects the region at each zoom level.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidRegion`] for a malformed box or `min_zoom > max_zoom`
    /// - [`CacheError::ZoomOutOfRange`] when `max_zoom` exceeds `max_allowed_zoom`
    pub fn new(
        region: BoundingBox,
        min_zoom: u8,
        max_zoom: u8,
        max_allowed_zoom: u8,
    ) -> CacheResult<Self> {
        region.validate()?;
        if min_zoom > max_zoom {
            return Err(CacheError::InvalidRegion(format!(
                "min zoom {} is greater than max zoom {}",
                min_zoom, max_zoom
            )));
        }
        let ceiling = max_allowed_zoom.min(MAX_ZOOM);
        if max_zoom > ceiling {
            return Err(CacheError::ZoomOutOfRange {
                requested: max_zoom,
                max: ceiling,
            });
        }

        let ranges = (min_zoom..=max_zoom)
            .map(|zoom| TileRange::from_bbox(&region, zoom))
            .collect();

        Ok(Self { region, ranges })
    }

    pub fn region(&self) -> &BoundingBox {
        &self.region
    }

    pub fn ranges(&self) -> &[TileRange] {
        &self.ranges
    }

    pub fn tile_count(&self) -> u64 {
        self.ranges.iter().map(TileRange::count).sum()
    }

    pub fn contains(&self, address: &TileAddress) -> bool {
        self.ranges.iter().any(|r| r.contains(address))
    }

    /// Iterates all addresses in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = TileAddress> + '_ {
        self.ranges.iter().flat_map(TileRange::iter)
    }

    /// Consumes the plan into a lazy iterator over all addresses, in
    /// enumeration order. Nothing is materialized up front.
    pub fn into_tiles(self) -> impl Iterator<Item = TileAddress> + Send {
        self.ranges.into_iter().flat_map(|range| range.iter())
    }
}

/// Enumerates every tile covering `region` from `min_zoom` to `max_zoom`.
pub fn enumerate(
    region: &BoundingBox,
    min_zoom: u8,
    max_zoom: u8,
    max_allowed_zoom: u8,
) -> CacheResult<Vec<TileAddress>> {
    let plan = RegionPlan::new(*region, min_zoom, max_zoom, max_allowed_zoom)?;
    Ok(plan.iter().collect())
}

/// Counts the tiles [`enumerate`] would return, without materializing them.
pub fn tile_count(
    region: &BoundingBox,
    min_zoom: u8,
    max_zoom: u8,
    max_allowed_zoom: u8,
) -> CacheResult<u64> {
    Ok(RegionPlan::new(*region, min_zoom, max_zoom, max_allowed_zoom)?.tile_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::LatLon;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn san_francisco() -> BoundingBox {
        BoundingBox::new(LatLon::new(37.7, -122.5), LatLon::new(37.8, -122.4)).unwrap()
    }

    #[test]
    fn test_san_francisco_zoom_13_rectangle() {
        let tiles = enumerate(&san_francisco(), 13, 13, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();

        // Columns 1308..=1310, rows 3165..=3168
        assert_eq!(tiles.len(), 12);
        assert_eq!(tiles[0], TileAddress::new(13, 1308, 3165).unwrap());
        assert_eq!(tiles[1], TileAddress::new(13, 1309, 3165).unwrap());
        assert_eq!(tiles[3], TileAddress::new(13, 1308, 3166).unwrap());
        assert_eq!(tiles[11], TileAddress::new(13, 1310, 3168).unwrap());

        let count = tile_count(&san_francisco(), 13, 13, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        assert_eq!(count, 12);
    }

    #[test]
    fn test_ordering_is_zoom_row_column() {
        let tiles = enumerate(&san_francisco(), 10, 14, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        let mut sorted = tiles.clone();
        sorted.sort();
        assert_eq!(tiles, sorted);
    }

    #[test]
    fn test_no_duplicates() {
        let tiles = enumerate(&san_francisco(), 0, 15, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        let unique: HashSet<_> = tiles.iter().collect();
        assert_eq!(unique.len(), tiles.len());
    }

    #[test]
    fn test_zoom_zero_is_single_tile() {
        let world =
            BoundingBox::new(LatLon::new(-90.0, -180.0), LatLon::new(90.0, 180.0)).unwrap();
        let tiles = enumerate(&world, 0, 2, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        assert_eq!(tiles.len(), 1 + 4 + 16);
    }

    #[test]
    fn test_point_region_yields_one_tile_per_zoom() {
        let point = LatLon::new(51.5074, -0.1278);
        let region = BoundingBox::new(point, point).unwrap();
        let tiles = enumerate(&region, 5, 9, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        assert_eq!(tiles.len(), 5);
    }

    #[test]
    fn test_min_zoom_greater_than_max_is_invalid() {
        let result = enumerate(&san_francisco(), 14, 13, DEFAULT_MAX_DOWNLOAD_ZOOM);
        assert!(matches!(result, Err(CacheError::InvalidRegion(_))));
    }

    #[test]
    fn test_inverted_latitude_is_invalid() {
        let region = BoundingBox {
            south_west: LatLon::new(37.8, -122.5),
            north_east: LatLon::new(37.7, -122.4),
        };
        let result = enumerate(&region, 13, 13, DEFAULT_MAX_DOWNLOAD_ZOOM);
        assert!(matches!(result, Err(CacheError::InvalidRegion(_))));
    }

    #[test]
    fn test_zoom_above_ceiling_is_rejected() {
        let result = tile_count(&san_francisco(), 13, 18, DEFAULT_MAX_DOWNLOAD_ZOOM);
        assert!(matches!(
            result,
            Err(CacheError::ZoomOutOfRange {
                requested: 18,
                max: 17
            })
        ));
    }

    #[test]
    fn test_plan_contains_enumerated_tiles() {
        let plan = RegionPlan::new(san_francisco(), 12, 14, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        assert!(plan.iter().all(|t| plan.contains(&t)));
        assert!(!plan.contains(&TileAddress::new(13, 0, 0).unwrap()));
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let range = TileRange {
            zoom: 13,
            col_min: 1310,
            col_max: 1308,
            row_min: 3165,
            row_max: 3168,
        };
        assert_eq!(range.width(), 0);
        assert_eq!(range.count(), 0);
        assert_eq!(range.iter().count(), 0);
    }

    #[test]
    fn test_into_tiles_matches_iter() {
        let plan = RegionPlan::new(san_francisco(), 11, 14, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        let borrowed: Vec<_> = plan.iter().collect();
        let owned: Vec<_> = plan.into_tiles().collect();
        assert_eq!(borrowed, owned);
    }

    #[test]
    fn test_into_tiles_is_lazy_for_world_plan() {
        let world =
            BoundingBox::new(LatLon::new(-90.0, -180.0), LatLon::new(90.0, 180.0)).unwrap();
        let plan = RegionPlan::new(world, 0, 17, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
        assert!(plan.tile_count() > 20_000_000_000);

        let first: Vec<_> = plan.into_tiles().take(3).collect();
        assert_eq!(first[0], TileAddress::new(0, 0, 0).unwrap());
        assert_eq!(first[1], TileAddress::new(1, 0, 0).unwrap());
        assert_eq!(first[2], TileAddress::new(1, 1, 0).unwrap());
    }

    proptest! {
        #[test]
        fn prop_count_matches_enumeration(
            lat_a in -89.0f64..89.0,
            lat_span in 0.0f64..2.0,
            lon_a in -179.0f64..177.0,
            lon_span in 0.0f64..2.0,
            min_zoom in 0u8..12,
            zoom_span in 0u8..3,
        ) {
            let region = BoundingBox::new(
                LatLon::new(lat_a, lon_a),
                LatLon::new((lat_a + lat_span).min(90.0), lon_a + lon_span),
            ).unwrap();
            let max_zoom = min_zoom + zoom_span;

            let tiles = enumerate(&region, min_zoom, max_zoom, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
            let count = tile_count(&region, min_zoom, max_zoom, DEFAULT_MAX_DOWNLOAD_ZOOM).unwrap();
            prop_assert_eq!(tiles.len() as u64, count);
        }
    }
}
