//! Download planning
//!
//! Works out which tiles a map save covers and how large the download
//! will be. Extents are already in grid units; there is no reprojection
//! here and no scheduling, only TMS tile numbering.

use crate::error::{CoreError, Result};
use crate::models::{Extent, TileCoord};
use serde::{Deserialize, Serialize};

/// Units-per-pixel for each zoom level of the default tile set
pub const DEFAULT_RESOLUTIONS: [f64; 11] = [
    1024.0, 512.0, 256.0, 128.0, 64.0, 32.0, 16.0, 8.0, 4.0, 2.0, 1.0,
];

/// Default tile edge in pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Tile grid description: tile size and resolution per zoom level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub tile_width: u32,
    pub tile_height: u32,
    /// Units per pixel, indexed by zoom level
    pub resolutions: Vec<f64>,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            resolutions: DEFAULT_RESOLUTIONS.to_vec(),
        }
    }
}

impl TileGrid {
    /// Deepest zoom level the grid defines
    pub fn max_zoom(&self) -> Option<u32> {
        self.resolutions.len().checked_sub(1).map(|z| z as u32)
    }

    pub fn resolution(&self, zoom: u32) -> Option<f64> {
        self.resolutions.get(zoom as usize).copied()
    }

    /// Tile column containing `easting` at `zoom`
    pub fn easting_to_tile(&self, easting: f64, zoom: u32) -> Option<i64> {
        let resolution = self.resolution(zoom)?;
        Some((easting / (self.tile_width as f64 * resolution)).floor() as i64)
    }

    /// Tile row containing `northing` at `zoom`
    pub fn northing_to_tile(&self, northing: f64, zoom: u32) -> Option<i64> {
        let resolution = self.resolution(zoom)?;
        Some((northing / (self.tile_height as f64 * resolution)).floor() as i64)
    }

    /// Tiles covering `extent` at `zoom`; `None` if nothing non-negative is covered
    pub fn tile_range(&self, extent: &Extent, zoom: u32) -> Option<TileRange> {
        let min_column = self.easting_to_tile(extent.left, zoom)?;
        let max_column = self.easting_to_tile(extent.right, zoom)?;
        let min_row = self.northing_to_tile(extent.bottom, zoom)?;
        let max_row = self.northing_to_tile(extent.top, zoom)?;

        if max_column < 0 || max_row < 0 {
            return None;
        }

        Some(TileRange {
            zoom,
            min_column: clamp_tile(min_column),
            max_column: clamp_tile(max_column),
            min_row: clamp_tile(min_row),
            max_row: clamp_tile(max_row),
        })
    }
}

fn clamp_tile(n: i64) -> u32 {
    n.clamp(0, u32::MAX as i64) as u32
}

/// Inclusive block of tiles at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub zoom: u32,
    pub min_column: u32,
    pub max_column: u32,
    pub min_row: u32,
    pub max_row: u32,
}

impl TileRange {
    /// Tiles in the range, saturating at `u64::MAX` for absurd extents
    pub fn tile_count(&self) -> u64 {
        let columns = (self.max_column - self.min_column) as u64 + 1;
        let rows = (self.max_row - self.min_row) as u64 + 1;
        columns.saturating_mul(rows)
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.zoom == self.zoom
            && (self.min_column..=self.max_column).contains(&coord.column)
            && (self.min_row..=self.max_row).contains(&coord.row)
    }

    /// Column-major iteration over the range
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (self.min_column..=self.max_column).flat_map(move |column| {
            (self.min_row..=self.max_row).map(move |row| TileCoord::new(self.zoom, column, row))
        })
    }
}

/// One tile the download pipeline should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub coord: TileCoord,
    pub url: String,
}

/// Remote URL of a tile: `{base}/{z}/{x}/{y}.{ext}`
pub fn tile_url(base_url: &str, coord: TileCoord, file_type: &str) -> String {
    format!(
        "{}/{}/{}/{}.{}",
        base_url.trim_end_matches('/'),
        coord.zoom,
        coord.column,
        coord.row,
        file_type
    )
}

/// Tiles a map save would download, with a size estimate
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPlan {
    pub map_name: String,
    pub extent: Extent,
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub base_url: String,
    pub file_type: String,
    pub ranges: Vec<TileRange>,
    pub tile_count: u64,
    pub estimated_bytes: u64,
}

impl DownloadPlan {
    /// Enumerate the tiles covering `extent` for every zoom in `min_zoom..=max_zoom`
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        map_name: &str,
        grid: &TileGrid,
        extent: Extent,
        min_zoom: u32,
        max_zoom: u32,
        base_url: &str,
        file_type: &str,
        average_tile_bytes: u64,
    ) -> Result<Self> {
        if !extent.is_valid() {
            return Err(CoreError::InvalidExtent {
                reason: format!(
                    "{},{},{},{} is not a finite, ordered rectangle",
                    extent.left, extent.bottom, extent.right, extent.top
                ),
            });
        }
        if min_zoom > max_zoom {
            return Err(CoreError::InvalidZoomRange {
                min: min_zoom,
                max: max_zoom,
                reason: "minimum zoom is above maximum zoom".to_string(),
            });
        }
        match grid.max_zoom() {
            Some(deepest) if max_zoom <= deepest => {}
            deepest => {
                return Err(CoreError::InvalidZoomRange {
                    min: min_zoom,
                    max: max_zoom,
                    reason: format!("tile grid only defines zoom levels up to {:?}", deepest),
                })
            }
        }

        let ranges: Vec<TileRange> = (min_zoom..=max_zoom)
            .filter_map(|zoom| grid.tile_range(&extent, zoom))
            .collect();
        let tile_count = ranges
            .iter()
            .map(TileRange::tile_count)
            .fold(0u64, u64::saturating_add);

        Ok(Self {
            map_name: map_name.to_string(),
            extent,
            min_zoom,
            max_zoom,
            base_url: base_url.to_string(),
            file_type: file_type.to_string(),
            ranges,
            tile_count,
            estimated_bytes: tile_count.saturating_mul(average_tile_bytes),
        })
    }

    /// Reject plans whose estimated size exceeds `max_bytes`
    pub fn check_budget(&self, max_bytes: u64) -> Result<()> {
        if self.estimated_bytes > max_bytes {
            return Err(CoreError::DownloadTooLarge {
                tiles: self.tile_count,
                bytes: self.estimated_bytes,
                max_bytes,
            });
        }
        Ok(())
    }

    /// Every tile to fetch, lowest zoom first
    pub fn requests(&self) -> impl Iterator<Item = TileRequest> + '_ {
        self.ranges.iter().flat_map(move |range| {
            range.coords().map(move |coord| TileRequest {
                coord,
                url: tile_url(&self.base_url, coord, &self.file_type),
            })
        })
    }
}

/// Human readable byte size (`1.5 MB`)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    if exponent == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[exponent])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// North Edinburgh extent in British National Grid metres
    fn edinburgh() -> Extent {
        Extent::new(
            322_499.993_407_85,
            676_321.018_236_58,
            323_715.993_407_85,
            677_925.018_236_58,
        )
    }

    #[test]
    fn test_tile_numbering() {
        let grid = TileGrid::default();
        // zoom 8 has 4 units per pixel: 1024 units per tile
        assert_eq!(grid.easting_to_tile(322_499.99, 8), Some(314));
        assert_eq!(grid.northing_to_tile(677_925.01, 8), Some(662));
        assert_eq!(grid.easting_to_tile(1.0, 99), None);
    }

    #[test]
    fn test_edinburgh_plan() {
        let plan = DownloadPlan::build(
            "name-name",
            &TileGrid::default(),
            edinburgh(),
            8,
            9,
            "https://tiles.example.org/tms/open/",
            "jpg",
            16 * 1024,
        )
        .unwrap();

        assert_eq!(plan.ranges.len(), 2);
        assert_eq!(
            plan.ranges[0],
            TileRange {
                zoom: 8,
                min_column: 314,
                max_column: 316,
                min_row: 660,
                max_row: 662,
            }
        );
        assert_eq!(plan.ranges[0].tile_count(), 9);
        assert_eq!(plan.ranges[1].tile_count(), 20);
        assert_eq!(plan.tile_count, 29);
        assert_eq!(plan.estimated_bytes, 29 * 16 * 1024);
        assert!(plan.ranges[0].contains(&TileCoord::new(8, 316, 661)));

        let requests: Vec<TileRequest> = plan.requests().collect();
        assert_eq!(requests.len(), 29);
        assert!(requests.contains(&TileRequest {
            coord: TileCoord::new(8, 316, 661),
            url: "https://tiles.example.org/tms/open/8/316/661.jpg".to_string(),
        }));
    }

    #[test]
    fn test_budget_check() {
        let plan = DownloadPlan::build(
            "m",
            &TileGrid::default(),
            edinburgh(),
            8,
            9,
            "http://t",
            "png",
            16 * 1024,
        )
        .unwrap();

        plan.check_budget(50 * 1024 * 1024).unwrap();
        let err = plan.check_budget(100_000).unwrap_err();
        assert!(matches!(err, CoreError::DownloadTooLarge { tiles: 29, .. }));
    }

    #[test]
    fn test_invalid_inputs() {
        let grid = TileGrid::default();
        let err = DownloadPlan::build("m", &grid, edinburgh(), 9, 8, "u", "png", 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidZoomRange { .. }));

        let err = DownloadPlan::build("m", &grid, edinburgh(), 8, 20, "u", "png", 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidZoomRange { .. }));

        let inverted = Extent::new(10.0, 0.0, 0.0, 10.0);
        let err = DownloadPlan::build("m", &grid, inverted, 0, 1, "u", "png", 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidExtent { .. }));
    }

    #[test]
    fn test_huge_extent_is_rejected_by_budget() {
        let plan = DownloadPlan::build(
            "m",
            &TileGrid::default(),
            Extent::new(0.0, 0.0, 1e15, 1e15),
            9,
            10,
            "u",
            "png",
            16 * 1024,
        )
        .unwrap();

        assert_eq!(plan.ranges[1].tile_count(), u64::MAX);
        assert_eq!(plan.tile_count, u64::MAX);
        assert_eq!(plan.estimated_bytes, u64::MAX);

        let err = plan.check_budget(50 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, CoreError::DownloadTooLarge { tiles: u64::MAX, .. }));
    }

    #[test]
    fn test_negative_extent_is_clamped() {
        let grid = TileGrid::default();
        let range = grid
            .tile_range(&Extent::new(-5000.0, -5000.0, 100.0, 100.0), 10)
            .unwrap();
        assert_eq!(range.min_column, 0);
        assert_eq!(range.min_row, 0);

        assert!(grid
            .tile_range(&Extent::new(-5000.0, -5000.0, -4000.0, -4000.0), 10)
            .is_none());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(16 * 1024), "16.0 KB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50.0 MB");
    }
}
