//! Saved-map bookkeeping records

use super::extent::{Extent, MapPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Details recorded for a map once its tiles have been downloaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMapDetails {
    /// Point of interest the user was looking at when saving
    pub poi: MapPoint,
    /// Extent covered by the download
    pub extent: Extent,
    pub min_zoom: u32,
    pub max_zoom: u32,
    /// Number of tiles the download plan enumerated
    pub tile_count: u64,
    pub saved_at: DateTime<Utc>,
}

/// A saved map together with what the tile store currently holds for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedMapSummary {
    pub name: String,
    pub details: SavedMapDetails,
    pub cached_tiles: usize,
}
