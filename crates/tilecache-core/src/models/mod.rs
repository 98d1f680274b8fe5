//! Data models for tilecache

pub mod extent;
pub mod saved_map;
pub mod tile;

pub use extent::{Extent, MapPoint};
pub use saved_map::{SavedMapDetails, SavedMapSummary};
pub use tile::{Tile, TileCoord};
