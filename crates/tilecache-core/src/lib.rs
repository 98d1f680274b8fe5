//! tilecache-core - Core library for tilecache
//!
//! Provides the SQLite tile store, the read-through tile cache, saved-map
//! bookkeeping and download planning for offline maps.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod maps;
pub mod models;
pub mod plan;
pub mod saved_maps;

pub use cache::{StorageLocation, StoreState, TileCache, TileSource, TileStore};
pub use config::{CacheConfig, LibraryConfig, StoreConfig};
pub use error::{CoreError, DegradedState, Result};
pub use event::{CacheEvent, EventBus};
pub use maps::{sanitize_map_name, MapDeletion, MapLibrary, SaveRequest};
pub use models::{Extent, MapPoint, SavedMapDetails, SavedMapSummary, Tile, TileCoord};
pub use plan::{DownloadPlan, TileGrid, TileRange, TileRequest};
pub use saved_maps::SavedMaps;
