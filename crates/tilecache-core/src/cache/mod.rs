//! Caching layer for tilecache-core
//!
//! `TileStore` owns the SQLite tile table; `TileCache` is the read-through
//! facade the map renderer talks to.

pub mod tile_cache;
pub mod tile_store;

pub use tile_cache::{CacheCounters, TileCache, TileSource};
pub use tile_store::{
    open_file, CacheStats, MapTileSummary, StorageLocation, StoreState, TileStore,
};
