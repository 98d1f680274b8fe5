//! Read-through tile cache facade
//!
//! Resolves a tile request to either the cached payload or the caller's
//! fallback URL. Storage failures never escape `resolve_tile`; they are
//! logged and counted, and the fallback URL is returned.

use super::tile_store::{StorageLocation, StoreState, TileStore};
use crate::config::StoreConfig;
use crate::error::{CoreError, DegradedState, Result};
use crate::event::{CacheEvent, EventBus};
use crate::models::{Tile, TileCoord};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Where the renderer should load a tile from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileSource {
    /// Stored payload from the offline cache
    Cached(String),
    /// The fallback URL, returned unchanged
    Remote(String),
}

impl TileSource {
    pub fn as_str(&self) -> &str {
        match self {
            TileSource::Cached(s) | TileSource::Remote(s) => s,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            TileSource::Cached(s) | TileSource::Remote(s) => s,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, TileSource::Cached(_))
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    lookup_errors: AtomicU64,
}

/// Snapshot of resolve outcomes since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that failed and fell back to the remote URL
    pub lookup_errors: u64,
}

impl CacheCounters {
    pub fn total(&self) -> u64 {
        self.hits + self.misses + self.lookup_errors
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Tile cache facade over an optional `TileStore`
pub struct TileCache {
    /// None when the store could not be opened (passthrough mode)
    store: Option<TileStore>,
    degraded_state: DegradedState,
    counters: Counters,
    event_bus: EventBus,
}

impl TileCache {
    /// Wrap an already opened store
    pub fn new(store: TileStore) -> Self {
        Self {
            store: Some(store),
            degraded_state: DegradedState::Healthy,
            counters: Counters::default(),
            event_bus: EventBus::default_capacity(),
        }
    }

    /// A cache without storage: every tile resolves to its remote URL
    pub fn passthrough(reason: impl Into<String>) -> Self {
        Self {
            store: None,
            degraded_state: DegradedState::Passthrough {
                reason: reason.into(),
            },
            counters: Counters::default(),
            event_bus: EventBus::default_capacity(),
        }
    }

    /// Open the store at `location`, falling back to passthrough mode when
    /// the database or its schema cannot be set up.
    pub async fn open(location: StorageLocation, config: &StoreConfig) -> Self {
        match TileStore::open(location, config).await {
            Ok(store) => {
                debug!(location = ?store.location(), "Tile cache enabled");
                Self::new(store)
            }
            Err(e) => {
                warn!(error = %e, "Failed to open tile store, running without cache");
                Self::passthrough(e.to_string())
            }
        }
    }

    /// Share an existing event bus instead of the cache's own
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn store(&self) -> Option<&TileStore> {
        self.store.as_ref()
    }

    pub fn degraded_state(&self) -> DegradedState {
        self.degraded_state.clone()
    }

    /// Get the event bus for subscribing to updates
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            lookup_errors: self.counters.lookup_errors.load(Ordering::Relaxed),
        }
    }

    /// Resolve a tile to its cached payload or to `fallback_url`
    ///
    /// Never fails and never writes: populating the cache is the download
    /// pipeline's job.
    pub async fn resolve_tile(
        &self,
        map_name: &str,
        coord: TileCoord,
        fallback_url: &str,
    ) -> TileSource {
        let Some(store) = &self.store else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return TileSource::Remote(fallback_url.to_string());
        };

        match store.get(coord, map_name).await {
            Ok(Some(tile)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(map = %map_name, tile = %coord, "Cache hit");
                TileSource::Cached(tile.payload)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(map = %map_name, tile = %coord, "Cache miss");
                TileSource::Remote(fallback_url.to_string())
            }
            Err(e) => {
                self.counters.lookup_errors.fetch_add(1, Ordering::Relaxed);
                warn!(map = %map_name, tile = %coord, error = %e, "Tile lookup failed, using remote URL");
                TileSource::Remote(fallback_url.to_string())
            }
        }
    }

    /// Store a downloaded tile (download pipeline entry point)
    pub async fn store_tile(&self, tile: Tile) -> Result<()> {
        let store = self.require_store()?;
        let map_name = tile.map_name.clone();
        store.put(tile).await?;
        self.event_bus.publish(CacheEvent::TileStored { map_name });
        Ok(())
    }

    /// Delete every cached tile of a map
    ///
    /// Always completes: the row count on success, the storage error
    /// otherwise. Failures are also logged and published on the event bus.
    pub async fn delete_map(&self, map_name: &str) -> Result<usize> {
        let result = match self.require_store() {
            Ok(store) => store.delete_by_map(map_name).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(tiles_removed) => {
                info!(map = %map_name, tiles_removed, "Map deleted from tile cache");
                self.event_bus.publish(CacheEvent::MapDeleted {
                    map_name: map_name.to_string(),
                    tiles_removed: *tiles_removed,
                });
            }
            Err(e) => {
                warn!(map = %map_name, error = %e, "Failed to delete map tiles");
                self.event_bus.publish(CacheEvent::MapDeleteFailed {
                    map_name: map_name.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        result
    }

    /// Remove every cached tile of every map
    pub async fn clear(&self) -> Result<usize> {
        let tiles_removed = self.require_store()?.clear().await?;
        self.event_bus
            .publish(CacheEvent::CacheCleared { tiles_removed });
        Ok(tiles_removed)
    }

    fn require_store(&self) -> Result<&TileStore> {
        self.store.as_ref().ok_or(CoreError::StoreNotReady {
            state: StoreState::Unopened,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: &str = "https://tiles.example.org/tms/open/8/316/661.png";

    async fn cache() -> TileCache {
        TileCache::new(TileStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_resolve_hit_returns_payload() {
        let cache = cache().await;
        let coord = TileCoord::new(8, 316, 661);
        cache
            .store_tile(Tile::new(coord, "name-name", "data:image/png;base64,AAAA"))
            .await
            .unwrap();

        let source = cache.resolve_tile("name-name", coord, FALLBACK).await;
        assert_eq!(
            source,
            TileSource::Cached("data:image/png;base64,AAAA".to_string())
        );
        assert!(source.is_cached());
        assert_eq!(cache.counters().hits, 1);
    }

    #[tokio::test]
    async fn test_resolve_miss_returns_fallback_unchanged() {
        let cache = cache().await;
        let source = cache
            .resolve_tile("name-name", TileCoord::new(8, 316, 661), FALLBACK)
            .await;

        assert_eq!(source, TileSource::Remote(FALLBACK.to_string()));
        assert_eq!(source.as_str(), FALLBACK);
        assert_eq!(cache.counters().misses, 1);
    }

    #[tokio::test]
    async fn test_resolve_does_not_populate_cache() {
        let cache = cache().await;
        let coord = TileCoord::new(3, 1, 1);
        cache.resolve_tile("m", coord, FALLBACK).await;

        let store = cache.store().unwrap();
        assert!(store.get(coord, "m").await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().total_tiles, 0);
    }

    #[tokio::test]
    async fn test_resolve_other_map_is_a_miss() {
        let cache = cache().await;
        let coord = TileCoord::new(8, 316, 661);
        cache
            .store_tile(Tile::new(coord, "A", "payload-a"))
            .await
            .unwrap();

        let source = cache.resolve_tile("B", coord, FALLBACK).await;
        assert_eq!(source, TileSource::Remote(FALLBACK.to_string()));
    }

    #[tokio::test]
    async fn test_lookup_error_degrades_to_fallback() {
        // Store never opened: every lookup fails
        let cache = TileCache::new(TileStore::new(StorageLocation::Memory));

        let source = cache
            .resolve_tile("m", TileCoord::new(1, 1, 1), FALLBACK)
            .await;
        assert_eq!(source, TileSource::Remote(FALLBACK.to_string()));
        assert_eq!(cache.counters().lookup_errors, 1);
    }

    #[tokio::test]
    async fn test_passthrough_cache() {
        let cache = TileCache::passthrough("schema failed");
        assert!(cache.degraded_state().is_degraded());

        let source = cache
            .resolve_tile("m", TileCoord::new(1, 1, 1), FALLBACK)
            .await;
        assert_eq!(source.into_string(), FALLBACK);

        let err = cache.delete_map("m").await.unwrap_err();
        assert!(matches!(err, CoreError::StoreNotReady { .. }));
    }

    #[tokio::test]
    async fn test_open_unwritable_location_falls_back_to_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file
        let cache = TileCache::open(
            StorageLocation::File(dir.path().to_path_buf()),
            &StoreConfig::default(),
        )
        .await;

        assert!(cache.degraded_state().is_degraded());
        assert!(cache.store().is_none());
    }

    #[tokio::test]
    async fn test_delete_map_signals_completion() {
        let cache = cache().await;
        let mut events = cache.event_bus().subscribe();
        let coord = TileCoord::new(8, 316, 661);
        cache
            .store_tile(Tile::new(coord, "name-name", "<img-bytes>"))
            .await
            .unwrap();

        let removed = cache.delete_map("name-name").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            cache.resolve_tile("name-name", coord, FALLBACK).await,
            TileSource::Remote(FALLBACK.to_string())
        );

        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::TileStored {
                map_name: "name-name".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::MapDeleted {
                map_name: "name-name".to_string(),
                tiles_removed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_delete_failure_is_published() {
        let cache = TileCache::passthrough("unavailable");
        let mut events = cache.event_bus().subscribe();

        assert!(cache.delete_map("m").await.is_err());
        assert!(matches!(
            events.recv().await.unwrap(),
            CacheEvent::MapDeleteFailed { map_name, .. } if map_name == "m"
        ));
    }

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters {
            hits: 3,
            misses: 1,
            lookup_errors: 0,
        };
        assert!((counters.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheCounters::default().hit_rate(), 0.0);
    }
}
