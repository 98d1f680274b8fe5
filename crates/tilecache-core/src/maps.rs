//! Offline map library
//!
//! Coordinates the tile cache with the saved-map bookkeeping: admission of
//! new downloads, recording completed ones, and the two-step delete and
//! rename workflows that keep both stores in agreement.

use crate::cache::{StorageLocation, TileCache, TileSource};
use crate::config::{CacheConfig, LibraryConfig};
use crate::error::{CoreError, Result};
use crate::event::{CacheEvent, EventBus};
use crate::models::{Extent, MapPoint, SavedMapDetails, SavedMapSummary, Tile, TileCoord};
use crate::plan::{DownloadPlan, TileGrid};
use crate::saved_maps::SavedMaps;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Replace every character outside `[-A-Za-z0-9_.]` with `_`
pub fn sanitize_map_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// What the user asked to save
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub map_name: String,
    pub extent: Extent,
    pub min_zoom: u32,
    pub max_zoom: u32,
    /// Tile service root, e.g. `https://host/mapcache/tms/1.0.0/open`
    pub base_url: String,
    /// Tile file extension (`png`, `jpg`)
    pub file_type: String,
}

/// Outcome of deleting a map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDeletion {
    pub map_name: String,
    pub tiles_removed: usize,
    /// False when no bookkeeping record existed
    pub record_removed: bool,
}

/// Saved maps plus their cached tiles
pub struct MapLibrary {
    config: LibraryConfig,
    grid: TileGrid,
    cache: TileCache,
    saved_maps: RwLock<SavedMaps>,
}

impl MapLibrary {
    pub fn new(cache: TileCache, saved_maps: SavedMaps, config: LibraryConfig) -> Self {
        Self {
            config,
            grid: TileGrid::default(),
            cache,
            saved_maps: RwLock::new(saved_maps),
        }
    }

    /// Open the tile database and bookkeeping file inside `data_dir`
    ///
    /// Never fails: an unusable tile database leaves the cache in
    /// passthrough mode (see `TileCache::open`).
    pub async fn open(data_dir: &Path, config: &CacheConfig) -> Self {
        let cache = TileCache::open(
            StorageLocation::File(config.database_path(data_dir)),
            &config.store,
        )
        .await;
        let saved_maps = SavedMaps::load(&config.saved_maps_path(data_dir));

        info!(
            data_dir = %data_dir.display(),
            saved_maps = saved_maps.count(),
            healthy = cache.degraded_state().is_healthy(),
            "Map library opened"
        );
        Self::new(cache, saved_maps, config.library.clone())
    }

    /// Use a different tile grid for download planning
    pub fn with_grid(mut self, grid: TileGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn event_bus(&self) -> &EventBus {
        self.cache.event_bus()
    }

    pub fn saved_map_count(&self) -> usize {
        self.saved_maps.read().count()
    }

    pub fn saved_map_details(&self, name: &str) -> Option<SavedMapDetails> {
        self.saved_maps.read().details(name).cloned()
    }

    /// Resolve a tile through the cache
    pub async fn resolve_tile(
        &self,
        map_name: &str,
        coord: TileCoord,
        fallback_url: &str,
    ) -> TileSource {
        self.cache.resolve_tile(map_name, coord, fallback_url).await
    }

    /// All saved maps with the number of tiles cached for each
    pub async fn saved_maps(&self) -> Result<Vec<SavedMapSummary>> {
        let counts = self.tile_counts().await?;
        let saved = self.saved_maps.read();

        Ok(saved
            .iter()
            .map(|(name, details)| SavedMapSummary {
                name: name.to_string(),
                details: details.clone(),
                cached_tiles: counts.get(name).copied().unwrap_or(0),
            })
            .collect())
    }

    /// One saved map with its cached tile count
    pub async fn saved_map(&self, name: &str) -> Result<SavedMapSummary> {
        let details = self
            .saved_map_details(name)
            .ok_or_else(|| CoreError::SavedMapNotFound {
                name: name.to_string(),
            })?;
        let cached_tiles = match self.cache.store() {
            Some(store) => store.count_tiles(name).await?,
            None => 0,
        };

        Ok(SavedMapSummary {
            name: name.to_string(),
            details,
            cached_tiles,
        })
    }

    /// Maps that own cached tiles but have no bookkeeping record
    pub async fn orphaned_maps(&self) -> Result<Vec<String>> {
        let counts = self.tile_counts().await?;
        let saved = self.saved_maps.read();

        let mut orphans: Vec<String> = counts
            .into_keys()
            .filter(|name| !saved.contains(name))
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    /// Validate a save request and enumerate the tiles to download
    pub fn plan_save(&self, request: &SaveRequest) -> Result<DownloadPlan> {
        let map_name = sanitize_map_name(request.map_name.trim());
        if map_name.is_empty() {
            return Err(CoreError::InvalidMapName {
                name: request.map_name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }

        {
            let saved = self.saved_maps.read();
            if saved.contains(&map_name) {
                return Err(CoreError::MapAlreadySaved { name: map_name });
            }
            if saved.count() >= self.config.max_saved_maps {
                return Err(CoreError::SavedMapLimit {
                    max: self.config.max_saved_maps,
                });
            }
        }

        let plan = DownloadPlan::build(
            &map_name,
            &self.grid,
            request.extent,
            request.min_zoom,
            request.max_zoom,
            &request.base_url,
            &request.file_type,
            self.config.average_tile_bytes,
        )?;
        plan.check_budget(self.config.max_download_bytes)?;

        debug!(
            map = %plan.map_name,
            tiles = plan.tile_count,
            bytes = plan.estimated_bytes,
            "Download plan accepted"
        );
        Ok(plan)
    }

    /// Store one downloaded tile
    pub async fn store_tile(&self, tile: Tile) -> Result<()> {
        self.cache.store_tile(tile).await
    }

    /// Record a finished download
    pub fn complete_save(
        &self,
        plan: &DownloadPlan,
        poi: Option<MapPoint>,
    ) -> Result<SavedMapDetails> {
        let details = SavedMapDetails {
            poi: poi.unwrap_or_else(|| plan.extent.centre()),
            extent: plan.extent,
            min_zoom: plan.min_zoom,
            max_zoom: plan.max_zoom,
            tile_count: plan.tile_count,
            saved_at: Utc::now(),
        };

        self.saved_maps
            .write()
            .set_details(&plan.map_name, details.clone())?;

        info!(map = %plan.map_name, tiles = plan.tile_count, "Map saved");
        self.event_bus().publish(CacheEvent::MapSaved {
            map_name: plan.map_name.clone(),
        });
        Ok(details)
    }

    /// Delete a map: its tiles first, then its bookkeeping record
    ///
    /// When tile deletion fails the record is kept, so the map still shows
    /// up and the delete can be retried. When the record cannot be written
    /// it stays both in memory and on disk; a retry then removes no tiles
    /// and drops the record.
    pub async fn delete_map(&self, name: &str) -> Result<MapDeletion> {
        let tiles_removed = self.cache.delete_map(name).await?;
        let record_removed = self.saved_maps.write().remove(name)?.is_some();

        if !record_removed {
            debug!(map = %name, "No saved-map record to remove");
        }

        Ok(MapDeletion {
            map_name: name.to_string(),
            tiles_removed,
            record_removed,
        })
    }

    /// Rename a saved map and its tiles.
    ///
    /// Returns false when the new name is empty or unchanged, or the old
    /// map is not saved.
    pub async fn rename_map(&self, old_name: &str, new_name: &str) -> Result<bool> {
        let new_name = sanitize_map_name(new_name.trim());
        if new_name.is_empty() || old_name == new_name {
            return Ok(false);
        }

        {
            let saved = self.saved_maps.read();
            if !saved.contains(old_name) {
                return Ok(false);
            }
            if saved.contains(&new_name) {
                return Err(CoreError::MapAlreadySaved { name: new_name });
            }
        }

        let store = self.cache.store().ok_or(CoreError::StoreNotReady {
            state: crate::cache::StoreState::Unopened,
        })?;
        store.rename_map(old_name, &new_name).await?;

        let renamed = self.saved_maps.write().rename(old_name, &new_name);
        match renamed {
            Ok(true) => {
                self.event_bus().publish(CacheEvent::MapRenamed {
                    from: old_name.to_string(),
                    to: new_name,
                });
                Ok(true)
            }
            outcome => {
                match &outcome {
                    Err(e) => {
                        warn!(from = %old_name, to = %new_name, error = %e, "Saved map rename failed, restoring tiles")
                    }
                    _ => warn!(from = %old_name, "Saved map record vanished during rename, restoring tiles"),
                }
                if let Err(revert) = store.rename_map(&new_name, old_name).await {
                    warn!(error = %revert, "Failed to restore tile names");
                }
                outcome
            }
        }
    }

    async fn tile_counts(&self) -> Result<HashMap<String, usize>> {
        let Some(store) = self.cache.store() else {
            return Ok(HashMap::new());
        };
        Ok(store
            .map_summaries()
            .await?
            .into_iter()
            .map(|summary| (summary.map_name, summary.tile_count))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TileStore;
    use tempfile::{tempdir, TempDir};

    const EDINBURGH: Extent = Extent {
        left: 322_499.993_407_85,
        bottom: 676_321.018_236_58,
        right: 323_715.993_407_85,
        top: 677_925.018_236_58,
    };

    async fn library() -> (MapLibrary, TempDir) {
        let dir = tempdir().unwrap();
        let cache = TileCache::new(TileStore::in_memory().await.unwrap());
        let saved = SavedMaps::load(&dir.path().join("saved-maps-v2.json"));
        (
            MapLibrary::new(cache, saved, LibraryConfig::default()),
            dir,
        )
    }

    fn request(name: &str) -> SaveRequest {
        SaveRequest {
            map_name: name.to_string(),
            extent: EDINBURGH,
            min_zoom: 8,
            max_zoom: 9,
            base_url: "https://tiles.example.org/tms/open".to_string(),
            file_type: "jpg".to_string(),
        }
    }

    /// Plays the download pipeline: stores a payload for every planned tile
    async fn download(library: &MapLibrary, plan: &DownloadPlan) {
        for req in plan.requests() {
            library
                .store_tile(Tile::new(req.coord, &plan.map_name, format!("img:{}", req.url)))
                .await
                .unwrap();
        }
        library.complete_save(plan, None).unwrap();
    }

    #[test]
    fn test_sanitize_map_name() {
        assert_eq!(sanitize_map_name("name-name"), "name-name");
        assert_eq!(sanitize_map_name("North Edinburgh/2"), "North_Edinburgh_2");
        assert_eq!(sanitize_map_name("v1.2_ok"), "v1.2_ok");
    }

    #[tokio::test]
    async fn test_save_and_list() {
        let (library, _dir) = library().await;
        let plan = library.plan_save(&request("name name")).unwrap();
        assert_eq!(plan.map_name, "name_name");

        download(&library, &plan).await;

        let maps = library.saved_maps().await.unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].name, "name_name");
        assert_eq!(maps[0].cached_tiles, 29);
        assert_eq!(maps[0].details.tile_count, 29);
        assert_eq!(maps[0].details.poi, EDINBURGH.centre());

        let source = library
            .resolve_tile("name_name", TileCoord::new(8, 316, 661), "fallback")
            .await;
        assert_eq!(
            source,
            TileSource::Cached("img:https://tiles.example.org/tms/open/8/316/661.jpg".to_string())
        );
    }

    #[tokio::test]
    async fn test_plan_rejects_duplicates_and_limit() {
        let (library, _dir) = library().await;
        for name in ["a", "b", "c"] {
            let plan = library.plan_save(&request(name)).unwrap();
            library.complete_save(&plan, None).unwrap();
        }

        let err = library.plan_save(&request("a")).unwrap_err();
        assert!(matches!(err, CoreError::MapAlreadySaved { name } if name == "a"));

        let err = library.plan_save(&request("d")).unwrap_err();
        assert!(matches!(err, CoreError::SavedMapLimit { max: 3 }));
    }

    #[tokio::test]
    async fn test_plan_rejects_oversized_download() {
        let (library, _dir) = library().await;
        let mut req = request("big");
        req.min_zoom = 0;
        req.max_zoom = 10;
        req.extent = Extent::new(0.0, 0.0, 700_000.0, 1_300_000.0);

        let err = library.plan_save(&req).unwrap_err();
        assert!(matches!(err, CoreError::DownloadTooLarge { .. }));
        assert_eq!(library.saved_map_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_rejects_empty_name() {
        let (library, _dir) = library().await;
        let err = library.plan_save(&request("   ")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidMapName { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_tiles_and_record() {
        let (library, _dir) = library().await;
        let plan = library.plan_save(&request("name-name")).unwrap();
        download(&library, &plan).await;

        let other = library.plan_save(&request("other")).unwrap();
        download(&library, &other).await;

        let deletion = library.delete_map("name-name").await.unwrap();
        assert_eq!(
            deletion,
            MapDeletion {
                map_name: "name-name".to_string(),
                tiles_removed: 29,
                record_removed: true,
            }
        );

        assert!(library.saved_map_details("name-name").is_none());
        assert_eq!(
            library
                .resolve_tile("name-name", TileCoord::new(8, 316, 661), "fallback")
                .await,
            TileSource::Remote("fallback".to_string())
        );
        assert!(library
            .resolve_tile("other", TileCoord::new(8, 316, 661), "fallback")
            .await
            .is_cached());
    }

    #[tokio::test]
    async fn test_delete_unknown_map_succeeds() {
        let (library, _dir) = library().await;
        let deletion = library.delete_map("ghost").await.unwrap();
        assert_eq!(deletion.tiles_removed, 0);
        assert!(!deletion.record_removed);
    }

    #[tokio::test]
    async fn test_delete_keeps_record_when_tiles_fail() {
        let dir = tempdir().unwrap();
        let mut saved = SavedMaps::load(&dir.path().join("saved-maps-v2.json"));
        saved
            .set_details(
                "kept",
                SavedMapDetails {
                    poi: EDINBURGH.centre(),
                    extent: EDINBURGH,
                    min_zoom: 8,
                    max_zoom: 9,
                    tile_count: 29,
                    saved_at: Utc::now(),
                },
            )
            .unwrap();
        let library = MapLibrary::new(
            TileCache::passthrough("no database"),
            saved,
            LibraryConfig::default(),
        );

        assert!(library.delete_map("kept").await.is_err());
        assert!(library.saved_map_details("kept").is_some());
    }

    #[tokio::test]
    async fn test_rename_moves_tiles_and_record() {
        let (library, _dir) = library().await;
        let plan = library.plan_save(&request("old")).unwrap();
        download(&library, &plan).await;

        assert!(!library.rename_map("old", "").await.unwrap());
        assert!(!library.rename_map("old", "old").await.unwrap());
        assert!(!library.rename_map("missing", "x").await.unwrap());

        assert!(library.rename_map("old", "new map").await.unwrap());
        assert!(library.saved_map_details("old").is_none());

        let renamed = library.saved_map("new_map").await.unwrap();
        assert_eq!(renamed.cached_tiles, 29);

        let err = library.saved_map("old").await.unwrap_err();
        assert!(matches!(err, CoreError::SavedMapNotFound { .. }));
    }

    #[tokio::test]
    async fn test_plan_rejects_huge_extent() {
        let (library, _dir) = library().await;
        let mut req = request("huge");
        req.extent = Extent::new(0.0, 0.0, 1e15, 1e15);
        req.min_zoom = 10;
        req.max_zoom = 10;

        let err = library.plan_save(&req).unwrap_err();
        assert!(matches!(err, CoreError::DownloadTooLarge { tiles: u64::MAX, .. }));
    }

    /// Makes every later bookkeeping write fail
    fn block_saved_map_writes(dir: &TempDir) {
        std::fs::create_dir(dir.path().join("saved-maps-v2.json.tmp")).unwrap();
    }

    #[tokio::test]
    async fn test_rename_restores_tiles_when_record_write_fails() {
        let (library, dir) = library().await;
        let plan = library.plan_save(&request("old")).unwrap();
        download(&library, &plan).await;
        block_saved_map_writes(&dir);

        assert!(library.rename_map("old", "new").await.is_err());

        assert!(library.saved_map_details("old").is_some());
        assert!(library.saved_map_details("new").is_none());
        let store = library.cache().store().unwrap();
        assert_eq!(store.count_tiles("old").await.unwrap(), 29);
        assert_eq!(store.count_tiles("new").await.unwrap(), 0);

        let on_disk = SavedMaps::load(&dir.path().join("saved-maps-v2.json"));
        assert!(on_disk.contains("old"));
        assert!(!on_disk.contains("new"));
    }

    #[tokio::test]
    async fn test_delete_keeps_record_when_record_write_fails() {
        let (library, dir) = library().await;
        let plan = library.plan_save(&request("doomed")).unwrap();
        download(&library, &plan).await;
        block_saved_map_writes(&dir);

        assert!(library.delete_map("doomed").await.is_err());

        assert!(library.saved_map_details("doomed").is_some());
        let on_disk = SavedMaps::load(&dir.path().join("saved-maps-v2.json"));
        assert!(on_disk.contains("doomed"));
        assert_eq!(library.saved_map("doomed").await.unwrap().cached_tiles, 0);
    }

    #[tokio::test]
    async fn test_orphaned_maps() {
        let (library, _dir) = library().await;
        library
            .store_tile(Tile::new(TileCoord::new(1, 1, 1), "stray", "p"))
            .await
            .unwrap();
        let plan = library.plan_save(&request("kept")).unwrap();
        download(&library, &plan).await;

        assert_eq!(library.orphaned_maps().await.unwrap(), vec!["stray".to_string()]);
    }

    #[tokio::test]
    async fn test_open_from_data_dir() {
        let dir = tempdir().unwrap();
        let config = CacheConfig::default();

        {
            let library = MapLibrary::open(dir.path(), &config).await;
            assert!(library.cache().degraded_state().is_healthy());
            let plan = library.plan_save(&request("persisted")).unwrap();
            download(&library, &plan).await;
        }

        let library = MapLibrary::open(dir.path(), &config).await;
        let summary = library.saved_map("persisted").await.unwrap();
        assert_eq!(summary.cached_tiles, 29);
    }
}
