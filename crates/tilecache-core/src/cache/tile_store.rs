//! SQLite tile store
//!
//! Persists tile payloads keyed by `(zoom_level, tile_column, tile_row, map_name)`.
//!
//! Schema:
//! - tiles table: one row per unique tuple, payload as TEXT
//! - tile_index: unique index over the full tuple (drives the upsert)
//! - idx_tiles_map_name: map-scoped counts and deletes
//! - cache_metadata: key/value table holding the schema version
//!
//! Every call runs on tokio's blocking pool against a single connection
//! guarded by a mutex, so transactions never interleave and async callers
//! never block their own thread.
//!
//! Schema Version History:
//! - v1: Legacy layout (`mapName` column, no version row)
//! - v2: Column renamed to `map_name`, map_name index, schema version row

use crate::config::StoreConfig;
use crate::error::{CoreError, Result};
use crate::models::{Tile, TileCoord};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Current schema version
const SCHEMA_VERSION: i64 = 2;

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS cache_metadata (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tiles (
        zoom_level INTEGER NOT NULL,
        tile_column INTEGER NOT NULL,
        tile_row INTEGER NOT NULL,
        tile_data TEXT NOT NULL,
        map_name TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS tile_index
        ON tiles(zoom_level, tile_column, tile_row, map_name);
    CREATE INDEX IF NOT EXISTS idx_tiles_map_name ON tiles(map_name);
"#;

const UPSERT_TILE_SQL: &str = r#"
    INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data, map_name)
    VALUES (?1, ?2, ?3, ?4, ?5)
    ON CONFLICT (zoom_level, tile_column, tile_row, map_name)
    DO UPDATE SET tile_data = excluded.tile_data
"#;

/// Where the tile database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    File(PathBuf),
    /// Private in-memory database, discarded with the store
    Memory,
}

impl StorageLocation {
    fn display_path(&self) -> PathBuf {
        match self {
            StorageLocation::File(path) => path.clone(),
            StorageLocation::Memory => PathBuf::from(":memory:"),
        }
    }
}

/// Lifecycle of the storage handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// No connection yet
    Unopened,
    /// Connection open, schema not yet initialized
    Opening,
    /// Idle and accepting operations
    Ready,
    /// A statement or transaction is running
    Busy,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            StoreState::Unopened => "unopened",
            StoreState::Opening => "opening",
            StoreState::Ready => "ready",
            StoreState::Busy => "busy",
        };
        f.write_str(name)
    }
}

struct Shared {
    location: StorageLocation,
    conn: Mutex<Option<Connection>>,
    /// Unopened, Opening or Ready; Busy is derived from `in_flight`
    phase: RwLock<StoreState>,
    in_flight: AtomicUsize,
}

/// Marks the store busy for the lifetime of one operation
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Durable, transactional tile storage
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct TileStore {
    shared: Arc<Shared>,
}

impl fmt::Debug for TileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileStore")
            .field("location", &self.shared.location)
            .field("state", &self.state())
            .finish()
    }
}

impl TileStore {
    /// Create an unopened store
    pub fn new(location: StorageLocation) -> Self {
        Self {
            shared: Arc::new(Shared {
                location,
                conn: Mutex::new(None),
                phase: RwLock::new(StoreState::Unopened),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Open the database and initialize the schema
    pub async fn open(location: StorageLocation, config: &StoreConfig) -> Result<Self> {
        let store = Self::new(location);
        store.connect(config).await?;
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Open an isolated in-memory store with default settings
    pub async fn in_memory() -> Result<Self> {
        Self::open(StorageLocation::Memory, &StoreConfig::default()).await
    }

    pub fn location(&self) -> &StorageLocation {
        &self.shared.location
    }

    /// Current lifecycle state
    pub fn state(&self) -> StoreState {
        let phase = *self.shared.phase.read();
        if phase == StoreState::Ready && self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            StoreState::Busy
        } else {
            phase
        }
    }

    /// Open the connection and apply pragmas (Unopened → Opening)
    pub async fn connect(&self, config: &StoreConfig) -> Result<()> {
        {
            let mut phase = self.shared.phase.write();
            if *phase != StoreState::Unopened {
                debug!(state = %*phase, "Tile store already connected");
                return Ok(());
            }
            *phase = StoreState::Opening;
        }

        let shared = Arc::clone(&self.shared);
        let capacity_bytes = config.capacity_bytes;
        let wal = config.wal;

        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = open_connection(&shared.location, capacity_bytes, wal)?;
            *shared.conn.lock() = Some(conn);
            Ok(())
        })
        .await
        .map_err(|source| CoreError::Worker {
            operation: "open tile database",
            source,
        })
        .and_then(|r| r);

        if let Err(e) = result {
            *self.shared.phase.write() = StoreState::Unopened;
            return Err(e);
        }

        debug!(
            path = %self.shared.location.display_path().display(),
            capacity_bytes,
            "Tile database opened"
        );
        Ok(())
    }

    /// Create the tile table and indexes if absent (Opening → Ready)
    ///
    /// Idempotent; safe to call on every start. Databases written by the
    /// legacy layout are migrated in place.
    pub async fn initialize_schema(&self) -> Result<()> {
        let state = self.state();
        if state == StoreState::Unopened {
            return Err(CoreError::StoreNotReady { state });
        }

        self.execute("initialize schema", |conn| {
            let schema_err = |message: &str| {
                let message = message.to_string();
                move |source: rusqlite::Error| CoreError::Schema { message, source }
            };

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(schema_err("Failed to begin schema transaction"))?;

            let legacy_column: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM pragma_table_info('tiles') WHERE name = 'mapName'",
                    [],
                    |row| row.get(0),
                )
                .map_err(schema_err("Failed to inspect tiles table"))?;

            if legacy_column > 0 {
                warn!("Legacy tile table detected, renaming mapName column");
                tx.execute("ALTER TABLE tiles RENAME COLUMN mapName TO map_name", [])
                    .map_err(schema_err("Failed to migrate legacy tiles table"))?;
            }

            tx.execute_batch(SCHEMA_SQL)
                .map_err(schema_err("Failed to create schema"))?;

            let stored_version: Option<i64> = tx
                .query_row(
                    "SELECT value FROM cache_metadata WHERE key = 'schema_version'",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(schema_err("Failed to query schema version"))?;

            if stored_version != Some(SCHEMA_VERSION) {
                tx.execute(
                    "INSERT OR REPLACE INTO cache_metadata (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION],
                )
                .map_err(schema_err("Failed to record schema version"))?;
                debug!(
                    previous = ?stored_version,
                    current = SCHEMA_VERSION,
                    "Schema version recorded"
                );
            }

            tx.commit()
                .map_err(schema_err("Failed to commit schema transaction"))?;
            Ok(())
        })
        .await?;

        *self.shared.phase.write() = StoreState::Ready;
        info!(
            path = %self.shared.location.display_path().display(),
            "Tile store ready"
        );
        Ok(())
    }

    /// Insert a tile, replacing any existing payload for the same tuple
    pub async fn put(&self, tile: Tile) -> Result<()> {
        if tile.map_name.trim().is_empty() {
            return Err(CoreError::InvalidTile {
                reason: "map name must not be empty".to_string(),
            });
        }

        self.run("store tile", move |conn| {
            let Tile {
                coord,
                map_name,
                payload,
            } = tile;
            let write_err = |source: rusqlite::Error| CoreError::Write {
                operation: "store tile",
                map_name: map_name.clone(),
                source,
            };

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(write_err)?;
            tx.execute(
                UPSERT_TILE_SQL,
                params![
                    coord.zoom as i64,
                    coord.column as i64,
                    coord.row as i64,
                    &payload,
                    &map_name,
                ],
            )
            .map_err(write_err)?;
            tx.commit().map_err(write_err)?;

            debug!(map = %map_name, tile = %coord, bytes = payload.len(), "Tile stored");
            Ok(())
        })
        .await
    }

    /// Look up a tile by its full identity; `None` means not cached
    pub async fn get(&self, coord: TileCoord, map_name: &str) -> Result<Option<Tile>> {
        let map_name = map_name.to_string();

        self.run("look up tile", move |conn| {
            let payload: Option<String> = conn
                .prepare_cached(
                    "SELECT tile_data FROM tiles
                     WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3 AND map_name = ?4",
                )
                .and_then(|mut stmt| {
                    stmt.query_row(
                        params![
                            coord.zoom as i64,
                            coord.column as i64,
                            coord.row as i64,
                            &map_name,
                        ],
                        |row| row.get(0),
                    )
                    .optional()
                })
                .map_err(|source: rusqlite::Error| CoreError::Lookup {
                    coord,
                    map_name: map_name.clone(),
                    source,
                })?;

            Ok(payload.map(|payload| Tile {
                coord,
                map_name,
                payload,
            }))
        })
        .await
    }

    /// Delete every tile of a map in one transaction; returns rows removed
    pub async fn delete_by_map(&self, map_name: &str) -> Result<usize> {
        let map_name = map_name.to_string();

        self.run("delete map tiles", move |conn| {
            let write_err = |source: rusqlite::Error| CoreError::Write {
                operation: "delete tiles",
                map_name: map_name.clone(),
                source,
            };

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(write_err)?;
            let removed = tx
                .execute("DELETE FROM tiles WHERE map_name = ?1", params![&map_name])
                .map_err(write_err)?;
            tx.commit().map_err(write_err)?;

            info!(map = %map_name, removed, "Map tiles deleted");
            Ok(removed)
        })
        .await
    }

    /// Move every tile of `old_name` under `new_name`
    ///
    /// Fails with `MapNameTaken` when `new_name` already owns tiles, so two
    /// maps are never merged by accident.
    pub async fn rename_map(&self, old_name: &str, new_name: &str) -> Result<usize> {
        if new_name.trim().is_empty() {
            return Err(CoreError::InvalidTile {
                reason: "map name must not be empty".to_string(),
            });
        }
        let old_name = old_name.to_string();
        let new_name = new_name.to_string();

        self.run("rename map", move |conn| {
            let write_err = |source: rusqlite::Error| CoreError::Write {
                operation: "rename tiles",
                map_name: old_name.clone(),
                source,
            };

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(write_err)?;

            let taken: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM tiles WHERE map_name = ?1",
                    params![&new_name],
                    |row| row.get(0),
                )
                .map_err(write_err)?;
            if taken > 0 {
                return Err(CoreError::MapNameTaken { name: new_name });
            }

            let moved = tx
                .execute(
                    "UPDATE tiles SET map_name = ?1 WHERE map_name = ?2",
                    params![&new_name, &old_name],
                )
                .map_err(write_err)?;
            tx.commit().map_err(write_err)?;

            info!(from = %old_name, to = %new_name, moved, "Map tiles renamed");
            Ok(moved)
        })
        .await
    }

    /// Number of tiles cached for a map
    pub async fn count_tiles(&self, map_name: &str) -> Result<usize> {
        let map_name = map_name.to_string();

        self.run("count tiles", move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM tiles WHERE map_name = ?1",
                    params![&map_name],
                    |row| row.get(0),
                )
                .map_err(|source: rusqlite::Error| CoreError::Query {
                    operation: "count tiles",
                    source,
                })?;
            Ok(count as usize)
        })
        .await
    }

    /// Per-map tile counts and payload sizes, ordered by map name
    pub async fn map_summaries(&self) -> Result<Vec<MapTileSummary>> {
        self.run("summarize maps", |conn| {
            let query_err = |source: rusqlite::Error| CoreError::Query {
                operation: "summarize maps",
                source,
            };

            let mut stmt = conn
                .prepare(
                    "SELECT map_name, COUNT(*), COALESCE(SUM(LENGTH(tile_data)), 0)
                     FROM tiles GROUP BY map_name ORDER BY map_name",
                )
                .map_err(query_err)?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(MapTileSummary {
                        map_name: row.get(0)?,
                        tile_count: row.get::<_, i64>(1)? as usize,
                        payload_bytes: row.get::<_, i64>(2)? as usize,
                    })
                })
                .map_err(query_err)?;

            let mut summaries = Vec::new();
            for row in rows {
                summaries.push(row.map_err(query_err)?);
            }
            Ok(summaries)
        })
        .await
    }

    /// Get store statistics
    pub async fn stats(&self) -> Result<CacheStats> {
        self.run("collect stats", |conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(tile_data)), 0), COUNT(DISTINCT map_name)
                 FROM tiles",
                [],
                |row| {
                    Ok(CacheStats {
                        total_tiles: row.get::<_, i64>(0)? as usize,
                        total_payload_bytes: row.get::<_, i64>(1)? as usize,
                        map_count: row.get::<_, i64>(2)? as usize,
                    })
                },
            )
            .map_err(|source: rusqlite::Error| CoreError::Query {
                operation: "collect stats",
                source,
            })
        })
        .await
    }

    /// Remove every cached tile of every map
    pub async fn clear(&self) -> Result<usize> {
        self.run("clear tiles", |conn| {
            let write_err = |source: rusqlite::Error| CoreError::Write {
                operation: "clear tiles",
                map_name: "*".to_string(),
                source,
            };

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(write_err)?;
            let removed = tx.execute("DELETE FROM tiles", []).map_err(write_err)?;
            tx.commit().map_err(write_err)?;

            info!(removed, "Tile cache cleared");
            Ok(removed)
        })
        .await
    }

    /// Vacuum database to reclaim space
    pub async fn vacuum(&self) -> Result<()> {
        self.run("vacuum", |conn| {
            conn.execute_batch("VACUUM")
                .map_err(|source: rusqlite::Error| CoreError::Query {
                    operation: "vacuum",
                    source,
                })?;
            debug!("Tile database vacuumed");
            Ok(())
        })
        .await
    }

    /// Schema version recorded in the database
    pub async fn schema_version(&self) -> Result<Option<i64>> {
        self.run("read schema version", |conn| {
            conn.query_row(
                "SELECT value FROM cache_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source: rusqlite::Error| CoreError::Query {
                operation: "read schema version",
                source,
            })
        })
        .await
    }

    /// Run an operation that requires a ready store
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let state = self.state();
        if !matches!(state, StoreState::Ready | StoreState::Busy) {
            return Err(CoreError::StoreNotReady { state });
        }
        self.execute(operation, f).await
    }

    /// Run `f` on the blocking pool with exclusive access to the connection
    async fn execute<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);

        tokio::task::spawn_blocking(move || {
            let mut guard = shared.conn.lock();
            let conn = guard.as_mut().ok_or(CoreError::StoreNotReady {
                state: StoreState::Unopened,
            })?;
            let _busy = BusyGuard::enter(&shared.in_flight);
            f(conn)
        })
        .await
        .map_err(|source| CoreError::Worker { operation, source })?
    }
}

fn open_connection(location: &StorageLocation, capacity_bytes: u64, wal: bool) -> Result<Connection> {
    let open_err = |source: rusqlite::Error| CoreError::StoreOpen {
        path: location.display_path(),
        source,
    };

    let conn = match location {
        StorageLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| CoreError::FileWrite {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let conn = Connection::open(path).map_err(open_err)?;
            if wal {
                let mode: String = conn
                    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                    .map_err(open_err)?;
                debug!(mode = %mode, "Journal mode set");
            }
            conn
        }
        StorageLocation::Memory => Connection::open_in_memory().map_err(open_err)?,
    };

    apply_capacity(&conn, capacity_bytes).map_err(open_err)?;
    Ok(conn)
}

/// Cap the database size with `max_page_count`
fn apply_capacity(conn: &Connection, capacity_bytes: u64) -> rusqlite::Result<()> {
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let max_pages = (capacity_bytes / page_size.max(1) as u64).max(1) as i64;
    let applied: i64 =
        conn.pragma_update_and_check(None, "max_page_count", max_pages, |row| row.get(0))?;
    debug!(page_size, max_pages = applied, "Capacity budget applied");
    Ok(())
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Fold the WAL back into the main file
        if let (StorageLocation::File(_), Some(conn)) = (&self.location, self.conn.get_mut()) {
            if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
                warn!("Failed to checkpoint WAL on TileStore drop: {}", e);
            } else {
                debug!("WAL checkpoint completed on TileStore drop");
            }
        }
    }
}

/// Tile count and payload size for one map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapTileSummary {
    pub map_name: String,
    pub tile_count: usize,
    pub payload_bytes: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_tiles: usize,
    pub total_payload_bytes: usize,
    pub map_count: usize,
}

/// Open a file-backed store at `path`
pub async fn open_file(path: &Path, config: &StoreConfig) -> Result<TileStore> {
    TileStore::open(StorageLocation::File(path.to_path_buf()), config).await
}
