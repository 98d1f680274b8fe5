//! Configuration for tilecache
//!
//! Loaded from an optional TOML file; every field has a default so a
//! missing file or a partial file is fine.
//!
//! ```toml
//! [store]
//! database_file = "tiles.db"
//! capacity_bytes = 10485760
//!
//! [library]
//! max_saved_maps = 3
//! ```

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default capacity budget of the tile database (10 MiB)
pub const DEFAULT_CAPACITY_BYTES: u64 = 10 * 1024 * 1024;

/// Default per-download budget (50 MiB)
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Average encoded tile size used to estimate downloads (16 KiB)
pub const DEFAULT_AVERAGE_TILE_BYTES: u64 = 16 * 1024;

/// Maximum number of maps a user can keep offline at once
pub const DEFAULT_MAX_SAVED_MAPS: usize = 3;

/// Tile database settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file name, relative to the data directory
    pub database_file: PathBuf,

    /// Upper bound on the database size
    pub capacity_bytes: u64,

    /// Use write-ahead logging for file-backed databases
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from("tiles.db"),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            wal: true,
        }
    }
}

/// Saved-map bookkeeping and download admission settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Bookkeeping file name, relative to the data directory
    pub saved_maps_file: PathBuf,

    pub max_saved_maps: usize,

    pub max_download_bytes: u64,

    pub average_tile_bytes: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            saved_maps_file: PathBuf::from("saved-maps-v2.json"),
            max_saved_maps: DEFAULT_MAX_SAVED_MAPS,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            average_tile_bytes: DEFAULT_AVERAGE_TILE_BYTES,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub store: StoreConfig,
    pub library: LibraryConfig,
}

impl CacheConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(CoreError::FileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: CacheConfig =
            toml::from_str(&content).map_err(|source| CoreError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;

        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Reject settings that would make the cache unusable
    pub fn validate(&self) -> Result<()> {
        if self.store.capacity_bytes == 0 {
            return Err(CoreError::InvalidConfig {
                message: "store.capacity_bytes must be greater than zero".to_string(),
            });
        }
        if self.library.average_tile_bytes == 0 {
            return Err(CoreError::InvalidConfig {
                message: "library.average_tile_bytes must be greater than zero".to_string(),
            });
        }
        if self.library.max_saved_maps == 0 {
            return Err(CoreError::InvalidConfig {
                message: "library.max_saved_maps must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Absolute path of the tile database inside `data_dir`
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.store.database_file)
    }

    /// Absolute path of the saved-maps document inside `data_dir`
    pub fn saved_maps_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.library.saved_maps_file)
    }
}
