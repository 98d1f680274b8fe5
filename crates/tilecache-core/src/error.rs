//! Error types for tilecache-core
//!
//! One error hierarchy built with thiserror. Storage errors keep the
//! underlying `rusqlite::Error` as their source so callers can inspect it.

use crate::cache::StoreState;
use crate::models::TileCoord;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for tilecache operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // Tile Store Errors
    // ===================
    #[error("Failed to open tile database: {path}")]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to initialize tile schema: {message}")]
    Schema {
        message: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to {operation} for map '{map_name}'")]
    Write {
        operation: &'static str,
        map_name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Tile lookup failed for {coord} in map '{map_name}'")]
    Lookup {
        coord: TileCoord,
        map_name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Tile store query failed: {operation}")]
    Query {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Tile store is not ready (state: {state})")]
    StoreNotReady { state: StoreState },

    #[error("Storage worker failed during {operation}")]
    Worker {
        operation: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("Invalid tile: {reason}")]
    InvalidTile { reason: String },

    #[error("Map '{name}' already has cached tiles")]
    MapNameTaken { name: String },

    // ===================
    // Bookkeeping Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize saved maps: {message}")]
    JsonSerialize {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid map name '{name}': {reason}")]
    InvalidMapName { name: String, reason: String },

    #[error("Saved map not found: {name}")]
    SavedMapNotFound { name: String },

    #[error("Map '{name}' is already saved")]
    MapAlreadySaved { name: String },

    #[error("Saved map limit reached ({max} maps)")]
    SavedMapLimit { max: usize },

    // ===================
    // Planning Errors
    // ===================
    #[error("Download of {tiles} tiles ({bytes} bytes) exceeds the {max_bytes} byte limit")]
    DownloadTooLarge { tiles: u64, bytes: u64, max_bytes: u64 },

    #[error("Invalid zoom range {min}..={max}: {reason}")]
    InvalidZoomRange { min: u32, max: u32, reason: String },

    #[error("Invalid extent: {reason}")]
    InvalidExtent { reason: String },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse configuration in {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl CoreError {
    /// True when the storage engine refused a write because the database
    /// reached its capacity budget.
    pub fn is_storage_full(&self) -> bool {
        match self {
            CoreError::Write { source, .. } => matches!(
                source.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DiskFull)
            ),
            _ => false,
        }
    }

    /// True for failures of the storage layer itself, as opposed to
    /// rejected input or bookkeeping problems.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            CoreError::StoreOpen { .. }
                | CoreError::Schema { .. }
                | CoreError::Write { .. }
                | CoreError::Lookup { .. }
                | CoreError::Query { .. }
                | CoreError::Worker { .. }
        )
    }
}

/// Degraded state indicator for the tile cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedState {
    /// Tile store opened and schema initialized
    Healthy,
    /// Store unavailable; every tile resolves to its remote URL
    Passthrough { reason: String },
}

impl DegradedState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, DegradedState::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        !self.is_healthy()
    }
}
