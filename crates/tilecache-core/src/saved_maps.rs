//! Saved-map bookkeeping
//!
//! Records which maps have been downloaded for offline use, in a JSON
//! document next to the tile database (`saved-maps-v2.json`). The tile
//! table never reads this file; `MapLibrary` keeps the two consistent.

use crate::error::{CoreError, Result};
use crate::models::SavedMapDetails;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persistent name → details map of saved maps
#[derive(Debug, Clone)]
pub struct SavedMaps {
    path: PathBuf,
    maps: BTreeMap<String, SavedMapDetails>,
}

impl SavedMaps {
    /// Load saved maps from `path`.
    ///
    /// A missing file is an empty set. A corrupt file is discarded with a
    /// warning.
    pub fn load(path: &Path) -> Self {
        let maps = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(maps) => maps,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt saved maps file, discarding");
                    if let Err(e) = std::fs::remove_file(path) {
                        warn!(path = %path.display(), error = %e, "Failed to remove corrupt saved maps file");
                    }
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Saved maps file unreadable, starting empty; the next save replaces it"
                );
                BTreeMap::new()
            }
        };

        debug!(path = %path.display(), count = maps.len(), "Saved maps loaded");
        Self {
            path: path.to_path_buf(),
            maps,
        }
    }

    /// Persist to disk (write to a temporary file, then rename over the old one)
    pub fn save(&self) -> Result<()> {
        write_maps(&self.path, &self.maps)
    }

    /// Persist `maps` and adopt them only once they are on disk
    fn commit(&mut self, maps: BTreeMap<String, SavedMapDetails>) -> Result<()> {
        write_maps(&self.path, &maps)?;
        self.maps = maps;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.maps.contains_key(name)
    }

    pub fn details(&self, name: &str) -> Option<&SavedMapDetails> {
        self.maps.get(name)
    }

    /// Saved map names in order
    pub fn names(&self) -> Vec<String> {
        self.maps.keys().cloned().collect()
    }

    /// Saved maps ordered by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SavedMapDetails)> {
        self.maps.iter().map(|(name, details)| (name.as_str(), details))
    }

    /// Insert or replace the details of a map and persist
    ///
    /// On a failed write the in-memory set is left untouched.
    pub fn set_details(&mut self, name: &str, details: SavedMapDetails) -> Result<()> {
        let mut maps = self.maps.clone();
        maps.insert(name.to_string(), details);
        self.commit(maps)
    }

    /// Remove a map's record and persist; `None` when it was not saved
    pub fn remove(&mut self, name: &str) -> Result<Option<SavedMapDetails>> {
        let mut maps = self.maps.clone();
        let removed = maps.remove(name);
        if removed.is_some() {
            self.commit(maps)?;
        }
        Ok(removed)
    }

    /// Rename a saved map.
    ///
    /// Returns false, without touching the file, when `new_name` is empty,
    /// equals `old_name`, or `old_name` is not saved.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<bool> {
        if new_name.is_empty() || old_name == new_name {
            return Ok(false);
        }
        let mut maps = self.maps.clone();
        let Some(details) = maps.remove(old_name) else {
            return Ok(false);
        };
        maps.insert(new_name.to_string(), details);
        self.commit(maps)?;
        Ok(true)
    }
}

fn write_maps(path: &Path, maps: &BTreeMap<String, SavedMapDetails>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CoreError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let content = serde_json::to_string_pretty(maps).map_err(|source| CoreError::JsonSerialize {
        message: "saved maps".to_string(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|source| CoreError::FileWrite {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| CoreError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}
