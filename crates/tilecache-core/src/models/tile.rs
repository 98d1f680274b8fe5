//! Tile models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a tile in the tile grid at a given zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub zoom: u32,
    pub column: u32,
    pub row: u32,
}

impl TileCoord {
    pub fn new(zoom: u32, column: u32, row: u32) -> Self {
        Self { zoom, column, row }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

/// A cached tile image belonging to one offline map
///
/// Identity is `(coord, map_name)`; the same coordinate may be stored
/// independently under several map names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub coord: TileCoord,
    pub map_name: String,
    /// Encoded image content (typically a `data:` URL)
    pub payload: String,
}

impl Tile {
    pub fn new(coord: TileCoord, map_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            coord,
            map_name: map_name.into(),
            payload: payload.into(),
        }
    }

    /// Payload size in bytes
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_display() {
        assert_eq!(TileCoord::new(8, 316, 661).to_string(), "8/316/661");
    }

    #[test]
    fn test_coord_ordering_is_zoom_first() {
        let mut coords = vec![
            TileCoord::new(9, 0, 0),
            TileCoord::new(8, 5, 1),
            TileCoord::new(8, 5, 0),
        ];
        coords.sort();
        assert_eq!(coords[0], TileCoord::new(8, 5, 0));
        assert_eq!(coords[2], TileCoord::new(9, 0, 0));
    }
}
