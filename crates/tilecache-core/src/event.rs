//! Cache change notifications
//!
//! The map UI and the download pipeline subscribe here to learn about
//! stored tiles, deleted or renamed maps and cleared caches.

use tokio::sync::broadcast;
use tracing::trace;

/// Buffered events per subscriber before slow receivers start lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the cache layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A tile was written for a map
    TileStored { map_name: String },
    /// All tiles of a map were removed
    MapDeleted { map_name: String, tiles_removed: usize },
    /// Deleting a map's tiles failed; the map is left as it was
    MapDeleteFailed { map_name: String, reason: String },
    /// A map and its tiles were renamed
    MapRenamed { from: String, to: String },
    /// A map download completed and was recorded
    MapSaved { map_name: String },
    /// Every cached tile was removed
    CacheCleared { tiles_removed: usize },
}

impl CacheEvent {
    /// Map the event concerns, if it is about a single map
    pub fn map_name(&self) -> Option<&str> {
        match self {
            CacheEvent::TileStored { map_name }
            | CacheEvent::MapDeleted { map_name, .. }
            | CacheEvent::MapDeleteFailed { map_name, .. }
            | CacheEvent::MapSaved { map_name } => Some(map_name),
            CacheEvent::MapRenamed { to, .. } => Some(to),
            CacheEvent::CacheCleared { .. } => None,
        }
    }
}

/// Fan-out of `CacheEvent`s to any number of receivers
///
/// Clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Bus with room for `DEFAULT_EVENT_CAPACITY` events
    pub fn default_capacity() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }

    /// Deliver an event; returns how many receivers got it
    ///
    /// Nobody listening is normal (the CLI never subscribes) and yields 0.
    pub fn publish(&self, event: CacheEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(?event, "No cache event subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}
