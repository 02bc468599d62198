//! Per-property event fan-out over tokio broadcast channels. Subscribers
//! that lag past the channel capacity lose the oldest events (tokio's
//! `Lagged` error) rather than stalling the writer.

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, PropertyId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<PropertyId, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, property_id: PropertyId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(property_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send to the property's channel if anyone is listening. A send with no
    /// receivers is not an error.
    pub fn send(&self, property_id: PropertyId, event: &Event) {
        if let Some(tx) = self.channels.get(&property_id) {
            let _ = tx.send(event.clone());
        }
    }

    /// Drop the channel when its property goes away. Live receivers see
    /// `Closed` on their next recv.
    pub fn remove(&self, property_id: &PropertyId) {
        self.channels.remove(property_id);
    }
}
