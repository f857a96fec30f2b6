//! Engine event bus
//!
//! The scheduler and the outbound queue report every delivery outcome on an
//! in-process broadcast channel. Observers (status pages, tests, log
//! shippers) subscribe; emitting never blocks and events are dropped when
//! nobody listens.
//!
//! ```no_run
//! use librelaycast::events::{EngineEvent, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(EngineEvent::ContentPosted { content_id: "abc".to_string(), attempts: 1 });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<EngineEvent>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers
    pub fn emit(&self, event: EngineEvent) {
        // Err only means there are no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Delivery outcomes reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ContentPosted {
        content_id: String,
        attempts: u32,
    },
    ContentRetryScheduled {
        content_id: String,
        attempts: u32,
        next_attempt: DateTime<Utc>,
        error: String,
    },
    ContentFailed {
        content_id: String,
        attempts: u32,
        error: String,
    },
    /// Owning campaign is paused; the item stays pending
    ContentSkipped {
        content_id: String,
        campaign_id: String,
    },
    ForwardQueued {
        route_id: String,
        queue_len: usize,
    },
    ForwardDelivered {
        route_id: String,
    },
    ForwardFailed {
        route_id: String,
        error: String,
    },
    /// Queue was full and the forward was discarded
    ForwardDropped {
        route_id: String,
    },
}
