//! The publish/subscribe bus that channels publish onto.
//!
//! The bridge only depends on the two traits defined here:
//!
//! * [`Bus`] – hands out one [`ChannelHandle`] per registered channel.
//! * [`ChannelHandle`] – fire-and-forget publishing of a decoded [`Message`].
//!
//! [`EventBus`] is the in-process implementation.  It uses a
//! [`tokio::sync::broadcast`] channel under the hood so that every subscriber
//! receives every event without any single subscriber blocking the others.

use std::sync::Arc;

use chrono::Utc;
use sockbridge_types::{BridgeError, Event, Message};
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// The external transport the bridge publishes onto.
pub trait Bus: Send + Sync {
    /// Register an output channel named `channel` carrying `schema` messages.
    ///
    /// Called at most once per channel name by the
    /// [`ChannelRegistry`][crate::channels::ChannelRegistry].
    fn register(&self, channel: &str, schema: &str) -> Result<Arc<dyn ChannelHandle>, BridgeError>;
}

/// A live output channel obtained from a [`Bus`].
pub trait ChannelHandle: Send + Sync {
    /// Publish `message`.  There is no acknowledgment and no backpressure
    /// signal back to the caller.
    fn publish(&self, message: Message);
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (a restriction of Tokio broadcast
    /// channels).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every event published on any channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe and return a [`ChannelSubscriber`] that only yields events
    /// whose channel name starts with `prefix`.
    pub fn subscribe_channel(&self, prefix: impl Into<String>) -> ChannelSubscriber {
        ChannelSubscriber {
            prefix: prefix.into(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus for EventBus {
    fn register(&self, channel: &str, schema: &str) -> Result<Arc<dyn ChannelHandle>, BridgeError> {
        Ok(Arc::new(BusPublisher {
            channel: channel.to_string(),
            schema: schema.to_string(),
            source: format!("sockbridge::{channel}"),
            sender: self.sender.clone(),
        }))
    }
}

/// [`ChannelHandle`] returned by [`EventBus::register`].
///
/// Wraps each message in an [`Event`] stamped with a fresh id and the current
/// UTC time.
#[derive(Debug)]
pub struct BusPublisher {
    channel: String,
    schema: String,
    source: String,
    sender: broadcast::Sender<Event>,
}

impl BusPublisher {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl ChannelHandle for BusPublisher {
    fn publish(&self, message: Message) {
        let event = Event {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: self.source.clone(),
            channel: self.channel.clone(),
            schema: self.schema.clone(),
            payload: message,
        };
        // A send error only means nobody is listening right now.
        if let Ok(receivers) = self.sender.send(event) {
            trace!(channel = %self.channel, receivers, "event published");
        } else {
            trace!(channel = %self.channel, "event published with no subscribers");
        }
    }
}

/// A subscriber that only delivers events whose channel name starts with the
/// given prefix.
pub struct ChannelSubscriber {
    prefix: String,
    receiver: broadcast::Receiver<Event>,
}

impl ChannelSubscriber {
    /// Wait for the next event that matches this subscriber's prefix.
    ///
    /// Returns `None` when the bus is closed and no further events will arrive.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.channel.starts_with(&self.prefix) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Subscriber fell behind; log and continue.
                    warn!(prefix = %self.prefix, lagged_by = n, "ChannelSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
