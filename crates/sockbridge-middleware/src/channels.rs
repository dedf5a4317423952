//! [`ChannelRegistry`] – the set of output channels created by clients.
//!
//! Each channel name maps to exactly one [`ChannelHandle`] obtained from the
//! [`Bus`].  Creation is idempotent: the existence check, the bus
//! registration and the insert happen under one lock, so concurrent
//! creations of the same name produce a single bus registration and a
//! single success.  Channels are never updated or removed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sockbridge_types::BridgeError;
use tracing::info;

use crate::bus::{Bus, ChannelHandle};

/// A named publish endpoint bound to one schema.
struct Channel {
    schema: String,
    handle: Arc<dyn ChannelHandle>,
}

/// Registry of live channels, shared by every connection.
pub struct ChannelRegistry {
    bus: Arc<dyn Bus>,
    channels: Mutex<HashMap<String, Channel>>,
}

impl ChannelRegistry {
    /// Create an empty registry that registers new channels on `bus`.
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Create channel `name` carrying `schema` messages.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::PublisherAlreadyExists`] when `name` is taken.  The
    ///   bus is not contacted in that case.
    /// * Whatever [`Bus::register`] returns; nothing is inserted then.
    pub fn create(&self, name: &str, schema: &str) -> Result<(), BridgeError> {
        let mut channels = self.lock();
        if channels.contains_key(name) {
            return Err(BridgeError::PublisherAlreadyExists(name.to_string()));
        }
        let handle = self.bus.register(name, schema)?;
        channels.insert(
            name.to_string(),
            Channel {
                schema: schema.to_string(),
                handle,
            },
        );
        info!(channel = %name, schema = %schema, "channel created");
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// The handle for `name`, cloned out so publishing happens without
    /// holding the registry lock.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelHandle>> {
        self.lock().get(name).map(|c| Arc::clone(&c.handle))
    }

    /// The schema `name` was created with.
    pub fn schema_of(&self, name: &str) -> Option<String> {
        self.lock().get(name).map(|c| c.schema.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The map only changes through a single `insert`, so a guard poisoned by a
    // panicking bus still protects a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
