//! `sockbridge-middleware` – channels, schemas and the bus behind them.
//!
//! Routes decoded messages from socket clients onto the publish/subscribe
//! bus without caring how the bus delivers them.
//!
//! # Modules
//!
//! - [`bus`] – the [`Bus`]/[`ChannelHandle`] seam plus [`EventBus`], an
//!   in-process implementation built on Tokio broadcast channels.
//! - [`schema`] – [`SchemaRegistry`]: schema name to typed message decoder.
//! - [`channels`] – [`ChannelRegistry`]: channel name to bus handle, with
//!   atomic create-once semantics.

pub mod bus;
pub mod channels;
pub mod schema;

pub use bus::{Bus, BusPublisher, ChannelHandle, ChannelSubscriber, EventBus};
pub use channels::ChannelRegistry;
pub use schema::{DecodeError, SchemaDef, SchemaRegistry};
