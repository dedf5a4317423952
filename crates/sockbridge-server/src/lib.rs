//! `sockbridge-server` – the socket side of the bridge.
//!
//! Accepts TCP clients speaking a line-based text protocol and turns their
//! requests into channel creations and publications on the bus.
//!
//! # Modules
//!
//! - [`codec`] – request parsing ([`decode_frame`]), reply rendering and the
//!   [`ProtocolCodec`] line framing.
//! - [`handler`] – [`Dispatcher`] and the per-connection
//!   [`serve_connection`] loop.
//! - [`server`] – [`BridgeServer`], the accept loop with graceful shutdown.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sockbridge_middleware::EventBus;
//! use sockbridge_server::{BridgeServer, Dispatcher};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(EventBus::default())));
//!     BridgeServer::bind("0.0.0.0:9000", dispatcher)
//!         .await
//!         .expect("bind failed")
//!         .run(CancellationToken::new())
//!         .await
//!         .expect("server failed");
//! }
//! ```

pub mod codec;
pub mod handler;
pub mod server;

pub use codec::{Command, DEFAULT_MAX_FRAME_LEN, ProtocolCodec, decode_frame, encode_command, encode_reply};
pub use handler::{Dispatcher, serve_connection};
pub use server::BridgeServer;
