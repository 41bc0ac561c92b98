//! Socket Mux - label-keyed WebSocket multiplexing library
//!
//! This crate owns outbound WebSocket connections on behalf of many attached
//! clients ("ports"). Each port names its sockets with its own string ids;
//! commands and socket events cross a single actor, so one registry serves
//! everyone without locks and a port can never observe another port's
//! traffic.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use socket_mux::{Multiplexer, PortCommand, WsConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mux = Multiplexer::spawn(WsConnector);
//!
//!     let mut port = mux.attach().await.unwrap();
//!     mux.command(
//!         port.port_id,
//!         PortCommand::Open {
//!             id: "chat".to_string(),
//!             url: "wss://example.com/api".to_string(),
//!             protocols: Some(json!(["graphql-ws"])),
//!         },
//!     )
//!     .await
//!     .unwrap();
//!
//!     while let Some(event) = port.events.recv().await {
//!         println!("event: {:?}", event);
//!     }
//! }
//! ```

mod connector;
mod error;
mod mux;
pub mod protocol;

pub use connector::{OutboundFrame, SocketConnector, SocketHandle, SocketUpdate, WsConnector};
pub use error::{ConnectError, MuxError, SocketGone};
pub use mux::{
    Multiplexer, MuxHandle, MuxStats, MuxStatsSnapshot, PortConnection, PortId, SocketKey,
};
pub use protocol::{PortCommand, PortEvent, SocketEvent};
