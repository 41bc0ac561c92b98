//! WebSocket surface.
//!
//! Three endpoints, one per concern:
//! - `/transport` multiplexes logical sockets for one client port
//! - `/status` carries status heartbeats to the notifier
//! - `/notifications` streams rendered notification actions back out

mod notifications;
mod status;
mod transport;

// Re-export the upgrade handlers for route registration
pub use notifications::notifications_handler;
pub use status::status_handler;
pub use transport::transport_handler;
