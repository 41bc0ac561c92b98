/// Errors surfaced by the multiplexer handle.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The multiplexer task has shut down and no longer accepts messages.
    #[error("multiplexer is shut down")]
    Closed,
}

/// A logical socket could not be constructed.
///
/// Construction failures never propagate to the requesting port as errors;
/// the multiplexer converts them into an `error` event followed by a
/// `close(1006)` event on the port's channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),

    #[error("invalid subprotocol list: {0}")]
    InvalidProtocols(String),
}

/// The connection task behind a socket handle is gone.
#[derive(Debug, thiserror::Error)]
#[error("connection task is gone")]
pub struct SocketGone;
