//! Outbound connection construction.
//!
//! The multiplexer never dials anything itself; it goes through a
//! [`SocketConnector`]. Production uses [`WsConnector`] (tokio-tungstenite),
//! tests use a scripted fake, and both hand back the same [`SocketHandle`].

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, handshake::client::Request};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ConnectError, SocketGone};
use crate::mux::SocketKey;
use crate::protocol::{CLOSE_ABNORMAL, CLOSE_GOING_AWAY, REASON_ABNORMAL, SocketEvent};

/// Close code reported when the peer's close frame carried no status.
const CLOSE_NO_STATUS: u16 = 1005;

/// An event from a live connection, tagged with the registry key and the
/// generation the connection was created under. The multiplexer drops
/// updates whose generation no longer matches its registry entry, which is
/// what makes deregistration idempotent under races.
#[derive(Debug)]
pub struct SocketUpdate {
    pub key: SocketKey,
    pub generation: u64,
    pub event: SocketEvent,
}

/// Frames the multiplexer pushes toward a connection task.
#[derive(Debug)]
pub enum OutboundFrame {
    /// Payload to transmit. JSON strings are sent as their raw text; any
    /// other JSON value is sent as its serialization.
    Data(Value),
    /// Polite close: send a close frame and wait for the peer's ack.
    Close { code: u16, reason: String },
}

/// The multiplexer's grip on one live connection.
#[derive(Debug)]
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    cancel: CancellationToken,
}

impl SocketHandle {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>, cancel: CancellationToken) -> Self {
        Self { outbound, cancel }
    }

    /// Queue a payload for transmission.
    pub fn send(&self, data: Value) -> Result<(), SocketGone> {
        self.outbound
            .send(OutboundFrame::Data(data))
            .map_err(|_| SocketGone)
    }

    /// Queue a polite close. The connection's own close event fires when the
    /// peer acks (or the mux suppresses it if the entry was deregistered).
    pub fn close(&self, code: u16, reason: String) -> Result<(), SocketGone> {
        self.outbound
            .send(OutboundFrame::Close { code, reason })
            .map_err(|_| SocketGone)
    }

    /// Hard stop: aborts an in-flight dial and tells an established
    /// connection task to bail out after flushing queued frames.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

/// Builds connections on behalf of the multiplexer.
///
/// `connect` must not block: validation happens synchronously (an invalid
/// URL is a construction failure, reported before any I/O), while dialing
/// runs in a background task that reports through `updates`.
pub trait SocketConnector: Send + Sync + 'static {
    fn connect(
        &self,
        key: SocketKey,
        generation: u64,
        url: &str,
        protocols: &[String],
        updates: mpsc::Sender<SocketUpdate>,
    ) -> Result<SocketHandle, ConnectError>;
}

/// Real connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl SocketConnector for WsConnector {
    fn connect(
        &self,
        key: SocketKey,
        generation: u64,
        url: &str,
        protocols: &[String],
        updates: mpsc::Sender<SocketUpdate>,
    ) -> Result<SocketHandle, ConnectError> {
        let mut request = url
            .into_client_request()
            .map_err(|err| ConnectError::InvalidUrl(err.to_string()))?;

        if !protocols.is_empty() {
            let joined = protocols.join(", ");
            let value = HeaderValue::from_str(&joined)
                .map_err(|err| ConnectError::InvalidProtocols(err.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_connection(
            request,
            key,
            generation,
            updates,
            outbound_rx,
            cancel.clone(),
        ));

        Ok(SocketHandle::new(outbound_tx, cancel))
    }
}

/// Drive one physical connection: dial, then pump frames both ways until
/// the peer closes, the multiplexer drops the handle, or the task is
/// cancelled. Every observation is reported as a [`SocketUpdate`]; the
/// multiplexer decides what still matters.
async fn run_connection(
    request: Request,
    key: SocketKey,
    generation: u64,
    updates: mpsc::Sender<SocketUpdate>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    cancel: CancellationToken,
) {
    let push = |event: SocketEvent| {
        let updates = updates.clone();
        let key = key.clone();
        async move {
            let _ = updates.send(SocketUpdate { key, generation, event }).await;
        }
    };

    let stream = tokio::select! {
        _ = cancel.cancelled() => {
            trace!(%key, "dial aborted");
            return;
        }
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((stream, response)) => {
                let header = |name: &str| {
                    response
                        .headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                push(SocketEvent::Open {
                    protocol: header("Sec-WebSocket-Protocol"),
                    extensions: header("Sec-WebSocket-Extensions"),
                })
                .await;
                stream
            }
            Err(err) => {
                debug!(%key, error = %err, "dial failed");
                push(SocketEvent::Error {
                    message: err.to_string(),
                })
                .await;
                push(SocketEvent::closed(CLOSE_ABNORMAL, REASON_ABNORMAL, false)).await;
                return;
            }
        }
    };

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            biased;

            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Data(data)) => {
                    let text = match data {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    if let Err(err) = sink.send(tungstenite::Message::Text(text.into())).await {
                        push(SocketEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    }
                }
                Some(OutboundFrame::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = sink.send(tungstenite::Message::Close(Some(frame))).await;
                    // Keep reading: the peer's ack produces the close event.
                }
                None => {
                    // Handle dropped: the entry was deregistered, nothing
                    // left to report.
                    return;
                }
            },

            _ = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::from(CLOSE_GOING_AWAY),
                    reason: "".into(),
                };
                let _ = sink.send(tungstenite::Message::Close(Some(frame))).await;
                return;
            }

            incoming = source.next() => match incoming {
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    push(SocketEvent::closed(code, reason, true)).await;
                    return;
                }
                Some(Ok(message)) => {
                    if let Some(event) = data_event(message) {
                        push(event).await;
                    }
                }
                Some(Err(err)) => {
                    push(SocketEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                    push(SocketEvent::closed(CLOSE_ABNORMAL, REASON_ABNORMAL, false)).await;
                    return;
                }
                None => {
                    push(SocketEvent::closed(CLOSE_ABNORMAL, REASON_ABNORMAL, false)).await;
                    return;
                }
            },
        }
    }
}

/// Convert an inbound data frame to its relayed event. The payload is an
/// opaque passthrough, so binary frames relay only when their bytes are
/// valid UTF-8; anything else becomes an error event rather than a
/// silently mangled payload. Ping/pong stays with tungstenite.
fn data_event(message: tungstenite::Message) -> Option<SocketEvent> {
    match message {
        tungstenite::Message::Text(text) => Some(SocketEvent::Message {
            data: Value::String(text.to_string()),
        }),
        tungstenite::Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(SocketEvent::Message {
                data: Value::String(text),
            }),
            Err(_) => Some(SocketEvent::Error {
                message: "binary payload is not valid UTF-8".to_string(),
            }),
        },
        _ => None,
    }
}
