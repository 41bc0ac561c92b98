//! Transport wire protocol.
//!
//! Message types exchanged between a client port and the multiplexer. Every
//! command a port may send and every event it may receive is enumerated here;
//! the multiplexer supports exactly this set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normal closure, used when a socket is force-closed because its key was
/// re-opened.
pub const CLOSE_NORMAL: u16 = 1000;
/// Going away, used for paused-port rejections and pause force-closes.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Abnormal closure, used when construction fails or the connection drops
/// without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

pub const REASON_REPLACED: &str = "Replaced";
pub const REASON_PAUSED: &str = "Transport paused";
pub const REASON_ABNORMAL: &str = "abnormal closure";

/// Commands sent FROM a client port TO the multiplexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PortCommand {
    /// Request the port's assigned id; answered with `transport-worker-ack`.
    #[serde(rename = "transport-worker-init")]
    Init,

    /// Open a logical socket under this port.
    ///
    /// `protocols` is accepted as arbitrary JSON because clients historically
    /// sent strings, nulls, or nothing at all; see [`normalize_protocols`].
    #[serde(rename = "transport-ws-open")]
    Open {
        #[serde(default)]
        id: String,
        #[serde(default)]
        url: String,
        #[serde(default)]
        protocols: Option<Value>,
    },

    /// Send a payload on a previously opened socket.
    #[serde(rename = "transport-ws-send")]
    Send {
        #[serde(default)]
        id: String,
        #[serde(default)]
        data: Value,
    },

    /// Close a socket. Code and reason are optional, matching the browser
    /// `WebSocket.close()` signature.
    #[serde(rename = "transport-ws-close")]
    Close {
        #[serde(default)]
        id: String,
        #[serde(default)]
        code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Pause the port: force-close its sockets and reject new opens.
    #[serde(rename = "transport-ws-pause")]
    Pause {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Clear the paused flag. Does not reopen anything.
    #[serde(rename = "transport-ws-resume")]
    Resume,

    /// Tear down the port and every socket it owns.
    #[serde(rename = "transport-port-close")]
    PortClose,
}

/// Events sent FROM the multiplexer TO a client port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PortEvent {
    /// Reply to `transport-worker-init` carrying the port's assigned id.
    #[serde(rename = "transport-worker-ack")]
    Ack {
        #[serde(rename = "portId")]
        port_id: u64,
    },

    /// A lifecycle or data event for one logical socket.
    #[serde(rename = "transport-ws-event")]
    Socket {
        id: String,
        #[serde(flatten)]
        event: SocketEvent,
    },
}

/// The four relayed socket events. Flattened into `transport-ws-event`
/// messages under the `event` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SocketEvent {
    /// Connection established; carries the negotiated subprotocol and
    /// extensions (empty strings when none were negotiated).
    #[serde(rename = "open")]
    Open { protocol: String, extensions: String },

    /// Opaque payload passthrough from the remote endpoint.
    #[serde(rename = "message")]
    Message { data: Value },

    /// Best-effort error description. Never fatal on its own; a `close`
    /// event follows if the connection is actually gone.
    #[serde(rename = "error")]
    Error { message: String },

    /// Connection closed. Synthesized closes (paused, replaced) report
    /// `wasClean: true`; abnormal closures report `false`.
    #[serde(rename = "close")]
    Close {
        code: u16,
        reason: String,
        #[serde(rename = "wasClean")]
        was_clean: bool,
    },
}

impl SocketEvent {
    /// Shorthand for the synthesized close events the multiplexer emits.
    pub fn closed(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        SocketEvent::Close {
            code,
            reason: reason.into(),
            was_clean,
        }
    }
}

/// Normalize a caller-supplied protocol list.
///
/// Anything that is not a JSON array yields an empty list. Array entries are
/// kept only if they are strings with non-empty trimmed content.
pub fn normalize_protocols(protocols: Option<&Value>) -> Vec<String> {
    match protocols {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(|entry| entry.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}
