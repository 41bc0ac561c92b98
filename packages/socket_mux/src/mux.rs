//! The multiplexer actor.
//!
//! One task owns the port and socket registries and drains two queues:
//! port commands and connection updates. Each handler runs to completion
//! before the next message is taken, so commands from one port apply in
//! send order and the registries need no locks. Failures surface as events
//! on the originating port's channel; a malformed or unlucky message never
//! disturbs another port.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::connector::{SocketConnector, SocketHandle, SocketUpdate};
use crate::error::MuxError;
use crate::protocol::{
    CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL, PortCommand, PortEvent, REASON_ABNORMAL,
    REASON_PAUSED, REASON_REPLACED, SocketEvent, normalize_protocols,
};

/// Identifier of one attached port. Assigned from a counter that starts at
/// 1 and increments for the lifetime of the process; ids are never reused.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Registry key of one logical socket: the owning port plus the
/// caller-supplied id, which only has to be unique within that port.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SocketKey {
    pub port: PortId,
    pub id: String,
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.id)
    }
}

/// Counters for multiplexer activity and delivery drops.
#[derive(Debug, Default)]
pub struct MuxStats {
    /// Ports ever attached.
    pub ports_attached: AtomicU64,
    /// Ports currently attached.
    pub ports_active: AtomicU64,
    /// Sockets ever successfully constructed.
    pub sockets_opened: AtomicU64,
    /// Sockets currently registered.
    pub sockets_active: AtomicU64,
    /// Events delivered to port channels.
    pub events_delivered: AtomicU64,
    /// Events dropped because a port was full or gone.
    pub events_dropped: AtomicU64,
}

impl MuxStats {
    fn record_port_attached(&self) {
        self.ports_attached.fetch_add(1, Ordering::Relaxed);
        self.ports_active.fetch_add(1, Ordering::Relaxed);
    }

    fn record_port_closed(&self) {
        self.ports_active.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_socket_opened(&self) {
        self.sockets_opened.fetch_add(1, Ordering::Relaxed);
        self.sockets_active.fetch_add(1, Ordering::Relaxed);
    }

    fn record_socket_closed(&self) {
        self.sockets_active.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MuxStatsSnapshot {
        MuxStatsSnapshot {
            ports_attached: self.ports_attached.load(Ordering::Relaxed),
            ports_active: self.ports_active.load(Ordering::Relaxed),
            sockets_opened: self.sockets_opened.load(Ordering::Relaxed),
            sockets_active: self.sockets_active.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of multiplexer counters (for serialization/logging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxStatsSnapshot {
    pub ports_attached: u64,
    pub ports_active: u64,
    pub sockets_opened: u64,
    pub sockets_active: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
}

/// A freshly attached port: its assigned id plus the event stream its
/// owner must drain.
#[derive(Debug)]
pub struct PortConnection {
    pub port_id: PortId,
    pub events: mpsc::Receiver<PortEvent>,
}

enum MuxMsg {
    Attach { reply: oneshot::Sender<PortConnection> },
    Command { port: PortId, command: PortCommand },
    Detach { port: PortId },
}

/// Cloneable front door to the multiplexer task.
#[derive(Clone)]
pub struct MuxHandle {
    tx: mpsc::Sender<MuxMsg>,
    stats: Arc<MuxStats>,
}

impl MuxHandle {
    /// Attach a new port and receive its id plus event stream.
    pub async fn attach(&self) -> Result<PortConnection, MuxError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MuxMsg::Attach { reply: reply_tx })
            .await
            .map_err(|_| MuxError::Closed)?;
        reply_rx.await.map_err(|_| MuxError::Closed)
    }

    /// Apply one command on behalf of a port. Commands from the same caller
    /// are applied in send order.
    pub async fn command(&self, port: PortId, command: PortCommand) -> Result<(), MuxError> {
        self.tx
            .send(MuxMsg::Command { port, command })
            .await
            .map_err(|_| MuxError::Closed)
    }

    /// Tear a port down the same way `transport-port-close` does. Used when
    /// the underlying client connection goes away without saying goodbye.
    pub async fn detach(&self, port: PortId) -> Result<(), MuxError> {
        self.tx
            .send(MuxMsg::Detach { port })
            .await
            .map_err(|_| MuxError::Closed)
    }

    pub fn stats(&self) -> Arc<MuxStats> {
        self.stats.clone()
    }
}

struct PortState {
    paused: bool,
    events: mpsc::Sender<PortEvent>,
}

struct SocketEntry {
    generation: u64,
    handle: SocketHandle,
}

const COMMAND_BUFFER: usize = 64;
const UPDATE_BUFFER: usize = 256;
/// Events queued per port before delivery drops kick in.
const PORT_EVENT_BUFFER: usize = 100;

pub struct Multiplexer<C> {
    connector: C,
    commands: mpsc::Receiver<MuxMsg>,
    updates_tx: mpsc::Sender<SocketUpdate>,
    updates: mpsc::Receiver<SocketUpdate>,
    ports: HashMap<PortId, PortState>,
    sockets: HashMap<SocketKey, SocketEntry>,
    next_port_id: u64,
    next_generation: u64,
    stats: Arc<MuxStats>,
}

impl<C: SocketConnector> Multiplexer<C> {
    /// Spawn the multiplexer task and return its handle.
    pub fn spawn(connector: C) -> MuxHandle {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (updates_tx, updates) = mpsc::channel(UPDATE_BUFFER);
        let stats = Arc::new(MuxStats::default());

        let mux = Multiplexer {
            connector,
            commands,
            updates_tx,
            updates,
            ports: HashMap::new(),
            sockets: HashMap::new(),
            next_port_id: 1,
            next_generation: 1,
            stats: stats.clone(),
        };
        tokio::spawn(mux.run());

        MuxHandle { tx, stats }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.commands.recv() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    None => break,
                },
                Some(update) = self.updates.recv() => self.handle_update(update),
            }
        }
        debug!("multiplexer task stopped");
    }

    fn handle_msg(&mut self, msg: MuxMsg) {
        match msg {
            MuxMsg::Attach { reply } => {
                let port_id = PortId(self.next_port_id);
                self.next_port_id += 1;

                let (events_tx, events_rx) = mpsc::channel(PORT_EVENT_BUFFER);
                match reply.send(PortConnection {
                    port_id,
                    events: events_rx,
                }) {
                    Ok(()) => {
                        self.ports.insert(
                            port_id,
                            PortState {
                                paused: false,
                                events: events_tx,
                            },
                        );
                        self.stats.record_port_attached();
                        debug!(%port_id, "port attached");
                    }
                    // The id is still consumed: the counter never reuses.
                    Err(_) => debug!(%port_id, "caller vanished before attach completed"),
                }
            }
            MuxMsg::Command { port, command } => self.dispatch(port, command),
            MuxMsg::Detach { port } => self.close_port(port),
        }
    }

    /// Apply one port command. Every failure path reports through events on
    /// the port's own channel; nothing escapes as an error.
    fn dispatch(&mut self, port: PortId, command: PortCommand) {
        if !self.ports.contains_key(&port) {
            debug!(%port, "command for unknown port dropped");
            return;
        }

        match command {
            PortCommand::Init => self.deliver(port, PortEvent::Ack { port_id: port.0 }),
            PortCommand::Open { id, url, protocols } => {
                self.open(port, &id, &url, protocols.as_ref())
            }
            PortCommand::Send { id, data } => self.send(port, &id, data),
            PortCommand::Close { id, code, reason } => self.close(port, &id, code, reason),
            PortCommand::Pause { reason } => self.pause(port, reason),
            PortCommand::Resume => self.resume(port),
            PortCommand::PortClose => self.close_port(port),
        }
    }

    fn open(&mut self, port: PortId, id: &str, url: &str, protocols: Option<&Value>) {
        let id = id.trim();
        let url = url.trim();
        if id.is_empty() || url.is_empty() {
            // Nothing actionable can be reported without an id.
            debug!(%port, "open with blank id or url dropped");
            return;
        }

        if self.ports.get(&port).is_some_and(|p| p.paused) {
            self.deliver_socket(
                port,
                id,
                SocketEvent::closed(CLOSE_GOING_AWAY, REASON_PAUSED, true),
            );
            return;
        }

        let key = SocketKey {
            port,
            id: id.to_string(),
        };

        // At most one live entry per key: the old one goes first, and its
        // close is reported before anything the new socket produces.
        if let Some(previous) = self.sockets.remove(&key) {
            let _ = previous
                .handle
                .close(CLOSE_NORMAL, REASON_REPLACED.to_string());
            previous.handle.abort();
            self.stats.record_socket_closed();
            self.deliver_socket(
                port,
                id,
                SocketEvent::closed(CLOSE_NORMAL, REASON_REPLACED, true),
            );
        }

        let protocols = normalize_protocols(protocols);
        let generation = self.next_generation;
        self.next_generation += 1;

        match self.connector.connect(
            key.clone(),
            generation,
            url,
            &protocols,
            self.updates_tx.clone(),
        ) {
            Ok(handle) => {
                trace!(%key, url, "socket opened");
                self.sockets.insert(key, SocketEntry { generation, handle });
                self.stats.record_socket_opened();
            }
            Err(err) => {
                debug!(%key, error = %err, "socket construction failed");
                self.deliver_socket(
                    port,
                    id,
                    SocketEvent::Error {
                        message: err.to_string(),
                    },
                );
                self.deliver_socket(
                    port,
                    id,
                    SocketEvent::closed(CLOSE_ABNORMAL, REASON_ABNORMAL, false),
                );
            }
        }
    }

    fn send(&mut self, port: PortId, id: &str, data: Value) {
        let key = SocketKey {
            port,
            id: id.to_string(),
        };
        // Sending to an unknown id is a silent no-op.
        let Some(entry) = self.sockets.get(&key) else {
            return;
        };

        if entry.handle.send(data).is_err() {
            // The connection's own close, if one is still coming, fires
            // independently of this report.
            self.deliver_socket(
                port,
                id,
                SocketEvent::Error {
                    message: "send failed: connection is gone".to_string(),
                },
            );
        }
    }

    fn close(&mut self, port: PortId, id: &str, code: Option<u16>, reason: Option<String>) {
        let key = SocketKey {
            port,
            id: id.to_string(),
        };
        let Some(entry) = self.sockets.get(&key) else {
            return;
        };

        let code = code.unwrap_or(CLOSE_NORMAL);
        let reason = reason.unwrap_or_default();
        if entry.handle.close(code, reason).is_err() {
            // Close race: the connection task is already gone, so no close
            // event will ever arrive. Reclaim the entry now.
            self.sockets.remove(&key);
            self.stats.record_socket_closed();
            trace!(%key, "close race, entry reclaimed");
        }
    }

    fn pause(&mut self, port: PortId, reason: Option<String>) {
        if let Some(state) = self.ports.get_mut(&port) {
            state.paused = true;
        }
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| REASON_PAUSED.to_string());
        debug!(%port, %reason, "port paused");
        self.close_sockets_of(port, Some((CLOSE_GOING_AWAY, reason)));
    }

    fn resume(&mut self, port: PortId) {
        if let Some(state) = self.ports.get_mut(&port) {
            state.paused = false;
            debug!(%port, "port resumed");
        }
    }

    /// `transport-port-close` and detach share this path: close every owned
    /// socket, clear paused bookkeeping, forget the port.
    fn close_port(&mut self, port: PortId) {
        self.close_sockets_of(port, None);
        if self.ports.remove(&port).is_some() {
            self.stats.record_port_closed();
            debug!(%port, "port closed");
        }
    }

    /// Force-close and deregister every socket owned by `port`. With
    /// `notify`, a synthesized close event is delivered for each socket;
    /// `None` tears down silently (the port itself is going away).
    fn close_sockets_of(&mut self, port: PortId, notify: Option<(u16, String)>) {
        let keys: Vec<SocketKey> = self
            .sockets
            .keys()
            .filter(|key| key.port == port)
            .cloned()
            .collect();

        for key in keys {
            let Some(entry) = self.sockets.remove(&key) else {
                continue;
            };
            let (code, reason) = notify
                .clone()
                .unwrap_or((CLOSE_GOING_AWAY, "Port closed".to_string()));
            let _ = entry.handle.close(code, reason.clone());
            entry.handle.abort();
            self.stats.record_socket_closed();

            if notify.is_some() {
                self.deliver_socket(port, &key.id, SocketEvent::closed(code, reason, true));
            }
        }
    }

    fn handle_update(&mut self, update: SocketUpdate) {
        let SocketUpdate {
            key,
            generation,
            event,
        } = update;

        // A replaced or force-closed socket's task may still be flushing
        // events; its generation no longer matches, so they die here.
        match self.sockets.get(&key) {
            Some(entry) if entry.generation == generation => {}
            _ => {
                trace!(%key, "stale socket update dropped");
                return;
            }
        }

        if matches!(event, SocketEvent::Close { .. }) {
            self.sockets.remove(&key);
            self.stats.record_socket_closed();
        }

        self.deliver_socket(key.port, &key.id, event);
    }

    fn deliver_socket(&self, port: PortId, id: &str, event: SocketEvent) {
        self.deliver(
            port,
            PortEvent::Socket {
                id: id.to_string(),
                event,
            },
        );
    }

    /// Delivery is wrapped: a vanished or backed-up port drops the event
    /// and bumps a counter, it never fails the actor.
    fn deliver(&self, port: PortId, event: PortEvent) {
        let Some(state) = self.ports.get(&port) else {
            self.stats.record_dropped();
            debug!(%port, "event for vanished port dropped");
            return;
        };

        match state.events.try_send(event) {
            Ok(()) => self.stats.record_delivered(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_dropped();
                warn!(%port, "port event buffer full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.record_dropped();
                debug!(%port, "port receiver gone, event dropped");
            }
        }
    }
}
