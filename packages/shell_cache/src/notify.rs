//! Status notification heartbeat.
//!
//! At most one live status notification exists, driven by whichever client
//! is actively reporting. Clients can be killed or evicted without running
//! any cleanup, so liveness is inferred: every status update stamps a
//! heartbeat, and the notification is retracted once the heartbeat goes
//! stale. Two timers watch for that, both on the same 2000 ms timeout: a
//! one-shot for prompt retraction at the deadline, and a repeating sweep
//! that catches a one-shot missed while the process was suspended.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::error::ShellCacheError;

/// Staleness deadline and sweep period.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(2000);

const COMMAND_BUFFER: usize = 64;

/// Inbound status channel messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatusMessage {
    /// Full status report from the active client.
    #[serde(rename = "statusUpdate")]
    Update {
        #[serde(default)]
        enabled: bool,
        #[serde(default)]
        title: String,
        #[serde(default)]
        body: String,
    },

    /// Legacy keep-alive: refreshes the heartbeat of an active status but
    /// cannot activate one by itself.
    #[serde(rename = "notification-heartbeat")]
    Heartbeat,
}

/// Where notifications get rendered. Every call is best-effort: the
/// notifier logs failures and moves on.
pub trait NotificationSink: Send + 'static {
    fn show(&self, title: &str, body: &str) -> Result<(), ShellCacheError>;
    fn close(&self) -> Result<(), ShellCacheError>;
    /// Focus an existing client window or open a new one at the
    /// application root.
    fn focus(&self) -> Result<(), ShellCacheError>;
}

enum NotifyMsg {
    Status(StatusMessage),
    Click,
    Sweep,
    ClientAttached,
    ClientDetached,
}

/// Cloneable front door to the notifier task.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<NotifyMsg>,
}

impl NotifierHandle {
    pub async fn status(&self, message: StatusMessage) -> Result<(), ShellCacheError> {
        self.send(NotifyMsg::Status(message)).await
    }

    /// A notification surface reported a click.
    pub async fn click(&self) -> Result<(), ShellCacheError> {
        self.send(NotifyMsg::Click).await
    }

    /// Run one activation sweep: retract the status if it is stale or if no
    /// visible clients remain.
    pub async fn sweep(&self) -> Result<(), ShellCacheError> {
        self.send(NotifyMsg::Sweep).await
    }

    pub async fn client_attached(&self) -> Result<(), ShellCacheError> {
        self.send(NotifyMsg::ClientAttached).await
    }

    pub async fn client_detached(&self) -> Result<(), ShellCacheError> {
        self.send(NotifyMsg::ClientDetached).await
    }

    async fn send(&self, msg: NotifyMsg) -> Result<(), ShellCacheError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ShellCacheError::NotifierClosed)
    }
}

struct Desired {
    title: String,
    body: String,
}

pub struct StatusNotifier<S> {
    sink: S,
    rx: mpsc::Receiver<NotifyMsg>,
    desired: Option<Desired>,
    heartbeat_at: Option<Instant>,
    rendered_fingerprint: Option<[u8; 32]>,
    deadline: Option<Instant>,
    sweep: time::Interval,
    visible_clients: usize,
}

impl<S: NotificationSink> StatusNotifier<S> {
    /// Spawn the notifier task and return its handle.
    pub fn spawn(sink: S) -> NotifierHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let notifier = StatusNotifier {
            sink,
            rx,
            desired: None,
            heartbeat_at: None,
            rendered_fingerprint: None,
            deadline: None,
            sweep: time::interval(HEARTBEAT_TIMEOUT),
            visible_clients: 0,
        };
        tokio::spawn(notifier.run());
        NotifierHandle { tx }
    }

    async fn run(mut self) {
        loop {
            // Both timers exist only while a status is active; armed state
            // is carried by `deadline` and the desired status itself.
            let deadline = self.deadline.unwrap_or_else(far_future);
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                _ = time::sleep_until(deadline), if self.deadline.is_some() => {
                    self.deadline = None;
                    self.staleness_check();
                }
                _ = self.sweep.tick(), if self.desired.is_some() => self.staleness_check(),
            }
        }
        debug!("notifier task stopped");
    }

    fn handle(&mut self, msg: NotifyMsg) {
        match msg {
            NotifyMsg::Status(StatusMessage::Update {
                enabled: true,
                title,
                body,
            }) => self.activate_status(title, body),
            NotifyMsg::Status(StatusMessage::Update { enabled: false, .. }) => {
                self.clear("status disabled")
            }
            NotifyMsg::Status(StatusMessage::Heartbeat) => {
                // Keep-alive only: a heartbeat cannot activate a status.
                if self.desired.is_some() {
                    self.arm();
                }
            }
            NotifyMsg::Click => {
                if let Err(err) = self.sink.close() {
                    debug!(error = %err, "notification close failed");
                }
                if let Err(err) = self.sink.focus() {
                    debug!(error = %err, "client focus failed");
                }
            }
            NotifyMsg::Sweep => {
                if self.desired.is_some() && self.visible_clients == 0 {
                    self.clear("no visible clients");
                } else {
                    self.staleness_check();
                }
            }
            NotifyMsg::ClientAttached => self.visible_clients += 1,
            NotifyMsg::ClientDetached => {
                self.visible_clients = self.visible_clients.saturating_sub(1)
            }
        }
    }

    fn activate_status(&mut self, title: String, body: String) {
        let fingerprint = fingerprint(&title, &body);
        self.arm();
        let changed = self.rendered_fingerprint != Some(fingerprint);
        self.desired = Some(Desired { title, body });

        if changed {
            if let Some(desired) = &self.desired {
                if let Err(err) = self.sink.show(&desired.title, &desired.body) {
                    warn!(error = %err, "notification render failed");
                }
            }
            self.rendered_fingerprint = Some(fingerprint);
        }
    }

    fn clear(&mut self, reason: &str) {
        let was_active = self.desired.take().is_some();
        let had_render = self.rendered_fingerprint.take().is_some();
        self.heartbeat_at = None;
        self.deadline = None;

        if was_active || had_render {
            debug!(reason, "status cleared");
            // Best-effort retraction; the next activation re-renders from a
            // clean fingerprint either way.
            if let Err(err) = self.sink.close() {
                debug!(error = %err, "notification close failed");
            }
        }
    }

    /// Stamp the heartbeat and (re)arm both timers.
    fn arm(&mut self) {
        let now = Instant::now();
        self.heartbeat_at = Some(now);
        self.deadline = Some(now + HEARTBEAT_TIMEOUT);
        self.sweep.reset();
    }

    fn staleness_check(&mut self) {
        if self.desired.is_none() {
            return;
        }
        let stale = self
            .heartbeat_at
            .is_none_or(|at| at.elapsed() >= HEARTBEAT_TIMEOUT);
        if stale {
            self.clear("heartbeat stale");
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

/// Digest of the rendered content, used to suppress redundant re-renders.
fn fingerprint(title: &str, body: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    hasher.finalize().into()
}
