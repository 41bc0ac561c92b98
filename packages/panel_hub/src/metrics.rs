//! Hub metrics for observability.
//!
//! Runtime counters for the HTTP/WebSocket surface. The transport and
//! cache libraries keep their own counters and contribute snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shell_cache::CacheStatsSnapshot;
use socket_mux::MuxStatsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Hub-wide connection and frame counters.
#[derive(Debug)]
pub struct HubMetrics {
    // Connection metrics
    /// Currently attached transport ports.
    pub transport_connections: AtomicU64,
    /// Transport connections since hub start.
    pub transport_connections_total: AtomicU64,
    /// Currently connected status clients.
    pub status_connections: AtomicU64,
    /// Currently subscribed notification watchers.
    pub notification_watchers: AtomicU64,

    // Frame metrics
    /// Inbound WebSocket text frames.
    pub frames_received: AtomicU64,
    /// Inbound frames that failed to parse and were dropped.
    pub frames_malformed: AtomicU64,

    /// Hub start time (for uptime calculation)
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            transport_connections: AtomicU64::new(0),
            transport_connections_total: AtomicU64::new(0),
            status_connections: AtomicU64::new(0),
            notification_watchers: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_malformed: AtomicU64::new(0),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    // Connection tracking
    pub fn transport_opened(&self) {
        self.transport_connections.fetch_add(1, Ordering::Relaxed);
        self.transport_connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transport_closed(&self) {
        self.transport_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn status_opened(&self) {
        self.status_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_closed(&self) {
        self.status_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn watcher_opened(&self) {
        self.notification_watchers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watcher_closed(&self) {
        self.notification_watchers.fetch_sub(1, Ordering::Relaxed);
    }

    // Frame tracking
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Create a snapshot of all metrics, folding in the library counters.
    pub fn snapshot(
        &self,
        transport: MuxStatsSnapshot,
        cache: CacheStatsSnapshot,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                transport_active: self.transport_connections.load(Ordering::Relaxed),
                transport_total: self.transport_connections_total.load(Ordering::Relaxed),
                status_active: self.status_connections.load(Ordering::Relaxed),
                notification_watchers: self.notification_watchers.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                malformed: self.frames_malformed.load(Ordering::Relaxed),
            },
            transport,
            cache,
        }
    }
}

/// Serializable snapshot of all hub metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub frames: FrameMetrics,
    pub transport: MuxStatsSnapshot,
    pub cache: CacheStatsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub transport_active: u64,
    pub transport_total: u64,
    pub status_active: u64,
    pub notification_watchers: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub malformed: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub started_at: String,
    pub uptime_secs: u64,
    pub ports: PortHealth,
    pub sockets: SocketHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortHealth {
    pub active: u64,
    pub attached: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketHealth {
    pub active: u64,
    pub opened: u64,
}
