//! Server metrics for observability
//!
//! Runtime counters for monitoring relay health.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Hub-wide metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    /// Inbound envelopes received from clients
    pub envelopes_received: AtomicU64,
    /// Broadcast events delivered to member queues
    pub broadcasts_delivered: AtomicU64,
    /// Broadcast events dropped (member queue full or gone)
    pub broadcasts_dropped: AtomicU64,

    /// Failed auth handshakes (bad key, missing beam, lookup timeout)
    pub auth_failures: AtomicU64,
    /// Clipboard payloads durably captured
    pub notes_persisted: AtomicU64,
    /// Clipboard persistence failures (logged, non-fatal)
    pub persist_failures: AtomicU64,
    /// Uptime second of the most recent persist failure, offset by 1
    /// (0 = never failed)
    last_persist_failure: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn envelope_received(&self) {
        self.envelopes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_delivered(&self) {
        self.broadcasts_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_dropped(&self) {
        self.broadcasts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_persisted(&self) {
        self.notes_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persist_failed(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
        self.last_persist_failure
            .store(self.uptime_secs() + 1, Ordering::Relaxed);
    }

    /// Whether a persist failure landed within the trailing window.
    /// The failure counter is monotonic, so health uses recency: one
    /// transient failure must not mark the server degraded forever.
    pub fn persist_failed_recently(&self, window_secs: u64) -> bool {
        match self.last_persist_failure.load(Ordering::Relaxed) {
            0 => false,
            at => self.uptime_secs().saturating_sub(at - 1) < window_secs,
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            envelopes: EnvelopeMetrics {
                received: self.envelopes_received.load(Ordering::Relaxed),
                broadcasts_delivered: self.broadcasts_delivered.load(Ordering::Relaxed),
                broadcasts_dropped: self.broadcasts_dropped.load(Ordering::Relaxed),
            },
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            notes: NoteMetrics {
                persisted: self.notes_persisted.load(Ordering::Relaxed),
                failed: self.persist_failures.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub envelopes: EnvelopeMetrics,
    pub auth_failures: u64,
    pub notes: NoteMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetrics {
    pub received: u64,
    pub broadcasts_delivered: u64,
    pub broadcasts_dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteMetrics {
    pub persisted: u64,
    pub failed: u64,
}

/// Health status summary for the /health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub uptime_secs: u64,
}
