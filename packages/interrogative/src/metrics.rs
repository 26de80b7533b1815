//! Session counters, served at `/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub active_connections: AtomicU64,
    pub total_connections: AtomicU64,

    /// Envelopes published on behalf of viewers
    pub messages_received: AtomicU64,
    /// Envelopes written to viewer sockets
    pub messages_sent: AtomicU64,
    /// Inbound frames that were not valid envelopes
    pub messages_dropped: AtomicU64,

    pub file_writes: AtomicU64,
    pub file_reloads: AtomicU64,
    /// External change notifications ignored because a save was in flight
    pub suppressed_reloads: AtomicU64,

    pub terminal_spawns: AtomicU64,
    pub git_renders: AtomicU64,

    start_time: Option<Instant>,
}

impl SessionMetrics {
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

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: load(&self.active_connections),
                total: load(&self.total_connections),
            },
            messages: MessageMetrics {
                received: load(&self.messages_received),
                sent: load(&self.messages_sent),
                dropped: load(&self.messages_dropped),
            },
            files: FileMetrics {
                writes: load(&self.file_writes),
                reloads: load(&self.file_reloads),
                suppressed_reloads: load(&self.suppressed_reloads),
            },
            terminal_spawns: load(&self.terminal_spawns),
            git_renders: load(&self.git_renders),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub files: FileMetrics,
    pub terminal_spawns: u64,
    pub git_renders: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetrics {
    pub writes: u64,
    pub reloads: u64,
    pub suppressed_reloads: u64,
}
