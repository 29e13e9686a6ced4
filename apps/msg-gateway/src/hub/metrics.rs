//! Gateway counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

/// Metrics seam consumed by the fanout engine.
pub trait PushMetrics: Send + Sync {
    fn inc_push_success(&self);
}

/// Monotonic counters shared by the hub and the transport front door.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    push_success: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    kicks: AtomicU64,
    superseded: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_kicked(&self) {
        self.kicks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_success(&self) -> u64 {
        self.push_success.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            push_success: self.push_success.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            kicks: self.kicks.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }
}

impl PushMetrics for GatewayMetrics {
    fn inc_push_success(&self) {
        self.push_success.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    /// Online deliveries that reached a push-eligible terminal.
    pub push_success: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    /// Sessions closed by administrative kick.
    pub kicks: u64,
    /// Sessions closed because a conflicting login took over.
    pub superseded: u64,
}
