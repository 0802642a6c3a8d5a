//! Relay metrics for observability
//!
//! Atomic counters updated from the connection and routing paths.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Relay-wide metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Connection metrics
    /// Currently open websocket links
    pub active_connections: AtomicU64,
    /// Total links since server start
    pub total_connections: AtomicU64,

    // Event metrics
    /// Client events decoded
    pub events_received: AtomicU64,
    /// Chat messages committed to the store
    pub messages_persisted: AtomicU64,
    /// `message_ack` events emitted
    pub acks_sent: AtomicU64,

    // Error metrics
    pub persistence_failures: AtomicU64,
    /// Outbound events that could not be queued for a recipient
    pub delivery_failures: AtomicU64,

    // Auth metrics
    pub admin_logins: AtomicU64,
    pub rejected_logins: AtomicU64,

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

    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_failed(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admin_login(&self) {
        self.admin_logins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login_rejected(&self) {
        self.rejected_logins.fetch_add(1, Ordering::Relaxed);
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
            messages: MessageMetrics {
                events_received: self.events_received.load(Ordering::Relaxed),
                persisted: self.messages_persisted.load(Ordering::Relaxed),
                acks_sent: self.acks_sent.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                persistence: self.persistence_failures.load(Ordering::Relaxed),
                delivery: self.delivery_failures.load(Ordering::Relaxed),
            },
            auth: AuthMetrics {
                admin_logins: self.admin_logins.load(Ordering::Relaxed),
                rejected_logins: self.rejected_logins.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
    pub auth: AuthMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub events_received: u64,
    pub persisted: u64,
    pub acks_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub persistence: u64,
    pub delivery: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMetrics {
    pub admin_logins: u64,
    pub rejected_logins: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub admins_online: u64,
    pub visitors_online: u64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = RelayMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_snapshot() {
        let metrics = RelayMetrics::new();
        metrics.connection_opened();
        metrics.event_received();
        metrics.message_persisted();
        metrics.ack_sent();
        metrics.delivery_failed();
        metrics.login_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.messages.events_received, 1);
        assert_eq!(snapshot.messages.persisted, 1);
        assert_eq!(snapshot.messages.acks_sent, 1);
        assert_eq!(snapshot.errors.delivery, 1);
        assert_eq!(snapshot.errors.persistence, 0);
        assert_eq!(snapshot.auth.rejected_logins, 1);
    }
}
