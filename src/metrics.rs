//! Per-client runtime metrics.
//!
//! Adapted from the teacher's global `METRICS: Lazy<Arc<RuntimeMetrics>>`
//! singleton: same atomics-based, lock-free design, but owned per
//! `Client` instead of process-wide: a process can host more than one
//! client (stocks + crypto + news, say) and a global counter would
//! conflate them. See DESIGN.md for the deviation rationale. Exporting
//! these anywhere is out of scope; this is a snapshot handle a caller
//! can poll, per §5.1.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct RuntimeMetrics {
    pub ws_connections_active: AtomicUsize,
    pub ws_reconnects: AtomicUsize,
    pub messages_received: AtomicUsize,
    pub messages_dispatched: AtomicUsize,
    pub parse_errors: AtomicUsize,
    pub dropped_messages: AtomicUsize,
    pub subscriptions_sent: AtomicUsize,
    pub subscription_errors: AtomicUsize,
}

impl RuntimeMetrics {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ws_connections_active: self.ws_connections_active.load(Ordering::Relaxed),
            ws_reconnects: self.ws_reconnects.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            subscriptions_sent: self.subscriptions_sent.load(Ordering::Relaxed),
            subscription_errors: self.subscription_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`RuntimeMetrics`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ws_connections_active: usize,
    pub ws_reconnects: usize,
    pub messages_received: usize,
    pub messages_dispatched: usize,
    pub parse_errors: usize,
    pub dropped_messages: usize,
    pub subscriptions_sent: usize,
    pub subscription_errors: usize,
}
