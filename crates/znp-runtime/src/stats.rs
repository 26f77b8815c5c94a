//! Dispatch statistics

use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

/// Live counters updated from the dispatch and reconnect paths
#[derive(Debug, Default)]
pub struct ZnpStats {
    frames_received: AtomicU64,
    frames_unmatched: AtomicU64,
    decode_errors: AtomicU64,
    listeners_resolved: AtomicU64,
    connections_lost: AtomicU64,
    reconnects_started: AtomicU64,
    reconnect_attempts: AtomicU64,
}

/// Point-in-time copy of [`ZnpStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames handed over by the transport
    pub frames_received: u64,
    /// Decoded frames no listener took
    pub frames_unmatched: u64,
    /// Frames dropped because they did not decode
    pub decode_errors: u64,
    /// Listener resolutions across all frames
    pub listeners_resolved: u64,
    pub connections_lost: u64,
    /// Reconnect loops started, at most one per loss
    pub reconnects_started: u64,
    pub reconnect_attempts: u64,
}

impl ZnpStats {
    pub(crate) fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, resolved: usize) {
        if resolved == 0 {
            self.frames_unmatched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.listeners_resolved
                .fetch_add(resolved as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect_started(&self) {
        self.reconnects_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_unmatched: self.frames_unmatched.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            listeners_resolved: self.listeners_resolved.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            reconnects_started: self.reconnects_started.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_counters() {
        let stats = ZnpStats::default();
        stats.record_frame();
        stats.record_dispatch(0);
        stats.record_frame();
        stats.record_dispatch(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.frames_unmatched, 1);
        assert_eq!(snapshot.listeners_resolved, 2);
        assert_eq!(snapshot.decode_errors, 0);
    }
}
