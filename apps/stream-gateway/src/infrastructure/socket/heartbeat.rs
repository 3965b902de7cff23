//! Heartbeat Tracking
//!
//! The session loop sends a HEARTBEAT frame every `interval`; the server
//! echoes it back with the original send timestamp, which yields a
//! round-trip latency sample. A missed echo is logged but never tears the
//! connection down — only socket-level close/error does that.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct HeartbeatInner {
    last_echo: Option<DateTime<Utc>>,
    latency: Option<Duration>,
    pings_since_echo: u32,
}

/// Shared heartbeat state for one connection session.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    inner: RwLock<HeartbeatInner>,
}

impl HeartbeatTracker {
    /// Create a fresh tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a ping was sent.
    ///
    /// Returns the number of pings sent since the last echo, so the caller
    /// can warn about a quiet server.
    pub fn record_ping_sent(&self) -> u32 {
        let mut inner = self.inner.write();
        inner.pings_since_echo += 1;
        inner.pings_since_echo
    }

    /// Record an inbound heartbeat echo carrying our original send time
    /// (epoch milliseconds) and return the measured round-trip latency.
    pub fn record_echo(&self, sent_at_ms: i64) -> Duration {
        let now = Utc::now();
        let latency = now
            .timestamp_millis()
            .saturating_sub(sent_at_ms)
            .max(0)
            .unsigned_abs();
        let latency = Duration::from_millis(latency);

        let mut inner = self.inner.write();
        inner.last_echo = Some(now);
        inner.latency = Some(latency);
        inner.pings_since_echo = 0;
        latency
    }

    /// Time of the most recent echo.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_echo
    }

    /// Most recent round-trip latency sample.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.inner.read().latency
    }

    /// Reset state for a new connection session.
    pub fn reset(&self) {
        *self.inner.write() = HeartbeatInner::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracker_has_no_samples() {
        let tracker = HeartbeatTracker::new();
        assert!(tracker.last_heartbeat().is_none());
        assert!(tracker.latency().is_none());
    }

    #[test]
    fn echo_records_latency_and_clears_ping_count() {
        let tracker = HeartbeatTracker::new();
        assert_eq!(tracker.record_ping_sent(), 1);
        assert_eq!(tracker.record_ping_sent(), 2);

        let sent = Utc::now().timestamp_millis() - 40;
        let latency = tracker.record_echo(sent);

        assert!(latency >= Duration::from_millis(40));
        assert!(latency < Duration::from_secs(5));
        assert!(tracker.last_heartbeat().is_some());
        assert_eq!(tracker.record_ping_sent(), 1);
    }

    #[test]
    fn echo_from_the_future_clamps_to_zero() {
        let tracker = HeartbeatTracker::new();
        let latency = tracker.record_echo(Utc::now().timestamp_millis() + 10_000);
        assert_eq!(latency, Duration::ZERO);
    }

    #[test]
    fn reset_clears_samples() {
        let tracker = HeartbeatTracker::new();
        tracker.record_echo(Utc::now().timestamp_millis());
        tracker.reset();

        assert!(tracker.last_heartbeat().is_none());
        assert!(tracker.latency().is_none());
    }
}
