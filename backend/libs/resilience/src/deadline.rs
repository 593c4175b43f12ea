//! Deadline propagation.
//!
//! The edge assigns every request an absolute wall-clock deadline carried in
//! the `X-Request-Deadline` header (Unix seconds, fractional). Downstream
//! hops cap their per-hop timeouts at the remaining time so nobody spends
//! compute on a request the caller has already given up on. The deadline is
//! advisory for storage writes already in flight: a committed transaction is
//! never aborted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEADLINE_HEADER: &str = "X-Request-Deadline";

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Absolute wall-clock deadline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadline {
    epoch_secs: f64,
}

impl Deadline {
    /// Deadline `d` from now (used at the edge; default is 25 s).
    pub fn after(d: Duration) -> Self {
        Self {
            epoch_secs: unix_now() + d.as_secs_f64(),
        }
    }

    /// Parse the propagated header value; None for absent/garbled values.
    pub fn from_header(value: &str) -> Option<Self> {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|epoch_secs| Self { epoch_secs })
    }

    pub fn remaining(&self) -> Duration {
        let remaining = self.epoch_secs - unix_now();
        if remaining <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(remaining)
        }
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Per-hop timeout: min(local default, deadline - now).
    pub fn cap(&self, local: Duration) -> Duration {
        local.min(self.remaining())
    }

    /// Value propagated verbatim to downstreams.
    pub fn header_value(&self) -> String {
        format!("{:.3}", self.epoch_secs)
    }
}

/// Per-hop timeouts, each capped by the remaining deadline at call time.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            read: Duration::from_secs(10),
            write: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_never_exceeds_remaining() {
        let deadline = Deadline::after(Duration::from_secs(3));
        let capped = deadline.cap(Duration::from_secs(10));
        assert!(capped <= Duration::from_secs(3));
        assert!(capped > Duration::from_secs(2));
    }

    #[test]
    fn test_cap_keeps_local_default_when_deadline_is_far() {
        let deadline = Deadline::after(Duration::from_secs(25));
        assert_eq!(deadline.cap(Duration::from_secs(10)), Duration::from_secs(10));
    }

    #[test]
    fn test_expired_deadline() {
        let deadline = Deadline { epoch_secs: unix_now() - 1.0 };
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert_eq!(deadline.cap(Duration::from_secs(10)), Duration::ZERO);
    }

    #[test]
    fn test_header_round_trip() {
        let deadline = Deadline::after(Duration::from_secs(25));
        let parsed = Deadline::from_header(&deadline.header_value()).unwrap();
        // Serialized at millisecond precision
        assert!((parsed.epoch_secs - deadline.epoch_secs).abs() < 0.002);
    }

    #[test]
    fn test_garbled_header_is_ignored() {
        assert!(Deadline::from_header("not-a-number").is_none());
        assert!(Deadline::from_header("").is_none());
        assert!(Deadline::from_header("NaN").is_none());
    }
}
