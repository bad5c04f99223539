//! Pure staleness predicate over heartbeat timestamps (spec 4.7).

use chrono::{DateTime, Duration, Utc};

/// Absent heartbeat is always stale: a runner that never confirmed liveness
/// gives recovery no reason to trust the job is alive.
pub fn is_stale(heartbeat: Option<DateTime<Utc>>, threshold: Duration, now: DateTime<Utc>) -> bool {
    match heartbeat {
        Some(hb) => now - hb > threshold,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn absent_heartbeat_is_stale() {
        assert!(is_stale(None, Duration::seconds(30), ts(1000)));
    }

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        assert!(!is_stale(Some(ts(990)), Duration::seconds(30), ts(1000)));
    }

    #[test]
    fn heartbeat_past_threshold_is_stale() {
        assert!(is_stale(Some(ts(900)), Duration::seconds(30), ts(1000)));
    }
}
