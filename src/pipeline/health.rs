//! Redaction counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared between the redaction probe and whoever reports on it
///
/// All fields use atomic operations, so the probe can update them from the
/// streaming context while the control context reads them.
#[derive(Debug)]
pub struct RedactionHealth {
    /// Buffers that went through the probe
    pub buffers_seen: AtomicU64,

    /// Frames that had at least one region redacted
    pub frames_redacted: AtomicU64,

    /// Frames left untouched because of a frame error
    pub frames_skipped: AtomicU64,

    /// Regions blurred or filled
    pub regions_applied: AtomicU64,

    /// Regions dropped because they were empty after clamping
    pub regions_discarded: AtomicU64,

    /// Unix microseconds of the last buffer seen
    pub last_buffer_time: AtomicU64,
}

fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

impl RedactionHealth {
    pub fn new() -> Self {
        Self {
            buffers_seen: AtomicU64::new(0),
            frames_redacted: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            regions_applied: AtomicU64::new(0),
            regions_discarded: AtomicU64::new(0),
            last_buffer_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_buffer(&self) {
        self.buffers_seen.fetch_add(1, Ordering::Relaxed);
        self.last_buffer_time.store(now_micros(), Ordering::Relaxed);
    }

    /// Record a frame where `applied` regions were redacted and `discarded`
    /// were dropped
    pub fn record_frame(&self, applied: u64, discarded: u64) {
        if applied > 0 {
            self.frames_redacted.fetch_add(1, Ordering::Relaxed);
        }
        self.regions_applied.fetch_add(applied, Ordering::Relaxed);
        self.regions_discarded.fetch_add(discarded, Ordering::Relaxed);
    }

    pub fn record_skipped_frame(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffers_seen(&self) -> u64 {
        self.buffers_seen.load(Ordering::Relaxed)
    }

    pub fn frames_redacted(&self) -> u64 {
        self.frames_redacted.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn regions_applied(&self) -> u64 {
        self.regions_applied.load(Ordering::Relaxed)
    }

    pub fn regions_discarded(&self) -> u64 {
        self.regions_discarded.load(Ordering::Relaxed)
    }

    /// Check if no buffer arrived for the given duration
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = self.last_buffer_time.load(Ordering::Relaxed);
        let threshold = u64::try_from(threshold.as_micros()).unwrap_or(u64::MAX);
        now_micros().saturating_sub(last) > threshold
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            buffers_seen: self.buffers_seen(),
            frames_redacted: self.frames_redacted(),
            frames_skipped: self.frames_skipped(),
            regions_applied: self.regions_applied(),
            regions_discarded: self.regions_discarded(),
        }
    }
}

impl Default for RedactionHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the redaction counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub buffers_seen: u64,
    pub frames_redacted: u64,
    pub frames_skipped: u64,
    pub regions_applied: u64,
    pub regions_discarded: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Redaction: {} buffers, {} frames redacted, {} skipped, {} regions ({} discarded)",
            self.buffers_seen,
            self.frames_redacted,
            self.frames_skipped,
            self.regions_applied,
            self.regions_discarded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = RedactionHealth::new();
        health.record_buffer();
        health.record_frame(2, 1);
        health.record_frame(0, 0);
        health.record_skipped_frame();

        let summary = health.summary();
        assert_eq!(summary.buffers_seen, 1);
        assert_eq!(summary.frames_redacted, 1);
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.regions_applied, 2);
        assert_eq!(summary.regions_discarded, 1);
        assert!(summary.to_string().contains("2 regions"));
    }

    #[test]
    fn test_stall_detection() {
        let health = RedactionHealth::new();
        assert!(!health.is_stalled(Duration::from_secs(1)));

        health.record_buffer();
        std::thread::sleep(Duration::from_millis(150));
        assert!(health.is_stalled(Duration::from_millis(100)));
        // longer than u64 microseconds can hold
        assert!(!health.is_stalled(Duration::MAX));
    }
}
