//! Optional metrics instrumentation.
//!
//! When the `observe` feature is enabled, key operations emit counters and
//! histograms via the [`metrics`] crate. A downstream application must
//! install a recorder (e.g. `metrics-exporter-prometheus`) to collect them.
//!
//! Without the feature every function here is a zero-cost no-op.

use crate::types::OpKind;

/// Record a successful write (counter + latency histogram).
///
/// - `memstate.write.total` – counter with `kind` label
/// - `memstate.write.duration_seconds` – histogram
#[inline]
pub fn record_commit(duration: std::time::Duration, kind: OpKind) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("memstate.write.total", "kind" => kind.as_str()).increment(1);
        metrics::histogram!("memstate.write.duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, kind);
    }
}

/// Record a compensated write.
///
/// - `memstate.compensation.total` – counter with `kind` label
#[inline]
pub fn record_compensation(kind: OpKind) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("memstate.compensation.total", "kind" => kind.as_str()).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = kind;
    }
}

/// Record a failed hook call.
///
/// - `memstate.hook.failures_total` – counter
#[inline]
pub fn record_hook_failure() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("memstate.hook.failures_total").increment(1);
    }
}

/// Record a rollback call.
///
/// - `memstate.rollback.total` – counter with `outcome` label (`ok` / `partial`)
/// - `memstate.rollback.reverted_total` – counter of reverted entries
#[inline]
pub fn record_rollback(reverted: usize, partial: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if partial { "partial" } else { "ok" };
        metrics::counter!("memstate.rollback.total", "outcome" => outcome).increment(1);
        metrics::counter!("memstate.rollback.reverted_total").increment(reverted as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (reverted, partial);
    }
}

/// Record a lock acquisition wait time.
///
/// - `memstate.lock.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("memstate.lock.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}
