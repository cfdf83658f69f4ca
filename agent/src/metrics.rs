//! Lightweight Prometheus-compatible metrics for the overlay agent.
//!
//! Uses atomic counters for lock-free instrumentation. Rendered in
//! Prometheus text exposition format and logged as a summary each
//! reconcile tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide counters shared by every pump
pub struct Metrics {
    /// Frames forwarded from the TAP to a peer (counter)
    pub frames_forwarded_total: AtomicU64,
    /// Frames dropped: unknown EtherType, unknown MAC, unintroduced source (counter)
    pub frames_dropped_total: AtomicU64,
    /// Datagrams received on the overlay socket (counter)
    pub datagrams_received_total: AtomicU64,
    /// Introductions sent, initial and replies (counter)
    pub intros_sent_total: AtomicU64,
    /// Introductions accepted from peers (counter)
    pub intros_received_total: AtomicU64,
    /// Reconcile passes completed (counter)
    pub reconcile_passes_total: AtomicU64,
    /// Agent start time (for uptime calculation)
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics {
            frames_forwarded_total: AtomicU64::new(0),
            frames_dropped_total: AtomicU64::new(0),
            datagrams_received_total: AtomicU64::new(0),
            intros_sent_total: AtomicU64::new(0),
            intros_received_total: AtomicU64::new(0),
            reconcile_passes_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let uptime = self.start_time.elapsed().as_secs();
        format!(
            "# HELP vptp_frames_forwarded_total Frames forwarded from TAP to peers\n\
             # TYPE vptp_frames_forwarded_total counter\n\
             vptp_frames_forwarded_total {}\n\
             # HELP vptp_frames_dropped_total Frames dropped by routing policy\n\
             # TYPE vptp_frames_dropped_total counter\n\
             vptp_frames_dropped_total {}\n\
             # HELP vptp_datagrams_received_total Datagrams received on the overlay socket\n\
             # TYPE vptp_datagrams_received_total counter\n\
             vptp_datagrams_received_total {}\n\
             # HELP vptp_intros_sent_total Introductions sent\n\
             # TYPE vptp_intros_sent_total counter\n\
             vptp_intros_sent_total {}\n\
             # HELP vptp_intros_received_total Introductions accepted\n\
             # TYPE vptp_intros_received_total counter\n\
             vptp_intros_received_total {}\n\
             # HELP vptp_reconcile_passes_total Reconcile passes completed\n\
             # TYPE vptp_reconcile_passes_total counter\n\
             vptp_reconcile_passes_total {}\n\
             # HELP vptp_uptime_seconds Agent uptime in seconds\n\
             # TYPE vptp_uptime_seconds gauge\n\
             vptp_uptime_seconds {}\n",
            self.frames_forwarded_total.load(Ordering::Relaxed),
            self.frames_dropped_total.load(Ordering::Relaxed),
            self.datagrams_received_total.load(Ordering::Relaxed),
            self.intros_sent_total.load(Ordering::Relaxed),
            self.intros_received_total.load(Ordering::Relaxed),
            self.reconcile_passes_total.load(Ordering::Relaxed),
            uptime,
        )
    }

    /// One-line summary for the reconcile tick log
    pub fn summary(&self) -> String {
        format!(
            "fwd={} drop={} rx={} intro_tx={} intro_rx={}",
            self.frames_forwarded_total.load(Ordering::Relaxed),
            self.frames_dropped_total.load(Ordering::Relaxed),
            self.datagrams_received_total.load(Ordering::Relaxed),
            self.intros_sent_total.load(Ordering::Relaxed),
            self.intros_received_total.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default_zero() {
        let m = Metrics::new();
        assert_eq!(m.frames_forwarded_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.frames_dropped_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.datagrams_received_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.intros_sent_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.intros_received_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.reconcile_passes_total.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_metrics_render_format() {
        let m = Metrics::new();
        m.frames_forwarded_total.fetch_add(42, Ordering::Relaxed);
        m.intros_sent_total.fetch_add(3, Ordering::Relaxed);
        let output = m.render();
        assert!(output.contains("vptp_frames_forwarded_total 42"));
        assert!(output.contains("vptp_intros_sent_total 3"));
        assert!(output.contains("# TYPE vptp_frames_forwarded_total counter"));
        assert!(output.contains("# TYPE vptp_uptime_seconds gauge"));
    }

    #[test]
    fn test_metrics_summary_line() {
        let m = Metrics::new();
        m.frames_dropped_total.fetch_add(5, Ordering::Relaxed);
        assert!(m.summary().contains("drop=5"));
    }
}
