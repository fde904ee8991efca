use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;

/// Global runtime metrics for the pipeline.
///
/// Purpose:
/// - Track resolved channels and connected sinks
/// - Track throughput per stage (received / extracted / written)
/// - Track recoverable failures per stage
///
/// Design:
/// - Lock-free (Atomics)
/// - Read only by the periodic reporter
#[derive(Default)]
pub struct RuntimeMetrics {
    // Startup
    pub channels_active: AtomicUsize,
    pub sinks_active: AtomicUsize,

    // Intake
    pub messages_replayed: AtomicUsize,
    pub messages_live: AtomicUsize,
    pub live_duplicates_skipped: AtomicUsize,

    // Extraction / validation
    pub extraction_failures: AtomicUsize,
    pub records_dropped: AtomicUsize,

    // Output
    pub records_written: AtomicUsize,
    pub sink_write_failures: AtomicUsize,

    pub replay_failures: AtomicUsize,
}

impl RuntimeMetrics {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> String {
        format!(
            "ch={} sinks={} replayed={} live={} dup_skipped={} extract_err={} dropped={} written={} sink_err={} replay_err={}",
            self.channels_active.load(Ordering::Relaxed),
            self.sinks_active.load(Ordering::Relaxed),
            self.messages_replayed.load(Ordering::Relaxed),
            self.messages_live.load(Ordering::Relaxed),
            self.live_duplicates_skipped.load(Ordering::Relaxed),
            self.extraction_failures.load(Ordering::Relaxed),
            self.records_dropped.load(Ordering::Relaxed),
            self.records_written.load(Ordering::Relaxed),
            self.sink_write_failures.load(Ordering::Relaxed),
            self.replay_failures.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Spawns the periodic, low-noise metrics reporter.
pub fn spawn_reporter(interval_secs: u64) {
    let period = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            log::info!("[METRICS] {}", METRICS.summary());
        }
    });
}
