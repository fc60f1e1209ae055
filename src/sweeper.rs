use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info};

use crate::lifecycle::LifecycleService;
use crate::model::*;
use crate::observability;
use crate::store::{InMemoryStore, ReservationStore};

/// Wall-clock now in unix milliseconds. A clock before the epoch reads as 0.
pub fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub no_shows: usize,
    pub finished: usize,
    /// Candidates whose transition was refused, usually a lost race.
    pub skipped: usize,
}

/// Run the time-driven transitions due at `now`.
///
/// No-show detection goes first so an unattended reservation is flagged
/// before it is finished. Every transition goes through
/// [`LifecycleService::attempt`] as the system actor; a refusal means the
/// reservation moved on since it was listed and is simply skipped.
pub fn sweep_once<S: ReservationStore>(service: &LifecycleService<S>, now: Ms) -> SweepReport {
    let start = Instant::now();
    let system = Actor::system();
    let windows = *service.windows();
    let live = service.store().live_reservations();
    let mut report = SweepReport {
        scanned: live.len(),
        ..SweepReport::default()
    };

    for r in &live {
        if windows.is_no_show_sweep_due(now, r) {
            match service.attempt(&system, r.id, Action::DetectNoShow, now) {
                Ok(_) => report.no_shows += 1,
                Err(e) => {
                    debug!("sweep skip no-show {}: {e}", r.id);
                    report.skipped += 1;
                }
            }
        }
    }

    // Re-read: the no-show pass may have cancelled some of them.
    for r in service.store().live_reservations() {
        if windows.is_auto_finish_due(now, &r) {
            match service.attempt(&system, r.id, Action::AutoFinish, now) {
                Ok(_) => report.finished += 1,
                Err(e) => {
                    debug!("sweep skip finish {}: {e}", r.id);
                    report.skipped += 1;
                }
            }
        }
    }

    metrics::gauge!(observability::LIVE_RESERVATIONS).set(report.scanned as f64);
    metrics::histogram!(observability::SWEEP_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
    if report.no_shows > 0 || report.finished > 0 {
        info!(
            "sweep: {} no-shows, {} finished, {} skipped of {} live",
            report.no_shows, report.finished, report.skipped, report.scanned
        );
    }
    report
}

/// Background task that periodically applies time-driven transitions.
pub async fn run_sweeper<S: ReservationStore + 'static>(service: Arc<LifecycleService<S>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&service, now_ms());
    }
}

/// Background task that rewrites the WAL as a snapshot once it grows past
/// `threshold` appends.
pub async fn run_compactor(service: Arc<LifecycleService<InMemoryStore>>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(service.store(), threshold);
    }
}

/// Returns true when a compaction ran.
pub fn compact_if_due(store: &InMemoryStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact();
    if threshold == 0 || appends < threshold {
        return false;
    }
    match store.compact() {
        Ok(()) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}
