use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use super::backoff::Backoff;
use super::cache::{Lookup, LookupOrigin};
use super::model::TargetPhase;
use crate::orchestrator::Orchestrator;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runtime state of one target, shared between its task and the orchestrator.
pub struct TargetState {
    phase: Mutex<TargetPhase>,
    backoff: Mutex<Backoff>,
    issued: AtomicU64,
    published: Mutex<u64>,
}

impl TargetState {
    pub fn new(interval: Duration, max_interval: Duration) -> Self {
        Self {
            phase: Mutex::new(TargetPhase::Idle),
            backoff: Mutex::new(Backoff::new(interval, max_interval)),
            issued: AtomicU64::new(0),
            published: Mutex::new(0),
        }
    }

    pub fn phase(&self) -> TargetPhase {
        *lock(&self.phase)
    }

    pub fn set_phase(&self, phase: TargetPhase) {
        *lock(&self.phase) = phase;
    }

    pub fn next_interval(&self) -> Duration {
        lock(&self.backoff).next_interval()
    }

    pub fn consecutive_failures(&self) -> u32 {
        lock(&self.backoff).consecutive_failures()
    }

    /// Numbers a probe when it starts. Numbers start at 1.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Claims publication for check `seq`. Returns the guard to hold while
    /// publishing, or `None` if a later check was already published.
    pub fn claim_publication(&self, seq: u64) -> Option<MutexGuard<'_, u64>> {
        let mut published = lock(&self.published);
        if seq <= *published {
            return None;
        }
        *published = seq;
        Some(published)
    }

    /// Feeds a check outcome into the backoff and returns the delay before
    /// the next scheduled check. Cached results say nothing new about the
    /// target, so they leave the backoff untouched.
    fn record(&self, lookup: &Lookup) -> Duration {
        let mut backoff = lock(&self.backoff);
        if lookup.origin != LookupOrigin::Cached {
            if lookup.result.success {
                backoff.record_success();
            } else {
                backoff.record_failure();
            }
        }
        backoff.next_interval()
    }
}

/// Drives one target: check, publish, back off, sleep, forever. Ends only by
/// being aborted.
pub async fn run_target(orchestrator: Arc<Orchestrator>, url: String, state: Arc<TargetState>) {
    info!(url, "Monitoring started");
    loop {
        let lookup = orchestrator.run_check(&url, &state).await;
        let delay = state.record(&lookup);
        state.set_phase(TargetPhase::Idle);

        debug!(
            url,
            success = lookup.result.success,
            origin = ?lookup.origin,
            consecutive_failures = state.consecutive_failures(),
            next_check_ms = delay.as_millis() as u64,
            "Check complete"
        );
        tokio::time::sleep(delay).await;
    }
}
