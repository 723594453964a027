use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::probe::model::{ProbeErrorKind, ProbeResult};
use crate::probe::Prober;

pub fn ok_result(url: &str) -> ProbeResult {
    ProbeResult {
        url: url.to_owned(),
        timestamp: Utc::now(),
        success: true,
        status_code: Some(200),
        error: None,
        latency: Duration::from_millis(5),
        certificate: None,
        content_type: Some("text/html".to_owned()),
        server: None,
        content_length: None,
        redirect_url: None,
    }
}

pub fn failed_result(url: &str) -> ProbeResult {
    ProbeResult::failure(
        url,
        ProbeErrorKind::ConnectionRefused,
        "connection refused",
        Duration::from_millis(1),
    )
}

/// Prober with scripted outcomes that counts calls and concurrent probes.
pub struct FakeProber {
    outcomes: Mutex<VecDeque<bool>>,
    default_success: bool,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProber {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            default_success: true,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Outcomes handed out in order; once exhausted every probe succeeds
    /// unless `failing` was called.
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.into_iter().collect();
        self
    }

    pub fn failing(mut self) -> Self {
        self.default_success = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let success = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_success);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if success {
            ok_result(url)
        } else {
            failed_result(url)
        }
    }
}
