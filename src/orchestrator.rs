use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{CheckSettings, Config};
use crate::errors::{ConfigurationError, Result};
use crate::otel::metrics::Metrics;
use crate::probe::cache::{Lookup, ResultCache};
use crate::probe::http_probe::HttpProber;
use crate::probe::model::{MonitoredTarget, ProbeResult, TargetPhase, TargetStatistics};
use crate::probe::schedule::{run_target, TargetState};
use crate::probe::stats::{compute_statistics, health_score};
use crate::probe::validate::validate_url;
use crate::probe::Prober;

const CACHE_CLEANUP_PERIOD: Duration = Duration::from_secs(60);

struct TargetEntry {
    target: MonitoredTarget,
    state: Arc<TargetState>,
    task: Option<JoinHandle<()>>,
}

impl TargetEntry {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the monitored targets, runs one task per enabled target and
/// publishes every fresh result to history, metrics and observers.
pub struct Orchestrator {
    settings: CheckSettings,
    prober: Arc<dyn Prober>,
    cache: Arc<ResultCache>,
    targets: RwLock<HashMap<String, TargetEntry>>,
    history: RwLock<HashMap<String, VecDeque<Arc<ProbeResult>>>>,
    observers: Mutex<Vec<UnboundedSender<Arc<ProbeResult>>>>,
    running: AtomicBool,
    janitor: Mutex<Option<JoinHandle<()>>>,
    metrics: Metrics,
}

impl Orchestrator {
    pub fn new(
        settings: CheckSettings,
        prober: Arc<dyn Prober>,
        cache: Arc<ResultCache>,
    ) -> std::result::Result<Arc<Self>, ConfigurationError> {
        settings.validate()?;
        Ok(Arc::new(Orchestrator {
            settings,
            prober,
            cache,
            targets: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            janitor: Mutex::new(None),
            metrics: Metrics::new(),
        }))
    }

    /// Builds an orchestrator probing over HTTP with every configured target
    /// added. Nothing is checked until [`Orchestrator::start`].
    pub fn from_config(config: &Config) -> Result<Arc<Self>> {
        config.settings.validate()?;
        let prober = HttpProber::new(&config.settings)?;
        let orchestrator = Orchestrator::new(
            config.settings.clone(),
            Arc::new(prober),
            Arc::new(ResultCache::new()),
        )?;

        for target in &config.targets {
            let added = orchestrator.add_target(&target.url, target.interval, target.enabled)?;
            if orchestrator.settings.cache_ttl >= added.interval {
                warn!(
                    url = added.url,
                    interval_s = added.interval.as_secs_f64(),
                    cache_ttl_s = orchestrator.settings.cache_ttl.as_secs_f64(),
                    "Cache TTL is not shorter than the check interval, scheduled checks may reuse cached results"
                );
            }
        }
        Ok(orchestrator)
    }

    pub fn settings(&self) -> &CheckSettings {
        &self.settings
    }

    /// Validates and registers a target. Without an interval the configured
    /// default applies. If the orchestrator is running and the target is
    /// enabled its checks begin immediately.
    pub fn add_target(
        self: &Arc<Self>,
        url: &str,
        interval: Option<Duration>,
        enabled: bool,
    ) -> Result<MonitoredTarget> {
        let url = validate_url(url)?;
        let interval = interval.unwrap_or(self.settings.default_interval);
        self.settings.validate_interval(interval)?;

        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        if targets.contains_key(&url) {
            return Err(ConfigurationError::DuplicateTarget(url).into());
        }

        let target = MonitoredTarget {
            url: url.clone(),
            interval,
            enabled,
        };
        let state = Arc::new(TargetState::new(interval, self.settings.max_interval));
        let task = (enabled && self.is_running()).then(|| self.spawn_target(&url, &state));
        targets.insert(
            url.clone(),
            TargetEntry {
                target: target.clone(),
                state,
                task,
            },
        );
        info!(url, interval_s = interval.as_secs_f64(), enabled, "Target added");
        Ok(target)
    }

    /// Stops monitoring a target and forgets its cached result and history.
    /// A probe in flight for it is dropped.
    pub fn remove_target(&self, url: &str) -> Result<MonitoredTarget> {
        let url = lookup_key(url);
        let mut entry = self
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&url)
            .ok_or_else(|| ConfigurationError::UnknownTarget(url.clone()))?;
        entry.stop();

        self.cache.cancel(&url);
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&url);
        info!(url, "Target removed");
        Ok(entry.target)
    }

    pub fn set_enabled(self: &Arc<Self>, url: &str, enabled: bool) -> Result<()> {
        let url = lookup_key(url);
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        let entry = targets
            .get_mut(&url)
            .ok_or_else(|| ConfigurationError::UnknownTarget(url.clone()))?;
        if entry.target.enabled == enabled {
            return Ok(());
        }

        entry.target.enabled = enabled;
        if !enabled {
            entry.stop();
            entry.state.set_phase(TargetPhase::Idle);
        } else if self.is_running() && entry.task.is_none() {
            entry.task = Some(self.spawn_target(&url, &entry.state));
        }
        info!(url, enabled, "Target toggled");
        Ok(())
    }

    /// Checks a target right away, outside its schedule. Disabled targets can
    /// be checked too. A fresh cached result is returned as is.
    pub async fn check_now(self: &Arc<Self>, url: &str) -> Result<Arc<ProbeResult>> {
        let url = lookup_key(url);
        let state = self
            .state_of(&url)
            .ok_or_else(|| ConfigurationError::UnknownTarget(url.clone()))?;
        let lookup = self.run_check(&url, &state).await;
        state.set_phase(TargetPhase::Idle);
        Ok(lookup.result)
    }

    /// Checks every enabled target concurrently and returns the results in
    /// target order.
    pub async fn check_all(self: &Arc<Self>) -> Vec<Arc<ProbeResult>> {
        let enabled: Vec<(String, Arc<TargetState>)> = {
            let targets = self.targets.read().unwrap_or_else(PoisonError::into_inner);
            let mut enabled: Vec<_> = targets
                .values()
                .filter(|entry| entry.target.enabled)
                .map(|entry| (entry.target.url.clone(), entry.state.clone()))
                .collect();
            enabled.sort_by(|a, b| a.0.cmp(&b.0));
            enabled
        };

        join_all(enabled.iter().map(|(url, state)| async move {
            let lookup = self.run_check(url, state).await;
            state.set_phase(TargetPhase::Idle);
            lookup.result
        }))
        .await
    }

    /// All targets, sorted by URL.
    pub fn targets(&self) -> Vec<MonitoredTarget> {
        let mut targets: Vec<_> = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.target.clone())
            .collect();
        targets.sort_by(|a, b| a.url.cmp(&b.url));
        targets
    }

    pub fn phase(&self, url: &str) -> Option<TargetPhase> {
        self.state_of(&lookup_key(url)).map(|state| state.phase())
    }

    /// Delay the target's task will wait after its latest check.
    pub fn next_interval(&self, url: &str) -> Option<Duration> {
        self.state_of(&lookup_key(url))
            .map(|state| state.next_interval())
    }

    /// Published results for a target, oldest first.
    pub fn history(&self, url: &str) -> Vec<Arc<ProbeResult>> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&lookup_key(url))
            .map(|results| results.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn history_since(&self, url: &str, since: DateTime<Utc>) -> Vec<Arc<ProbeResult>> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&lookup_key(url))
            .map(|results| {
                results
                    .iter()
                    .filter(|result| result.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn statistics(&self, url: &str) -> TargetStatistics {
        compute_statistics(&self.history(url))
    }

    pub fn health_score(&self, url: &str) -> f64 {
        health_score(&self.statistics(url))
    }

    /// Drops all history and cached results. Targets keep running.
    pub fn clear_history(&self) {
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.cache.clear();
        info!("History cleared");
    }

    /// Registers an observer. Every fresh result is sent in publication
    /// order; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> UnboundedReceiver<Arc<ProbeResult>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Runs `callback` for every fresh result on a task of its own, so a
    /// slow callback never holds up checks.
    pub fn on_result<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(Arc<ProbeResult>) + Send + 'static,
    {
        let mut results = self.subscribe();
        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                callback(result);
            }
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts a task for every enabled target.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        for (url, entry) in targets.iter_mut() {
            if entry.target.enabled && entry.task.is_none() {
                entry.task = Some(self.spawn_target(url, &entry.state));
            }
        }

        let cache = self.cache.clone();
        *self.janitor.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(CACHE_CLEANUP_PERIOD);
                loop {
                    ticker.tick().await;
                    cache.cleanup();
                }
            }));
        info!(targets = targets.len(), "Monitoring started");
    }

    /// Aborts every target task and every probe in flight for a target.
    /// Targets and history are kept, and [`Orchestrator::start`] resumes
    /// checking.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for (url, entry) in self
            .targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
        {
            entry.stop();
            self.cache.cancel(url);
            entry.state.set_phase(TargetPhase::Idle);
        }
        if let Some(janitor) = self
            .janitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            janitor.abort();
        }
        info!("Monitoring stopped");
    }

    fn spawn_target(self: &Arc<Self>, url: &str, state: &Arc<TargetState>) -> JoinHandle<()> {
        tokio::spawn(run_target(self.clone(), url.to_owned(), state.clone()))
    }

    fn state_of(&self, url: &str) -> Option<Arc<TargetState>> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .map(|entry| entry.state.clone())
    }

    /// One check of `url` through the cache. A probe is numbered when it
    /// starts and publishes its own result when it finishes, so a result
    /// reaches observers once even if every caller waiting on it is dropped.
    pub(crate) async fn run_check(self: &Arc<Self>, url: &str, state: &Arc<TargetState>) -> Lookup {
        state.set_phase(TargetPhase::Probing);

        let orchestrator = Arc::clone(self);
        let probe_state = Arc::clone(state);
        let probe_url = url.to_owned();
        let lookup = self
            .cache
            .get_or_probe(url, self.settings.cache_ttl, move || {
                let seq = probe_state.issue();
                async move {
                    let result = Arc::new(orchestrator.prober.probe(&probe_url).await);
                    orchestrator.publish(&probe_url, &probe_state, seq, &result);
                    result
                }
            })
            .await;

        state.set_phase(if lookup.result.success {
            TargetPhase::Succeeded
        } else {
            TargetPhase::Failed
        });
        lookup
    }

    fn publish(&self, url: &str, state: &Arc<TargetState>, seq: u64, result: &Arc<ProbeResult>) {
        let Some(_published) = state.claim_publication(seq) else {
            debug!(url, seq, "Discarding result of a superseded check");
            return;
        };

        // removed, or removed and added again, while the probe was in flight
        let current = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .is_some_and(|entry| Arc::ptr_eq(&entry.state, state));
        if !current {
            debug!(url, seq, "Discarding result for a removed target");
            return;
        }

        self.metrics.record(result);

        {
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
            let results = history.entry(url.to_owned()).or_default();
            results.push_back(result.clone());
            while results.len() > self.settings.history_limit {
                results.pop_front();
            }
        }

        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|observer| observer.send(result.clone()).is_ok());
    }
}

/// Targets are keyed by their normalized URL; anything that fails validation
/// is looked up as given and simply won't match.
fn lookup_key(url: &str) -> String {
    validate_url(url).unwrap_or_else(|_| url.trim().to_owned())
}
