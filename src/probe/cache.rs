//! TTL cache of the latest probe result per URL with single-flight probing.
//!
//! A probe runs on a task of its own. While it is in flight its slot holds
//! the shared handle to that task, so every other caller for the same URL
//! awaits that one request instead of issuing its own, and the probe
//! finishes and caches its result even if every caller goes away.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::model::{ProbeErrorKind, ProbeResult};

type PendingProbe = Shared<BoxFuture<'static, Arc<ProbeResult>>>;
type Slots = Mutex<HashMap<String, Slot>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: Arc<ProbeResult>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(result: Arc<ProbeResult>, ttl: Duration) -> Self {
        Self {
            result,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

enum Slot {
    Ready(CacheEntry),
    Pending {
        generation: u64,
        probe: PendingProbe,
        task: AbortHandle,
    },
}

/// Where a result handed out by [`ResultCache::get_or_probe`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOrigin {
    /// Served from a fresh cache entry.
    Cached,
    /// Awaited a probe another caller had already started.
    Joined,
    /// This caller started the probe.
    Probed,
}

#[derive(Debug, Clone)]
pub struct Lookup {
    pub result: Arc<ProbeResult>,
    pub origin: LookupOrigin,
}

#[derive(Default)]
pub struct ResultCache {
    slots: Arc<Slots>,
    next_generation: AtomicU64,
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    match slots.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Result cache lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Installs a finished probe's result unless its slot was replaced or
/// dropped while it ran.
fn complete(slots: &Slots, url: &str, generation: u64, result: &Arc<ProbeResult>, ttl: Duration) {
    let mut slots = lock(slots);
    let still_pending = matches!(
        slots.get(url),
        Some(Slot::Pending { generation: current, .. }) if *current == generation
    );
    if still_pending {
        slots.insert(
            url.to_owned(),
            Slot::Ready(CacheEntry::new(result.clone(), ttl)),
        );
    }
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached result for `url`, or `None` if missing, expired or still
    /// being probed.
    pub fn get(&self, url: &str) -> Option<Arc<ProbeResult>> {
        match lock(&self.slots).get(url) {
            Some(Slot::Ready(entry)) if !entry.is_expired() => Some(entry.result.clone()),
            _ => None,
        }
    }

    /// Stores a result, replacing whatever the slot held. A probe that was in
    /// flight for the same URL will not overwrite it when it completes.
    pub fn put(&self, url: &str, result: Arc<ProbeResult>, ttl: Duration) {
        debug!(url, ttl_ms = ttl.as_millis() as u64, "Caching probe result");
        lock(&self.slots).insert(url.to_owned(), Slot::Ready(CacheEntry::new(result, ttl)));
    }

    /// Returns a fresh cached result, joins the in-flight probe for `url`, or
    /// spawns `probe()` and caches its result for `ttl`.
    ///
    /// `probe` is only called when this caller starts the probe. The future
    /// it returns runs to completion on its own task even if this caller is
    /// dropped, unless the slot is cancelled.
    pub async fn get_or_probe<F, Fut>(&self, url: &str, ttl: Duration, probe: F) -> Lookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Arc<ProbeResult>> + Send + 'static,
    {
        let (pending, origin) = {
            let mut slots = lock(&self.slots);
            let mut joined = None;
            match slots.get(url) {
                Some(Slot::Ready(entry)) if !entry.is_expired() => {
                    return Lookup {
                        result: entry.result.clone(),
                        origin: LookupOrigin::Cached,
                    };
                }
                Some(Slot::Pending { probe, .. }) => {
                    joined = Some(probe.clone());
                }
                _ => {}
            }

            match joined {
                Some(pending) => {
                    debug!(url, "Joining in-flight probe");
                    (pending, LookupOrigin::Joined)
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (pending, task) = self.spawn_probe(url, generation, ttl, probe());
                    slots.insert(
                        url.to_owned(),
                        Slot::Pending {
                            generation,
                            probe: pending.clone(),
                            task,
                        },
                    );
                    (pending, LookupOrigin::Probed)
                }
            }
        };

        Lookup {
            result: pending.await,
            origin,
        }
    }

    fn spawn_probe<Fut>(
        &self,
        url: &str,
        generation: u64,
        ttl: Duration,
        probe: Fut,
    ) -> (PendingProbe, AbortHandle)
    where
        Fut: Future<Output = Arc<ProbeResult>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let key = url.to_owned();
        let handle = tokio::spawn(async move {
            let result = probe.await;
            complete(&slots, &key, generation, &result, ttl);
            result
        });
        let task = handle.abort_handle();

        let url = url.to_owned();
        let pending = handle
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    Arc::new(ProbeResult::failure(
                        url,
                        ProbeErrorKind::Unknown,
                        format!("check did not complete: {}", e),
                        Duration::ZERO,
                    ))
                })
            })
            .boxed()
            .shared();
        (pending, task)
    }

    /// Drops the slot for `url`. A probe in flight keeps running for the
    /// callers awaiting it but will not install its result.
    pub fn invalidate(&self, url: &str) -> bool {
        lock(&self.slots).remove(url).is_some()
    }

    /// Drops the slot for `url` and aborts its in-flight probe, if any.
    /// Callers awaiting the probe get a failed result.
    pub fn cancel(&self, url: &str) -> bool {
        match lock(&self.slots).remove(url) {
            Some(Slot::Pending { task, .. }) => {
                debug!(url, "Aborting in-flight probe");
                task.abort();
                true
            }
            Some(Slot::Ready(_)) => true,
            None => false,
        }
    }

    /// Removes expired entries, leaving in-flight probes alone.
    pub fn cleanup(&self) {
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => !entry.is_expired(),
            Slot::Pending { .. } => true,
        });
        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, remaining = slots.len(), "Result cache cleanup complete");
        }
    }

    /// Drops every slot. In-flight probes behave as with [`ResultCache::invalidate`].
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }

    /// Number of slots, counting expired entries and in-flight probes.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
