pub mod backoff;
pub mod cache;
pub mod certificate;
pub mod http_probe;
pub mod model;
pub mod schedule;
pub mod stats;
pub mod validate;

use async_trait::async_trait;

use model::ProbeResult;

/// One network check of a URL. Implementations never fail: every outcome,
/// including transport errors, is reported inside the returned result.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}
