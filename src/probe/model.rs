use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A URL under monitoring together with its check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTarget {
    /// Normalized URL, also the key for cache, history and scheduling.
    pub url: String,
    pub interval: Duration,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    Timeout,
    ConnectionRefused,
    TlsError,
    DnsError,
    Unknown,
}

impl ProbeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::ConnectionRefused => "connection_refused",
            ProbeErrorKind::TlsError => "tls_error",
            ProbeErrorKind::DnsError => "dns_error",
            ProbeErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed probe, recorded as data on the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
    pub is_valid: bool,
}

/// Outcome of a single check. Never mutated after the prober builds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<ProbeError>,
    pub latency: Duration,
    pub certificate: Option<CertificateInfo>,
    pub content_type: Option<String>,
    pub server: Option<String>,
    pub content_length: Option<u64>,
    pub redirect_url: Option<String>,
}

impl ProbeResult {
    pub fn failure(
        url: impl Into<String>,
        kind: ProbeErrorKind,
        message: impl Into<String>,
        latency: Duration,
    ) -> ProbeResult {
        ProbeResult {
            url: url.into(),
            timestamp: Utc::now(),
            success: false,
            status_code: None,
            error: Some(ProbeError {
                kind,
                message: message.into(),
            }),
            latency,
            certificate: None,
            content_type: None,
            server: None,
            content_length: None,
            redirect_url: None,
        }
    }

    pub fn error_kind(&self) -> Option<ProbeErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Per-target scheduling phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPhase {
    Idle,
    Probing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStatistics {
    pub total_checks: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of checks with a 2xx/3xx response.
    pub success_rate: f64,
    /// Percentage of successful checks.
    pub uptime_percentage: f64,
    /// Latency figures only cover checks that got a response.
    pub avg_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub last_check: Option<DateTime<Utc>>,
}
