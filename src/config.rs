use std::path::PathBuf;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{ConfigurationError, Result, WebcheckerError};

const DEFAULT_CONFIG_FILE: &str = "webchecker.yaml";
const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../webchecker.yaml");
const REMOTE_CONFIG_URL_ENV: &str = "WEBCHECKER_REMOTE_CONFIG_URL";
const REMOTE_CONFIG_SCHEMES: &[&str] = &["https"];

lazy_static! {
    static ref ENV_VAR_PATTERN: regex::Regex =
        regex::Regex::new(r"\$\{\{\s*env\.(.*?)\s*\}\}").expect("env var pattern is valid");
}

/// Durations are written as (possibly fractional) seconds.
mod seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration in seconds: {}", secs)))
    }
}

/// Settings shared by every target, fixed at orchestrator construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSettings {
    /// Upper bound on a single probe, connect through response headers.
    #[serde(with = "seconds")]
    pub timeout: Duration,
    /// Interval for targets that do not set their own.
    #[serde(with = "seconds")]
    pub default_interval: Duration,
    /// Cap for the backoff interval after repeated failures.
    #[serde(with = "seconds")]
    pub max_interval: Duration,
    /// How long a probe result is reused before a target is probed again.
    #[serde(with = "seconds")]
    pub cache_ttl: Duration,
    pub max_redirects: usize,
    pub verify_ssl: bool,
    /// Results kept per target, oldest dropped first.
    pub history_limit: usize,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            default_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(600),
            cache_ttl: Duration::from_secs(5),
            max_redirects: 5,
            verify_ssl: true,
            history_limit: 1000,
        }
    }
}

impl CheckSettings {
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        for (name, value) in [
            ("timeout", self.timeout),
            ("default_interval", self.default_interval),
            ("max_interval", self.max_interval),
            ("cache_ttl", self.cache_ttl),
        ] {
            if value.is_zero() {
                return Err(ConfigurationError::ZeroDuration { name });
            }
        }
        if self.history_limit == 0 {
            return Err(ConfigurationError::ZeroHistoryLimit);
        }
        self.validate_interval(self.default_interval)
    }

    /// Checks a per-target interval against these settings.
    pub fn validate_interval(&self, interval: Duration) -> std::result::Result<(), ConfigurationError> {
        if interval.is_zero() {
            return Err(ConfigurationError::ZeroDuration { name: "interval" });
        }
        if self.max_interval < interval {
            return Err(ConfigurationError::MaxIntervalTooShort {
                interval,
                max: self.max_interval,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    #[serde(default, with = "optional_seconds", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

mod optional_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::seconds::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::seconds")] Duration);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(d)| d))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: CheckSettings,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

pub async fn load_config_from_sources<P: Into<PathBuf>>(path: P) -> Result<Config> {
    let remote_url = std::env::var(REMOTE_CONFIG_URL_ENV).ok();
    if let Some(remote_url) = remote_url {
        let remote_url = remote_url.trim().to_owned();
        if !remote_url.is_empty() {
            return load_config_from_remote_url(&remote_url, REMOTE_CONFIG_SCHEMES).await;
        }
    }

    load_config(path).await
}

async fn load_config_from_remote_url(url: &str, allowed_schemes: &[&str]) -> Result<Config> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebcheckerError::Other(format!("invalid {}: {}", REMOTE_CONFIG_URL_ENV, e)))?;
    if !allowed_schemes.contains(&parsed.scheme()) {
        return Err(WebcheckerError::Other(format!(
            "{} must be an {} URL, got: {}",
            REMOTE_CONFIG_URL_ENV,
            allowed_schemes.join(" or "),
            url
        )));
    }

    let response = reqwest::Client::new().get(parsed).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(WebcheckerError::Other(format!(
            "Remote config fetch failed ({}): {}",
            status.as_u16(),
            url
        )));
    }

    let content = response.text().await?;
    let replaced = replace_env_vars(&content);
    let config: Config = serde_json::from_str(&replaced)?;
    Ok(config)
}

pub async fn load_config<P: Into<PathBuf>>(path: P) -> Result<Config> {
    let requested_path = path.into();

    match tokio::fs::read_to_string(&requested_path).await {
        Ok(content) => {
            let replaced = replace_env_vars(&content);
            let config: Config = serde_yaml::from_str(&replaced)?;
            return Ok(config);
        }
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let is_default = requested_path
        .file_name()
        .is_some_and(|name| name == DEFAULT_CONFIG_FILE);

    if !is_default {
        return Err(WebcheckerError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!(
                "Config file not found: \"{}\" (expected {} or set {}=https://...)",
                requested_path.display(),
                DEFAULT_CONFIG_FILE,
                REMOTE_CONFIG_URL_ENV
            ),
        )));
    }

    info!(
        "Config file not found, creating default at {}",
        requested_path.display()
    );
    tokio::fs::write(&requested_path, DEFAULT_CONFIG_TEMPLATE).await?;

    let replaced = replace_env_vars(DEFAULT_CONFIG_TEMPLATE);
    let config: Config = serde_yaml::from_str(&replaced)?;
    Ok(config)
}

pub fn replace_env_vars(content: &str) -> String {
    let replaced = ENV_VAR_PATTERN.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                warn!(
                    "Environment variable {} not found, defaulting to empty string.",
                    var_name
                );
                "".to_string()
            }
        }
    });
    replaced.to_string()
}
