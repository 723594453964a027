//! Syntactic URL checks performed before a target is scheduled.

use std::net::IpAddr;

use url::{ParseError, Url};

use crate::errors::ValidationError;

const SUPPORTED_SCHEMES: [&str; 2] = ["http", "https"];

/// Validates a candidate URL and returns its normalized form.
///
/// Only `http` and `https` are accepted, the host must be a DNS name,
/// `localhost` or an IP literal. Normalization is whatever the URL parser
/// produces: lowercase scheme and host, `/` as the default path.
pub fn validate_url(input: &str) -> Result<String, ValidationError> {
    let candidate = input.trim();
    if candidate.is_empty() {
        return Err(ValidationError::Empty);
    }

    if !candidate.contains("://") {
        return Err(ValidationError::MissingScheme(candidate.to_owned()));
    }

    let parsed = Url::parse(candidate).map_err(|e| match e {
        ParseError::EmptyHost => ValidationError::MissingHost(candidate.to_owned()),
        other => ValidationError::Malformed(format!("{}: {}", candidate, other)),
    })?;

    let scheme = parsed.scheme();
    if !SUPPORTED_SCHEMES.contains(&scheme) {
        return Err(ValidationError::UnsupportedScheme(scheme.to_owned()));
    }

    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h,
        _ => return Err(ValidationError::MissingHost(candidate.to_owned())),
    };

    if !is_valid_host(host) {
        return Err(ValidationError::InvalidHost(host.to_owned()));
    }

    Ok(parsed.to_string())
}

/// Whether a URL validates and uses TLS.
pub fn is_secure(input: &str) -> bool {
    validate_url(input)
        .map(|url| url.starts_with("https://"))
        .unwrap_or(false)
}

fn is_valid_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }

    // IPv6 literals keep their brackets in host_str
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return true;
    }

    let host = host.strip_suffix('.').unwrap_or(host);
    if host.len() > 253 || !host.contains('.') {
        return false;
    }

    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
