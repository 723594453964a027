use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Span, Status, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_http::HeaderInjector;
use opentelemetry_semantic_conventions::trace::{HTTP_RESPONSE_STATUS_CODE, URL_FULL};
use reqwest::header::{CONTENT_TYPE, SERVER};
use reqwest::tls::TlsInfo;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::certificate::parse_certificate;
use super::model::{ProbeErrorKind, ProbeResult};
use super::Prober;
use crate::config::CheckSettings;

const USER_AGENT: &str = concat!("webchecker/", env!("CARGO_PKG_VERSION"));

/// Probes targets with a GET request over a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(settings: &CheckSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .tls_info(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    fn build_result(url: &str, response: &reqwest::Response, latency: Duration) -> ProbeResult {
        let status = response.status();
        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        let final_url = response.url().as_str();
        let redirected =
            reqwest::Url::parse(url).map_or(true, |requested| requested != *response.url());
        let certificate = if final_url.starts_with("https://") {
            response
                .extensions()
                .get::<TlsInfo>()
                .and_then(|info| info.peer_certificate())
                .and_then(|der| parse_certificate(der, Utc::now()))
        } else {
            None
        };

        ProbeResult {
            url: url.to_owned(),
            timestamp: Utc::now(),
            success: status.is_success() || status.is_redirection(),
            status_code: Some(status.as_u16()),
            error: None,
            latency,
            certificate,
            content_type: header(CONTENT_TYPE),
            server: header(SERVER),
            content_length: response.content_length(),
            redirect_url: redirected.then(|| final_url.to_owned()),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip(self))]
    async fn probe(&self, url: &str) -> ProbeResult {
        let tracer = global::tracer("webchecker");
        let mut span = tracer.start("probe");
        span.set_attribute(KeyValue::new(URL_FULL, url.to_owned()));
        let cx = Context::current_with_span(span);

        let mut headers = http::HeaderMap::new();
        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(&cx, &mut HeaderInjector(&mut headers))
        });

        let mut request = self.client.get(url);
        for (name, value) in headers.iter() {
            request = request.header(name.as_str(), value.as_bytes());
        }

        let start = Instant::now();
        let outcome = request.send().await;
        let latency = start.elapsed();

        let result = match outcome {
            Ok(response) => Self::build_result(url, &response, latency),
            Err(e) => {
                let kind = classify_error(&e, url.starts_with("https://"));
                debug!(%kind, error = %e, "Probe failed");
                ProbeResult::failure(url, kind, e.to_string(), latency)
            }
        };

        let span = cx.span();
        if let Some(code) = result.status_code {
            span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, code as i64));
        }
        if let Some(error) = &result.error {
            span.set_status(Status::error(error.message.clone()));
        }
        span.end();

        result
    }
}

/// Maps a transport error onto the probe error taxonomy by walking its
/// source chain. The outermost layer is skipped since it embeds the URL.
pub fn classify_error(error: &reqwest::Error, secure: bool) -> ProbeErrorKind {
    if error.is_timeout() {
        return ProbeErrorKind::Timeout;
    }

    let mut tcp_failure = false;
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return ProbeErrorKind::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return ProbeErrorKind::Timeout,
                _ => {}
            }
        }
        let message = err.to_string();
        if let Some(kind) = classify_message(&message) {
            return kind;
        }
        tcp_failure |= message.contains("tcp connect error");
        source = err.source();
    }

    // the TCP connection came up, so the connector failed during the handshake
    if secure && error.is_connect() && !tcp_failure {
        return ProbeErrorKind::TlsError;
    }
    ProbeErrorKind::Unknown
}

fn classify_message(message: &str) -> Option<ProbeErrorKind> {
    let message = message.to_lowercase();
    if message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("no such host")
    {
        Some(ProbeErrorKind::DnsError)
    } else if message.contains("connection refused") {
        Some(ProbeErrorKind::ConnectionRefused)
    } else if message.contains("certificate")
        || message.contains("tls")
        || message.contains("ssl")
        || message.contains("handshake")
    {
        Some(ProbeErrorKind::TlsError)
    } else {
        None
    }
}

#[cfg(test)]
mod http_probe_tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn prober_with_timeout(timeout: Duration) -> HttpProber {
        HttpProber::new(&CheckSettings {
            timeout,
            ..CheckSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_probe_records_status_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("server", "mock-server")
                    .set_body_string("ok"),
            )
            .mount(&server)
            .await;

        let url = format!("{}/health", server.uri());
        let result = prober_with_timeout(Duration::from_secs(5)).probe(&url).await;

        assert!(result.success);
        assert_eq!(Some(200), result.status_code);
        assert!(result.error.is_none());
        assert!(result.latency > Duration::ZERO);
        assert_eq!(Some("mock-server".to_owned()), result.server);
        assert!(result
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("text/plain")));
        assert_eq!(Some(2), result.content_length);
        assert!(result.certificate.is_none());
        assert!(result.redirect_url.is_none());
        assert_eq!(url, result.url);
    }

    #[tokio::test]
    async fn test_server_error_is_unsuccessful_but_not_a_probe_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = prober_with_timeout(Duration::from_secs(5))
            .probe(&format!("{}/", server.uri()))
            .await;

        assert!(!result.success);
        assert_eq!(Some(503), result.status_code);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_follows_redirects_and_records_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", "/new"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = prober_with_timeout(Duration::from_secs(5))
            .probe(&format!("{}/old", server.uri()))
            .await;

        assert!(result.success);
        assert_eq!(Some(200), result.status_code);
        assert_eq!(Some(format!("{}/new", server.uri())), result.redirect_url);
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let result = prober_with_timeout(Duration::from_millis(200))
            .probe(&format!("{}/", server.uri()))
            .await;

        assert!(!result.success);
        assert_eq!(Some(ProbeErrorKind::Timeout), result.error_kind());
        assert!(result.status_code.is_none());
    }

    #[tokio::test]
    async fn test_closed_port_is_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = prober_with_timeout(Duration::from_secs(5))
            .probe(&format!("http://127.0.0.1:{}/", port))
            .await;

        assert!(!result.success);
        assert_eq!(Some(ProbeErrorKind::ConnectionRefused), result.error_kind());
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_dns_error() {
        let result = prober_with_timeout(Duration::from_secs(10))
            .probe("http://nonexistent.invalid/")
            .await;

        assert!(!result.success);
        assert_eq!(Some(ProbeErrorKind::DnsError), result.error_kind());
    }

    #[tokio::test]
    async fn test_tls_to_plain_http_server_is_tls_error() {
        let server = MockServer::start().await;
        let https_url = server.uri().replacen("http://", "https://", 1);

        let result = prober_with_timeout(Duration::from_secs(5))
            .probe(&format!("{}/", https_url))
            .await;

        assert!(!result.success);
        assert_eq!(Some(ProbeErrorKind::TlsError), result.error_kind());
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            Some(ProbeErrorKind::DnsError),
            classify_message("dns error: failed to lookup address information")
        );
        assert_eq!(
            Some(ProbeErrorKind::ConnectionRefused),
            classify_message("tcp connect error: Connection refused (os error 111)")
        );
        assert_eq!(
            Some(ProbeErrorKind::TlsError),
            classify_message("error:0A00010B:SSL routines:ssl3_get_record:wrong version number")
        );
        assert_eq!(None, classify_message("connection closed before message completed"));
    }

    #[tokio::test]
    #[ignore = "requires internet access"]
    async fn test_live_https_probe_reads_certificate() {
        let result = prober_with_timeout(Duration::from_secs(10))
            .probe("https://example.com/")
            .await;

        assert!(result.success);
        assert_eq!(Some(200), result.status_code);
        assert!(result.latency > Duration::ZERO);
        let certificate = result.certificate.expect("https probe should capture the certificate");
        assert!(certificate.is_valid);
    }
}
