use anyhow::Result;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::fmt;
use std::time::{Duration, Instant};
use url::Url;

use super::cert::CertInspector;
use super::types::{CheckResult, SiteStatus, SslInfo, round_millis};

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const TLS_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_REDIRECTS: usize = 5;

const ACCEPT_HEADER: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Probes one website
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Always returns a complete result; failures become `DOWN`.
    async fn check_website(&self, url: &str) -> CheckResult;
}

/// HTTP probe plus certificate inspection for https targets
pub struct SiteProber {
    client: reqwest::Client,
    inspector: CertInspector,
}

impl SiteProber {
    /// `instance_url` identifies this monitor in the user agent.
    pub fn new(instance_url: &str) -> Result<Self> {
        Self::with_timeouts(instance_url, HTTP_TIMEOUT, TLS_TIMEOUT)
    }

    pub fn with_timeouts(instance_url: &str, http_timeout: Duration, tls_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HEADER));

        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent(instance_url))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, inspector: CertInspector::new(tls_timeout)? })
    }

    async fn probe_http(&self, url: &str) -> CheckResult {
        let start = Instant::now();
        let response = self.client.get(url).send().await;
        let elapsed = round_millis(start.elapsed().as_secs_f64() * 1000.0);

        match response {
            Ok(response) => classify(response.status().as_u16()).with_response_time(elapsed),
            Err(err) => {
                let message = error_chain(&err);
                tracing::debug!(url, "HTTP probe failed: {}", message);
                CheckResult::failed(message).with_response_time(elapsed)
            }
        }
    }

    async fn probe_certificate(&self, url: &Url) -> Option<SslInfo> {
        if url.scheme() != "https" {
            return None;
        }
        let host = url.host_str()?.trim_start_matches('[').trim_end_matches(']');
        let port = url.port_or_known_default().unwrap_or(443);

        match self.inspector.inspect(host, port).await {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::debug!(host, "Certificate inspection failed: {}", err);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Prober for SiteProber {
    async fn check_website(&self, url: &str) -> CheckResult {
        let parsed = match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() => parsed,
            _ => return CheckResult::failed("Invalid URL"),
        };

        let (result, ssl) = tokio::join!(self.probe_http(url), self.probe_certificate(&parsed));

        match ssl {
            Some(ssl) => result.with_ssl(ssl),
            None => result,
        }
    }
}

pub fn user_agent(instance_url: &str) -> String {
    format!("Pulsewatch/{} ({})", env!("CARGO_PKG_VERSION"), instance_url)
}

/// Map an HTTP status code to a site status
pub fn classify(code: u16) -> CheckResult {
    match code {
        200..=399 => CheckResult::new(SiteStatus::Up),
        400..=499 => CheckResult::new(SiteStatus::Error(Some(code))).with_error(format!("Client error: {code}")),
        500..=599 => CheckResult::new(SiteStatus::Error(Some(code))).with_error(format!("Server error: {code}")),
        _ => CheckResult::new(SiteStatus::Error(None)).with_error(format!("Unknown HTTP code: {code}")),
    }
}

/// The error and all of its sources, outermost first
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Coarse failure class shown to users instead of raw error text
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Connection,
    ServerError,
    Generic,
}

impl ErrorCategory {
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            ErrorCategory::Timeout
        } else if lower.contains("server error") {
            ErrorCategory::ServerError
        } else if lower.contains("connect") || lower.contains("dns") || lower.contains("resolve") {
            ErrorCategory::Connection
        } else {
            ErrorCategory::Generic
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Timeout => write!(f, "The website took too long to respond."),
            ErrorCategory::Connection => write!(f, "Could not connect to the website."),
            ErrorCategory::ServerError => write!(f, "The website returned a server error."),
            ErrorCategory::Generic => write!(f, "The check failed, please try again."),
        }
    }
}
