use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Certificates expiring within this many days raise a warning.
pub const SSL_WARNING_DAYS: i64 = 30;
/// Certificates expiring within this many days are urgent.
pub const SSL_CRITICAL_DAYS: i64 = 7;

/// Status of a monitored site as persisted in the store.
///
/// Rendered as `UP`, `DOWN`, `ERROR <code>` or a bare `ERROR` when the HTTP
/// code was outside every known range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SiteStatus {
    Up,
    Down,
    Error(Option<u16>),
}

impl SiteStatus {
    /// `DOWN` and every `ERROR` variant count against uptime and alert on
    /// the very first check.
    pub fn is_problem(&self) -> bool {
        matches!(self, SiteStatus::Down | SiteStatus::Error(_))
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteStatus::Up => write!(f, "UP"),
            SiteStatus::Down => write!(f, "DOWN"),
            SiteStatus::Error(Some(code)) => write!(f, "ERROR {code}"),
            SiteStatus::Error(None) => write!(f, "ERROR"),
        }
    }
}

impl FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "UP" => Ok(SiteStatus::Up),
            "DOWN" => Ok(SiteStatus::Down),
            other => match other.strip_prefix("ERROR") {
                Some(code) => Ok(SiteStatus::Error(code.trim().parse().ok())),
                None => Err(format!("unknown site status '{other}'")),
            },
        }
    }
}

impl From<SiteStatus> for String {
    fn from(status: SiteStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for SiteStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, <SiteStatus as TryFrom<String>>::Error> {
        value.parse()
    }
}

/// Certificate details captured during a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SslInfo {
    pub expiry_date: DateTime<Utc>,
    pub issuer: String,
    /// Whole days until expiry, negative once expired
    pub days_remaining: i64,
}

/// Result of probing one site.
///
/// Every field is always present; absent measurements are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: SiteStatus,

    /// Elapsed wall clock in milliseconds, two decimals
    pub response_time: Option<f64>,

    pub ssl_expiry_date: Option<DateTime<Utc>>,
    pub ssl_issuer: Option<String>,
    pub ssl_days_remaining: Option<i64>,

    pub error_message: Option<String>,
}

impl CheckResult {
    /// Create a result with the given status and nothing measured
    pub fn new(status: SiteStatus) -> Self {
        Self {
            status,
            response_time: None,
            ssl_expiry_date: None,
            ssl_issuer: None,
            ssl_days_remaining: None,
            error_message: None,
        }
    }

    /// A `DOWN` result carrying only an error message
    pub fn failed(error: impl Into<String>) -> Self {
        let mut result = Self::new(SiteStatus::Down);
        result.error_message = Some(error.into());
        result
    }

    pub fn with_response_time(mut self, response_time: f64) -> Self {
        self.response_time = Some(response_time);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    /// Attach certificate details
    pub fn with_ssl(mut self, ssl: SslInfo) -> Self {
        self.ssl_expiry_date = Some(ssl.expiry_date);
        self.ssl_issuer = Some(ssl.issuer);
        self.ssl_days_remaining = Some(ssl.days_remaining);
        self
    }

    /// Reject structurally inconsistent results before they reach the store.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(time) = self.response_time {
            if !time.is_finite() || time < 0.0 {
                return Err(format!("invalid response time {time}"));
            }
        }

        let ssl_fields = [
            self.ssl_expiry_date.is_some(),
            self.ssl_issuer.is_some(),
            self.ssl_days_remaining.is_some(),
        ];
        if ssl_fields.iter().any(|set| *set) && !ssl_fields.iter().all(|set| *set) {
            return Err("SSL fields must be all present or all absent".to_string());
        }

        Ok(())
    }
}

/// Certificate health bucket derived from the remaining days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslHealth {
    /// No certificate data (plain HTTP or inspection failed)
    None,
    Expired,
    Critical,
    Warning,
    Safe,
}

impl SslHealth {
    pub fn from_days(days_remaining: Option<i64>) -> Self {
        match days_remaining {
            None => SslHealth::None,
            Some(days) if days < 0 => SslHealth::Expired,
            Some(days) if days <= SSL_CRITICAL_DAYS => SslHealth::Critical,
            Some(days) if days <= SSL_WARNING_DAYS => SslHealth::Warning,
            Some(_) => SslHealth::Safe,
        }
    }
}

impl fmt::Display for SslHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SslHealth::None => write!(f, "NO SSL"),
            SslHealth::Expired => write!(f, "EXPIRED"),
            SslHealth::Critical => write!(f, "CRITICAL"),
            SslHealth::Warning => write!(f, "WARNING"),
            SslHealth::Safe => write!(f, "SAFE"),
        }
    }
}

/// Round a millisecond measurement to two decimals
pub fn round_millis(millis: f64) -> f64 {
    (millis * 100.0).round() / 100.0
}
