use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::monitoring::types::{SiteStatus, SslHealth};

/// A monitored website
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub url: String,
    pub notify_email: Option<String>,
    /// `None` until the first check
    pub status: Option<SiteStatus>,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time: Option<f64>,
    pub ssl_expiry_date: Option<DateTime<Utc>>,
    pub ssl_issuer: Option<String>,
    pub ssl_days_remaining: Option<i64>,
    pub check_count: i64,
    pub down_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    /// Uptime percentage over every recorded check, two decimals.
    pub fn uptime(&self) -> f64 {
        if self.check_count <= 0 {
            return 100.0;
        }
        let up = (self.check_count - self.down_count) as f64;
        let percent = up / self.check_count as f64 * 100.0;
        (percent * 100.0).round() / 100.0
    }

    /// Host part of the URL, or the raw URL if it does not parse
    pub fn host(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone())
    }

    pub fn ssl_health(&self) -> SslHealth {
        SslHealth::from_days(self.ssl_days_remaining)
    }

    pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
        time.timestamp()
    }

    pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(timestamp, 0).single().unwrap_or_default()
    }
}

/// Column a site listing is sorted by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum OrderBy {
    Id,
    Url,
    Status,
    LastChecked,
    #[default]
    CreatedAt,
}

impl OrderBy {
    pub fn column(self) -> &'static str {
        match self {
            OrderBy::Id => "id",
            OrderBy::Url => "url",
            OrderBy::Status => "status",
            OrderBy::LastChecked => "last_checked",
            OrderBy::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl Order {
    pub fn keyword(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Listing filter; the default lists every site newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteFilter {
    pub order_by: OrderBy,
    pub order: Order,
    pub limit: Option<u32>,
    /// Exact status text, e.g. `UP` or `ERROR 503`
    pub status: Option<String>,
}

/// Aggregate counters across all sites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total: i64,
    pub up: i64,
    pub down: i64,
    pub error: i64,
    pub unknown: i64,
    pub ssl_expiring_soon: i64,
}

/// Something an update detected that alerting should react to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SiteEvent {
    StatusChanged {
        site_id: i64,
        url: String,
        old_status: Option<SiteStatus>,
        new_status: SiteStatus,
    },
    SslExpiring {
        site_id: i64,
        url: String,
        days_remaining: i64,
    },
}

impl fmt::Display for SiteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteEvent::StatusChanged { url, old_status, new_status, .. } => {
                let old = old_status.as_ref().map(ToString::to_string);
                write!(f, "{url}: {} -> {new_status}", old.as_deref().unwrap_or("UNKNOWN"))
            }
            SiteEvent::SslExpiring { url, days_remaining, .. } => {
                write!(f, "{url}: certificate expires in {days_remaining} days")
            }
        }
    }
}

/// Outcome of a committed status update
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// The row as it reads after the update
    pub site: Site,
    pub events: Vec<SiteEvent>,
}

/// Summary written after every batch run that found due sites
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub timestamp: DateTime<Utc>,
    pub checked: u32,
    pub failed: u32,
    /// Seconds, two decimals
    pub duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(check_count: i64, down_count: i64) -> Site {
        Site {
            id: 1,
            url: "https://shop.example.com/cart".into(),
            notify_email: None,
            status: None,
            last_checked: None,
            response_time: None,
            ssl_expiry_date: None,
            ssl_issuer: None,
            ssl_days_remaining: None,
            check_count,
            down_count,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_uptime_defaults_to_full_without_checks() {
        assert_eq!(site(0, 0).uptime(), 100.0);
    }

    #[test]
    fn test_uptime_is_rounded_to_two_decimals() {
        assert_eq!(site(3, 1).uptime(), 66.67);
        assert_eq!(site(4, 4).uptime(), 0.0);
    }

    #[test]
    fn test_host_falls_back_to_raw_url() {
        assert_eq!(site(0, 0).host(), "shop.example.com");

        let mut broken = site(0, 0);
        broken.url = "not a url".into();
        assert_eq!(broken.host(), "not a url");
    }

    #[test]
    fn test_status_change_event_display() {
        let event = SiteEvent::StatusChanged {
            site_id: 1,
            url: "https://a.example".into(),
            old_status: None,
            new_status: SiteStatus::Down,
        };
        assert_eq!(event.to_string(), "https://a.example: UNKNOWN -> DOWN");
    }
}
