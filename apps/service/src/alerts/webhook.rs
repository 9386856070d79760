use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::{AlertError, Severity};

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const DISCORD_BLUE: u32 = 0x3B82F6;
const DISCORD_GREEN: u32 = 0x10B981;
const DISCORD_RED: u32 = 0xEF4444;
const DISCORD_ORANGE: u32 = 0xF59E0B;

const ALERT_TITLE: &str = "🔔 Website Monitoring Alert";
const TEST_TITLE: &str = "✅ Test Notification";

/// Flat webhook payload; the `type` tag selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertPayload {
    StatusChange {
        severity: Severity,
        site_id: i64,
        url: String,
        old_status: String,
        new_status: String,
        timestamp: String,
        unix_timestamp: i64,
        site_name: String,
    },
    SslExpiring {
        severity: Severity,
        site_id: i64,
        url: String,
        days_remaining: i64,
        expiry_date: Option<String>,
        issuer: Option<String>,
        urgency: Severity,
        timestamp: String,
        unix_timestamp: i64,
        site_name: String,
    },
    Test {
        severity: Severity,
        message: String,
        site: String,
        site_url: String,
        timestamp: String,
        unix_timestamp: i64,
        user: String,
    },
}

impl AlertPayload {
    pub fn severity(&self) -> Severity {
        match self {
            AlertPayload::StatusChange { severity, .. }
            | AlertPayload::SslExpiring { severity, .. }
            | AlertPayload::Test { severity, .. } => *severity,
        }
    }

    pub fn unix_timestamp(&self) -> i64 {
        match self {
            AlertPayload::StatusChange { unix_timestamp, .. }
            | AlertPayload::SslExpiring { unix_timestamp, .. }
            | AlertPayload::Test { unix_timestamp, .. } => *unix_timestamp,
        }
    }
}

/// Human-readable UTC timestamp used in payloads
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookProvider {
    Discord,
    Slack,
    Generic,
}

impl WebhookProvider {
    pub fn detect(webhook_url: &str) -> Self {
        if webhook_url.contains("discord.com") || webhook_url.contains("discordapp.com") {
            WebhookProvider::Discord
        } else if webhook_url.contains("slack.com") {
            WebhookProvider::Slack
        } else {
            WebhookProvider::Generic
        }
    }
}

/// Shape the payload for whichever service `webhook_url` points at.
pub fn format_payload(webhook_url: &str, payload: &AlertPayload, instance_url: &str) -> Result<Value, AlertError> {
    Ok(match WebhookProvider::detect(webhook_url) {
        WebhookProvider::Discord => discord_payload(payload),
        WebhookProvider::Slack => slack_payload(payload),
        WebhookProvider::Generic => generic_payload(payload, instance_url)?,
    })
}

fn footer() -> String {
    format!("Pulsewatch v{}", env!("CARGO_PKG_VERSION"))
}

fn discord_payload(payload: &AlertPayload) -> Value {
    let color = match payload.severity() {
        Severity::Critical => DISCORD_RED,
        Severity::Warning | Severity::Urgent => DISCORD_ORANGE,
        Severity::Resolved => DISCORD_GREEN,
        _ => DISCORD_BLUE,
    };
    let timestamp = DateTime::from_timestamp(payload.unix_timestamp(), 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, false);

    let mut title = ALERT_TITLE;
    let mut fields = Vec::new();
    let description = match payload {
        AlertPayload::StatusChange { url, old_status, new_status, severity, .. } => {
            fields.push(json!({"name": "Status Change", "value": format!("{old_status} → **{new_status}**"), "inline": false}));
            fields.push(json!({"name": "Severity", "value": severity, "inline": true}));
            format!("**{url}**")
        }
        AlertPayload::SslExpiring { url, days_remaining, expiry_date, issuer, .. } => {
            fields.push(json!({"name": "Website", "value": url, "inline": false}));
            fields.push(json!({"name": "Days Remaining", "value": format!("{days_remaining} days"), "inline": true}));
            if let Some(expiry_date) = expiry_date {
                fields.push(json!({"name": "Expires", "value": expiry_date, "inline": true}));
            }
            if let Some(issuer) = issuer {
                fields.push(json!({"name": "Issuer", "value": issuer, "inline": true}));
            }
            "**SSL Certificate Expiring**".to_string()
        }
        AlertPayload::Test { message, site, .. } => {
            title = TEST_TITLE;
            fields.push(json!({"name": "From", "value": site, "inline": true}));
            message.clone()
        }
    };

    json!({
        "embeds": [{
            "title": title,
            "description": description,
            "color": color,
            "timestamp": timestamp,
            "footer": {"text": footer()},
            "fields": fields,
        }]
    })
}

fn slack_payload(payload: &AlertPayload) -> Value {
    let color = match payload.severity() {
        Severity::Critical => "danger",
        Severity::Warning | Severity::Urgent => "warning",
        _ => "good",
    };

    let mut fields = Vec::new();
    let (title, text) = match payload {
        AlertPayload::StatusChange { url, old_status, new_status, severity, .. } => {
            fields.push(json!({"title": "Status Change", "value": format!("{old_status} → *{new_status}*"), "short": false}));
            fields.push(json!({"title": "Severity", "value": severity, "short": true}));
            (ALERT_TITLE, format!("*{url}*"))
        }
        AlertPayload::SslExpiring { url, days_remaining, expiry_date, .. } => {
            fields.push(json!({"title": "Days Remaining", "value": format!("{days_remaining} days"), "short": true}));
            if let Some(expiry_date) = expiry_date {
                fields.push(json!({"title": "Expires", "value": expiry_date, "short": true}));
            }
            ("⚠️ SSL Certificate Expiring", format!("*{url}*"))
        }
        AlertPayload::Test { message, site, .. } => {
            fields.push(json!({"title": "From", "value": site, "short": true}));
            (TEST_TITLE, message.clone())
        }
    };

    json!({
        "attachments": [{
            "color": color,
            "title": title,
            "text": text,
            "footer": footer(),
            "ts": payload.unix_timestamp(),
            "fields": fields,
        }]
    })
}

fn generic_payload(payload: &AlertPayload, instance_url: &str) -> Result<Value, AlertError> {
    let mut value = serde_json::to_value(payload)?;
    if let Value::Object(map) = &mut value {
        map.insert("plugin_version".into(), Value::String(env!("CARGO_PKG_VERSION").into()));
        map.insert("site_url".into(), Value::String(instance_url.into()));
    }
    Ok(value)
}

/// Delivers formatted webhook bodies
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn post(&self, webhook_url: &str, body: &Value) -> Result<(), AlertError>;
}

pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(user_agent: &str) -> Result<Self, AlertError> {
        Self::with_timeout(user_agent, WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(user_agent: &str, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(timeout).user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for WebhookClient {
    async fn post(&self, webhook_url: &str, body: &Value) -> Result<(), AlertError> {
        let response = self.client.post(webhook_url).json(body).send().await.map_err(|err| {
            tracing::error!("Webhook error - {}", err);
            AlertError::from(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "Webhook failed with HTTP {}", status.as_u16());
            tracing::debug!("Webhook response: {}", text.chars().take(500).collect::<String>());
            return Err(AlertError::WebhookRejected(status.as_u16()));
        }

        Ok(())
    }
}
