/// Alert dispatch
///
/// Turns [`SiteEvent`]s into emails and webhook posts. Email goes to the
/// site's own address or the admin; the webhook is sent independently when
/// one is configured. SSL warnings are rate limited per site with a marker
/// in the option store.
pub mod email;
pub mod webhook;

pub use email::{Email, Mailer, SmtpMailer};
pub use webhook::{AlertPayload, WebhookClient, WebhookSender};

use chrono::{Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::InstanceConfig;
use crate::database::models::{Site, SiteEvent};
use crate::database::{OptionStore, StoreError};
use crate::monitoring::types::{SSL_CRITICAL_DAYS, SSL_WARNING_DAYS, SiteStatus};
use crate::settings::Settings;

/// How long one SSL warning silences further warnings for the same site
const SSL_WARNING_SUPPRESSION_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("no webhook URL configured")]
    WebhookNotConfigured,
    #[error("webhook request failed: {0}")]
    WebhookTransport(#[from] reqwest::Error),
    #[error("webhook returned HTTP {0}")]
    WebhookRejected(u16),
    #[error("invalid email address: {0}")]
    InvalidAddress(String),
    #[error("email delivery failed: {0}")]
    Email(String),
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Error,
    Resolved,
    Info,
    Urgent,
    Warning,
}

impl Severity {
    /// Severity of a status transition
    pub fn for_transition(old_status: Option<&SiteStatus>, new_status: &SiteStatus) -> Self {
        match new_status {
            SiteStatus::Down => Severity::Critical,
            SiteStatus::Error(_) => Severity::Error,
            SiteStatus::Up if old_status.is_some_and(SiteStatus::is_problem) => Severity::Resolved,
            SiteStatus::Up => Severity::Info,
        }
    }

    /// Urgency of an expiring certificate
    pub fn for_ssl_days(days_remaining: i64) -> Self {
        if days_remaining <= SSL_CRITICAL_DAYS { Severity::Urgent } else { Severity::Warning }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Resolved => "RESOLVED",
            Severity::Info => "INFO",
            Severity::Urgent => "URGENT",
            Severity::Warning => "WARNING",
        };
        f.write_str(label)
    }
}

/// Which channels delivered an alert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertOutcome {
    pub email_sent: bool,
    pub webhook_sent: bool,
}

fn ssl_marker_key(site_id: i64) -> String {
    format!("ssl_warning_{site_id}")
}

pub struct AlertDispatcher {
    mailer: Arc<dyn Mailer>,
    webhooks: Arc<dyn WebhookSender>,
    options: Arc<dyn OptionStore>,
    instance: InstanceConfig,
}

impl AlertDispatcher {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        webhooks: Arc<dyn WebhookSender>,
        options: Arc<dyn OptionStore>,
        instance: InstanceConfig,
    ) -> Self {
        Self { mailer, webhooks, options, instance }
    }

    /// React to one event for `site` (the row as stored after the update).
    ///
    /// `None` means the alert was suppressed.
    pub async fn dispatch(
        &self,
        site: &Site,
        event: &SiteEvent,
        settings: &Settings,
    ) -> Result<Option<AlertOutcome>, AlertError> {
        match event {
            SiteEvent::StatusChanged { old_status, new_status, .. } => {
                Ok(Some(self.handle_status_change(site, old_status.as_ref(), new_status, settings).await))
            }
            SiteEvent::SslExpiring { days_remaining, .. } => {
                self.handle_ssl_expiring(site, *days_remaining, settings).await
            }
        }
    }

    pub async fn handle_status_change(
        &self,
        site: &Site,
        old_status: Option<&SiteStatus>,
        new_status: &SiteStatus,
        settings: &Settings,
    ) -> AlertOutcome {
        let severity = Severity::for_transition(old_status, new_status);
        let now = Utc::now();

        let subject = email::status_alert_subject(site);
        let body = email::status_alert_body(site, old_status, new_status, severity, now, &self.instance);
        let email_sent = self.send_email(site, subject, body).await;

        let payload = AlertPayload::StatusChange {
            severity,
            site_id: site.id,
            url: site.url.clone(),
            old_status: old_status.map(ToString::to_string).unwrap_or_else(|| "UNKNOWN".into()),
            new_status: new_status.to_string(),
            timestamp: webhook::format_timestamp(now),
            unix_timestamp: now.timestamp(),
            site_name: self.instance.name.clone(),
        };
        let webhook_sent = self.send_webhook(settings, &payload).await;

        info!(
            site_id = site.id,
            "Status change alert sent for {} - Status: {} → {} (Email: {}, Webhook: {})",
            site.url,
            old_status.map(ToString::to_string).unwrap_or_else(|| "UNKNOWN".into()),
            new_status,
            if email_sent { "sent" } else { "failed" },
            if webhook_sent { "sent" } else { "skipped/failed" },
        );

        AlertOutcome { email_sent, webhook_sent }
    }

    /// Warn about an expiring certificate unless a warning for this site is
    /// younger than a day.
    pub async fn handle_ssl_expiring(
        &self,
        site: &Site,
        days_remaining: i64,
        settings: &Settings,
    ) -> Result<Option<AlertOutcome>, AlertError> {
        if days_remaining <= 0 || days_remaining > SSL_WARNING_DAYS {
            return Ok(None);
        }

        let marker = ssl_marker_key(site.id);
        if self.options.get(&marker).await?.is_some() {
            debug!(site_id = site.id, "SSL warning for {} suppressed by cooldown", site.url);
            return Ok(None);
        }

        let urgency = Severity::for_ssl_days(days_remaining);
        let now = Utc::now();

        let subject = email::ssl_alert_subject(site, urgency);
        let body = email::ssl_alert_body(site, days_remaining, urgency, &self.instance);
        let email_sent = self.send_email(site, subject, body).await;

        let payload = AlertPayload::SslExpiring {
            severity: urgency,
            site_id: site.id,
            url: site.url.clone(),
            days_remaining,
            expiry_date: site.ssl_expiry_date.map(webhook::format_timestamp),
            issuer: site.ssl_issuer.clone(),
            urgency,
            timestamp: webhook::format_timestamp(now),
            unix_timestamp: now.timestamp(),
            site_name: self.instance.name.clone(),
        };
        let webhook_sent = self.send_webhook(settings, &payload).await;

        self.options
            .put(&marker, "1", Some(now + Duration::hours(SSL_WARNING_SUPPRESSION_HOURS)))
            .await?;

        info!(
            site_id = site.id,
            "SSL expiring alert sent for {} - {} days remaining (Email: {}, Webhook: {})",
            site.url,
            days_remaining,
            if email_sent { "sent" } else { "failed" },
            if webhook_sent { "sent" } else { "skipped/failed" },
        );

        Ok(Some(AlertOutcome { email_sent, webhook_sent }))
    }

    /// Send a `test` payload through the normal formatting and transport.
    pub async fn send_test_webhook(&self, webhook_url: &str, user: &str) -> Result<(), AlertError> {
        let webhook_url = webhook_url.trim();
        if webhook_url.is_empty() {
            return Err(AlertError::WebhookNotConfigured);
        }

        let now = Utc::now();
        let payload = AlertPayload::Test {
            severity: Severity::Info,
            message: "Test notification from Pulsewatch".into(),
            site: self.instance.name.clone(),
            site_url: self.instance.url.clone(),
            timestamp: webhook::format_timestamp(now),
            unix_timestamp: now.timestamp(),
            user: user.to_string(),
        };

        let body = webhook::format_payload(webhook_url, &payload, &self.instance.url)?;
        self.webhooks.post(webhook_url, &body).await
    }

    async fn send_email(&self, site: &Site, subject: String, body: String) -> bool {
        let Some(to) = email::alert_recipient(site, &self.instance.admin_email) else {
            error!(site_id = site.id, "No valid email address for alert");
            return false;
        };

        match self.mailer.send(&Email { to: to.clone(), subject, body }).await {
            Ok(()) => true,
            Err(err) => {
                error!(site_id = site.id, "Failed to send email alert to {}: {}", to, err);
                false
            }
        }
    }

    async fn send_webhook(&self, settings: &Settings, payload: &AlertPayload) -> bool {
        let Some(webhook_url) = settings.webhook_url() else {
            return false;
        };

        let body = match webhook::format_payload(webhook_url, payload, &self.instance.url) {
            Ok(body) => body,
            Err(err) => {
                warn!("Could not format webhook payload: {}", err);
                return false;
            }
        };

        self.webhooks.post(webhook_url, &body).await.is_ok()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingMailer, RecordingWebhook};
    use super::*;
    use crate::database::testing::create_test_store;
    use anyhow::Result;

    fn instance() -> InstanceConfig {
        InstanceConfig {
            name: "Agency Monitor".into(),
            url: "https://monitor.example".into(),
            admin_email: "admin@agency.example".into(),
        }
    }

    fn site(notify_email: Option<&str>) -> Site {
        let now = Utc::now();
        Site {
            id: 11,
            url: "https://shop.example".into(),
            notify_email: notify_email.map(str::to_string),
            status: Some(SiteStatus::Down),
            last_checked: Some(now),
            response_time: Some(120.0),
            ssl_expiry_date: Some(now + chrono::Duration::days(5)),
            ssl_issuer: Some("Let's Encrypt".into()),
            ssl_days_remaining: Some(5),
            check_count: 4,
            down_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn with_webhook(url: &str) -> Settings {
        Settings { webhook_url: Some(url.into()), ..Settings::default() }
    }

    struct Harness {
        dispatcher: AlertDispatcher,
        mailer: Arc<RecordingMailer>,
        webhooks: Arc<RecordingWebhook>,
        _dir: tempfile::TempDir,
    }

    async fn harness(mailer: RecordingMailer) -> Result<Harness> {
        let (store, dir) = create_test_store().await?;
        let mailer = Arc::new(mailer);
        let webhooks = Arc::new(RecordingWebhook::default());
        let dispatcher = AlertDispatcher::new(mailer.clone(), webhooks.clone(), Arc::new(store), instance());
        Ok(Harness { dispatcher, mailer, webhooks, _dir: dir })
    }

    #[test]
    fn test_transition_severity() {
        use SiteStatus::*;
        assert_eq!(Severity::for_transition(Some(&Up), &Down), Severity::Critical);
        assert_eq!(Severity::for_transition(None, &Down), Severity::Critical);
        assert_eq!(Severity::for_transition(Some(&Up), &Error(Some(500))), Severity::Error);
        assert_eq!(Severity::for_transition(Some(&Down), &Up), Severity::Resolved);
        assert_eq!(Severity::for_transition(Some(&Error(None)), &Up), Severity::Resolved);
        assert_eq!(Severity::for_transition(None, &Up), Severity::Info);
    }

    #[test]
    fn test_ssl_urgency() {
        assert_eq!(Severity::for_ssl_days(1), Severity::Urgent);
        assert_eq!(Severity::for_ssl_days(7), Severity::Urgent);
        assert_eq!(Severity::for_ssl_days(8), Severity::Warning);
        assert_eq!(Severity::for_ssl_days(30).to_string(), "WARNING");
    }

    #[tokio::test]
    async fn test_status_change_prefers_site_address() -> Result<()> {
        let h = harness(RecordingMailer::default()).await?;
        let site = site(Some("client@shop.example"));

        let outcome = h
            .dispatcher
            .handle_status_change(&site, Some(&SiteStatus::Up), &SiteStatus::Down, &Settings::default())
            .await;

        assert_eq!(outcome, AlertOutcome { email_sent: true, webhook_sent: false });
        let sent = h.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "client@shop.example");
        assert_eq!(sent[0].subject, "[Pulsewatch] Status Alert: shop.example");
        assert!(sent[0].body.starts_with("Website Monitoring Alert - CRITICAL"));
        assert!(h.webhooks.posted.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_webhook_still_sent_when_email_fails() -> Result<()> {
        let h = harness(RecordingMailer { fail: true, ..Default::default() }).await?;

        let outcome = h
            .dispatcher
            .handle_status_change(
                &site(None),
                Some(&SiteStatus::Down),
                &SiteStatus::Up,
                &with_webhook("https://example.com/hook"),
            )
            .await;

        assert_eq!(outcome, AlertOutcome { email_sent: false, webhook_sent: true });
        let posted = h.webhooks.posted.lock().unwrap();
        assert_eq!(posted[0].0, "https://example.com/hook");
        assert_eq!(posted[0].1["type"], "status_change");
        assert_eq!(posted[0].1["severity"], "RESOLVED");
        assert_eq!(posted[0].1["old_status"], "DOWN");
        assert_eq!(posted[0].1["new_status"], "UP");
        Ok(())
    }

    #[tokio::test]
    async fn test_ssl_warning_respects_cooldown() -> Result<()> {
        let h = harness(RecordingMailer::default()).await?;
        let site = site(None);
        let event = SiteEvent::SslExpiring { site_id: site.id, url: site.url.clone(), days_remaining: 5 };
        let settings = with_webhook("https://discord.com/api/webhooks/1/x");

        let first = h.dispatcher.dispatch(&site, &event, &settings).await?;
        assert_eq!(first, Some(AlertOutcome { email_sent: true, webhook_sent: true }));

        let second = h.dispatcher.dispatch(&site, &event, &settings).await?;
        assert_eq!(second, None);

        let sent = h.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "admin@agency.example");
        assert_eq!(sent[0].subject, "[Pulsewatch] URGENT: SSL Certificate Expiring - shop.example");
        assert_eq!(h.webhooks.posted.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_ssl_marker_set_even_when_delivery_fails() -> Result<()> {
        let h = harness(RecordingMailer { fail: true, ..Default::default() }).await?;
        let site = site(None);

        let first = h.dispatcher.handle_ssl_expiring(&site, 20, &Settings::default()).await?;
        assert_eq!(first, Some(AlertOutcome::default()));
        assert_eq!(h.dispatcher.handle_ssl_expiring(&site, 20, &Settings::default()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_ssl_marker_lasts_one_day_regardless_of_cooldown() -> Result<()> {
        let h = harness(RecordingMailer::default()).await?;
        let site = site(None);
        let settings = Settings { notification_cooldown: 168, ..Settings::default() };

        let before = Utc::now();
        h.dispatcher.handle_ssl_expiring(&site, 12, &settings).await?;

        let record = h.dispatcher.options.get_record(&ssl_marker_key(site.id)).await?.expect("marker");
        let expires_at = record.expires_at.expect("marker expiry");
        assert!(expires_at >= before + Duration::hours(24) - Duration::seconds(1));
        assert!(expires_at <= Utc::now() + Duration::hours(24));
        Ok(())
    }

    #[tokio::test]
    async fn test_ssl_outside_window_is_ignored() -> Result<()> {
        let h = harness(RecordingMailer::default()).await?;
        let site = site(None);

        for days in [0, -3, 31, 365] {
            assert_eq!(h.dispatcher.handle_ssl_expiring(&site, days, &Settings::default()).await?, None);
        }
        assert!(h.mailer.sent.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_test_webhook() -> Result<()> {
        let h = harness(RecordingMailer::default()).await?;

        assert!(matches!(
            h.dispatcher.send_test_webhook("  ", "admin").await,
            Err(AlertError::WebhookNotConfigured)
        ));

        h.dispatcher.send_test_webhook("https://hooks.slack.com/services/T/B/X", "admin").await?;
        let posted = h.webhooks.posted.lock().unwrap();
        assert_eq!(posted[0].1["attachments"][0]["text"], "Test notification from Pulsewatch");
        Ok(())
    }
}
