use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{AlertError, Severity};
use crate::config::{InstanceConfig, SmtpConfig};
use crate::database::models::Site;
use crate::monitoring::types::SiteStatus;
use crate::validation::Validator;

/// Sender address used when no admin address is configured
const FALLBACK_FROM: &str = "pulsewatch@localhost";

/// A plain text alert email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), AlertError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(smtp: &SmtpConfig, instance: &InstanceConfig) -> Result<Self, AlertError> {
        let mut builder = if smtp.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .map_err(|e| AlertError::Email(e.to_string()))?
                .port(smtp.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host).port(smtp.port)
        };

        if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self { transport: builder.build(), from: sender(instance)? })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), AlertError> {
        let to: Mailbox = email.to.parse().map_err(|_| AlertError::InvalidAddress(email.to.clone()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| AlertError::Email(e.to_string()))?;

        self.transport.send(message).await.map_err(|e| AlertError::Email(e.to_string()))?;
        Ok(())
    }
}

/// `<instance name> <admin email>`
fn sender(instance: &InstanceConfig) -> Result<Mailbox, AlertError> {
    let raw = if instance.admin_email.is_empty() { FALLBACK_FROM } else { instance.admin_email.as_str() };
    let address: Address = raw.parse().map_err(|_| AlertError::InvalidAddress(raw.to_string()))?;
    Ok(Mailbox::new(Some(instance.name.clone()), address))
}

/// Site address when valid, otherwise the admin address, otherwise nobody.
pub fn alert_recipient(site: &Site, admin_email: &str) -> Option<String> {
    let usable = |email: &str| {
        let result = Validator::validate_email(email);
        result.is_valid && result.value.as_deref().is_some_and(|value| !value.is_empty())
    };

    site.notify_email
        .as_deref()
        .filter(|&email| usable(email))
        .or_else(|| Some(admin_email).filter(|&email| usable(email)))
        .map(str::to_string)
}

pub fn status_alert_subject(site: &Site) -> String {
    format!("[Pulsewatch] Status Alert: {}", site.host())
}

pub fn status_alert_body(
    site: &Site,
    old_status: Option<&SiteStatus>,
    new_status: &SiteStatus,
    severity: Severity,
    now: DateTime<Utc>,
    instance: &InstanceConfig,
) -> String {
    let mut lines = vec![
        format!("Website Monitoring Alert - {severity}"),
        String::new(),
        format!("Website: {}", site.url),
        format!("Previous Status: {}", old_status.map(ToString::to_string).unwrap_or_else(|| "UNKNOWN".into())),
        format!("Current Status: {new_status}"),
        format!("Time: {}", now.format("%Y-%m-%d %H:%M:%S UTC")),
    ];

    if let Some(response_time) = site.response_time {
        lines.push(format!("Response Time: {response_time:.0} ms"));
    }
    if let Some(days) = site.ssl_days_remaining {
        lines.push(format!("SSL Days Remaining: {days} days"));
    }

    lines.extend(footer(instance));
    lines.push(format!("Manage monitoring: {}", instance.url));
    lines.join("\n")
}

pub fn ssl_alert_subject(site: &Site, urgency: Severity) -> String {
    format!("[Pulsewatch] {urgency}: SSL Certificate Expiring - {}", site.host())
}

pub fn ssl_alert_body(site: &Site, days_remaining: i64, urgency: Severity, instance: &InstanceConfig) -> String {
    let mut lines = vec![
        format!("SSL Certificate Expiration {urgency}"),
        String::new(),
        format!("Website: {}", site.url),
        format!("Days Remaining: {days_remaining} days"),
    ];

    if let Some(expiry) = site.ssl_expiry_date {
        lines.push(format!("Expiry Date: {}", expiry.format("%Y-%m-%d %H:%M UTC")));
    }
    if let Some(issuer) = &site.ssl_issuer {
        lines.push(format!("Issuer: {issuer}"));
    }

    lines.push(format!("Urgency: {urgency}"));
    lines.push(String::new());
    lines.push("Please renew your SSL certificate as soon as possible to avoid service interruption.".into());
    lines.extend(footer(instance));
    lines.join("\n")
}

fn footer(instance: &InstanceConfig) -> [String; 3] {
    [
        String::new(),
        "---".into(),
        format!("This is an automated message from Pulsewatch on {}", instance.name),
    ]
}
