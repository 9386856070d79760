use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use url::Url;

use crate::database::SiteStore;
use crate::settings::Settings;

pub const URL_MAX_LENGTH: usize = 255;
pub const EMAIL_MAX_LENGTH: usize = 100;
pub const WEBHOOK_MAX_LENGTH: usize = 500;

const BLOCKED_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "0.0.0.0"];
const DISPOSABLE_DOMAINS: [&str; 3] = ["tempmail.com", "10minutemail.com", "guerrillamail.com"];

const MIN_INTERVAL_MINUTES: f64 = 0.5;
const MAX_INTERVAL_MINUTES: f64 = 60.0;
const MIN_COOLDOWN_HOURS: u32 = 1;
const MAX_COOLDOWN_HOURS: u32 = 168;

/// Validation results with specific error messages
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Normalised input when valid
    pub value: Option<String>,
    pub error: Option<String>,
    /// Non-fatal advice, only set on valid results
    pub warning: Option<String>,
}

impl ValidationResult {
    pub fn ok(value: impl Into<String>) -> Self {
        Self { is_valid: true, value: Some(value.into()), error: None, warning: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, value: None, error: Some(msg.into()), warning: None }
    }

    fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn to_result(&self) -> Result<String> {
        if self.is_valid {
            Ok(self.value.clone().unwrap_or_default())
        } else {
            Err(anyhow!(self.error.clone().unwrap_or_else(|| "Validation failed".to_string())))
        }
    }
}

/// Resolves hostnames for the DNS rebinding check
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Every A/AAAA address of `host`; empty when resolution fails
    async fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// Resolver backed by the system's `getaddrinfo`
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
            Err(err) => {
                tracing::debug!(host, "DNS lookup failed: {}", err);
                Vec::new()
            }
        }
    }
}

/// Input validation for sites, emails, webhooks and settings
#[derive(Clone)]
pub struct Validator {
    store: Arc<dyn SiteStore>,
    resolver: Arc<dyn HostResolver>,
}

impl Validator {
    pub fn new(store: Arc<dyn SiteStore>) -> Self {
        Self::with_resolver(store, Arc::new(SystemResolver))
    }

    pub fn with_resolver(store: Arc<dyn SiteStore>, resolver: Arc<dyn HostResolver>) -> Self {
        Self { store, resolver }
    }

    /// Validate a site URL before it is added
    pub async fn validate_url(&self, raw: &str) -> ValidationResult {
        let url = raw.trim();
        if url.is_empty() {
            return ValidationResult::err("URL cannot be empty.");
        }

        if !has_http_scheme(url) {
            return ValidationResult::err("URL must start with http:// or https://");
        }

        let Some(host) = Url::parse(url).ok().and_then(|parsed| parsed.host_str().map(str::to_string))
        else {
            return ValidationResult::err("URL must have a valid domain name.");
        };

        if !is_valid_hostname(&host) {
            return ValidationResult::err("Invalid domain name format.");
        }

        if self.is_blocked_host(&host).await {
            return ValidationResult::err("Cannot monitor localhost or private IP addresses.");
        }

        if url.len() > URL_MAX_LENGTH {
            return ValidationResult::err(format!("URL is too long (maximum {URL_MAX_LENGTH} characters)."));
        }

        match self.store.url_exists(url).await {
            Ok(true) => return ValidationResult::err("This URL is already being monitored."),
            Ok(false) => {}
            Err(err) => {
                tracing::error!(url, "Duplicate URL lookup failed: {}", err);
                return ValidationResult::err("Could not verify the URL, please try again.");
            }
        }

        ValidationResult::ok(url)
    }

    /// Validate an optional notification address; empty input is valid.
    pub fn validate_email(raw: &str) -> ValidationResult {
        let email = raw.trim();
        if email.is_empty() {
            return ValidationResult::ok("");
        }

        if !is_email_shaped(email) {
            return ValidationResult::err("Please enter a valid email address.");
        }

        if email.len() > EMAIL_MAX_LENGTH {
            return ValidationResult::err(format!(
                "Email address is too long (maximum {EMAIL_MAX_LENGTH} characters)."
            ));
        }

        let domain = email.rsplit('@').next().unwrap_or_default().to_lowercase();
        if DISPOSABLE_DOMAINS.contains(&domain.as_str()) {
            return ValidationResult::err("Disposable email addresses are not allowed.");
        }

        ValidationResult::ok(email)
    }

    /// Validate a webhook URL; empty input disables webhooks.
    pub async fn validate_webhook_url(&self, raw: &str) -> ValidationResult {
        let url = raw.trim();
        if url.is_empty() {
            return ValidationResult::ok("");
        }

        let Ok(parsed) = Url::parse(url) else {
            return ValidationResult::err("Please enter a valid webhook URL.");
        };

        if !has_http_scheme(url) {
            return ValidationResult::err("Webhook URL must start with http:// or https://");
        }

        let Some(host) = parsed.host_str() else {
            return ValidationResult::err("Webhook URL must have a valid domain.");
        };

        if self.is_blocked_host(host.trim_start_matches('[').trim_end_matches(']')).await {
            return ValidationResult::err("Cannot use localhost or private IPs for webhook URL.");
        }

        if url.len() > WEBHOOK_MAX_LENGTH {
            return ValidationResult::err(format!(
                "Webhook URL is too long (maximum {WEBHOOK_MAX_LENGTH} characters)."
            ));
        }

        let result = ValidationResult::ok(url);
        if parsed.scheme() != "https" {
            return result.with_warning("HTTPS is recommended for webhook URLs for better security.");
        }
        result
    }

    /// Whether a host must not be probed or posted to.
    ///
    /// Checks the literal name, the literal address, and every address the
    /// name currently resolves to.
    pub async fn is_blocked_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();

        if BLOCKED_HOSTS.contains(&host.as_str()) {
            return true;
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            return !is_public_ip(ip);
        }

        self.resolver.resolve(&host).await.into_iter().any(|ip| !is_public_ip(ip))
    }

    /// Clamp admin input into the supported ranges
    pub async fn sanitize_settings(&self, input: &Settings) -> Settings {
        let webhook_url = match input.webhook_url.as_deref() {
            Some(raw) => {
                let result = self.validate_webhook_url(raw).await;
                if !result.is_valid {
                    tracing::warn!("Discarding invalid webhook URL: {}", result.error.unwrap_or_default());
                }
                result.value.filter(|url| !url.is_empty())
            }
            None => None,
        };

        let check_interval = if input.check_interval.is_finite() {
            input.check_interval.clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
        } else {
            crate::settings::DEFAULT_CHECK_INTERVAL_MINUTES
        };

        Settings {
            webhook_url,
            check_interval,
            notification_cooldown: input.notification_cooldown.clamp(MIN_COOLDOWN_HOURS, MAX_COOLDOWN_HOURS),
            version: input.version.clone(),
        }
    }
}

fn has_http_scheme(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Dot-separated labels of ASCII alphanumerics and inner hyphens, 63 max each
fn is_valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

fn is_email_shaped(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };

    let local_ok = !local.is_empty()
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && local.chars().all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+/=?^_`{|}~.-".contains(c));

    local_ok && domain.contains('.') && is_valid_hostname(domain)
}

/// True for globally routable unicast addresses only
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_public_ipv4(ipv4),
        IpAddr::V6(ipv6) => match ipv6.to_ipv4_mapped() {
            Some(mapped) => is_public_ipv4(mapped),
            None => is_public_ipv6(ipv6),
        },
    }
}

fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();

    let this_network = a == 0;
    let shared = a == 100 && (64..128).contains(&b);
    let benchmarking = a == 198 && (b == 18 || b == 19);
    let reserved = a >= 240;

    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || ip.is_multicast()
        || this_network
        || shared
        || benchmarking
        || reserved)
}

fn is_public_ipv6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];

    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && ip.segments()[1] == 0x0db8;

    !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || unique_local || link_local || documentation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::create_test_store;
    use std::collections::HashMap;

    /// Resolver answering from a fixed table
    struct StaticResolver(HashMap<&'static str, Vec<IpAddr>>);

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn resolve(&self, host: &str) -> Vec<IpAddr> {
            self.0.get(host).cloned().unwrap_or_default()
        }
    }

    async fn validator() -> (Validator, Arc<crate::database::LibsqlStore>, tempfile::TempDir) {
        let (store, dir) = create_test_store().await.unwrap();
        let store = Arc::new(store);
        let resolver = StaticResolver(HashMap::from([
            ("example.com", vec!["93.184.215.14".parse().unwrap()]),
            ("hooks.slack.com", vec!["54.230.1.10".parse().unwrap()]),
            ("rebind.example", vec!["93.184.215.14".parse().unwrap(), "10.0.0.8".parse().unwrap()]),
        ]));
        (Validator::with_resolver(store.clone(), Arc::new(resolver)), store, dir)
    }

    #[tokio::test]
    async fn test_url_validation() {
        let (validator, store, _dir) = validator().await;

        let ok = validator.validate_url("  https://example.com  ").await;
        assert!(ok.is_valid);
        assert_eq!(ok.value.as_deref(), Some("https://example.com"));

        assert!(!validator.validate_url("").await.is_valid);
        assert!(!validator.validate_url("ftp://example.com").await.is_valid);
        assert!(!validator.validate_url("example.com").await.is_valid);
        assert!(!validator.validate_url("http://localhost/").await.is_valid);
        assert!(!validator.validate_url("http://192.168.1.1").await.is_valid);
        assert!(!validator.validate_url("https://bad_host.example").await.is_valid);
        assert!(!validator.validate_url("https://rebind.example").await.is_valid);

        let long = format!("https://example.com/{}", "a".repeat(URL_MAX_LENGTH));
        let too_long = validator.validate_url(&long).await;
        assert!(!too_long.is_valid);
        assert!(too_long.error.unwrap().contains("too long"));

        store.add_site("https://example.com", None).await.unwrap();
        let duplicate = validator.validate_url("https://example.com").await;
        assert_eq!(duplicate.error.as_deref(), Some("This URL is already being monitored."));
    }

    #[tokio::test]
    async fn test_length_is_checked_before_duplicate_lookup() {
        let (validator, store, _dir) = validator().await;
        let long = format!("https://example.com/{}", "b".repeat(URL_MAX_LENGTH));
        store.add_site(&long, None).await.unwrap();

        let result = validator.validate_url(&long).await;

        assert_eq!(
            result.error.as_deref(),
            Some(format!("URL is too long (maximum {URL_MAX_LENGTH} characters).").as_str())
        );
    }

    #[test]
    fn test_email_validation() {
        let empty = Validator::validate_email("   ");
        assert!(empty.is_valid);
        assert_eq!(empty.value.as_deref(), Some(""));

        assert!(Validator::validate_email("ops@agency.example").is_valid);
        assert!(Validator::validate_email("first.last+alerts@mail.example.org").is_valid);

        assert!(!Validator::validate_email("not-an-email").is_valid);
        assert!(!Validator::validate_email("ops@localhost").is_valid);
        assert!(!Validator::validate_email("a b@example.com").is_valid);
        assert!(!Validator::validate_email("someone@TempMail.com").is_valid);

        let long = format!("{}@example.com", "a".repeat(EMAIL_MAX_LENGTH));
        assert!(!Validator::validate_email(&long).is_valid);
    }

    #[tokio::test]
    async fn test_webhook_validation() {
        let (validator, _store, _dir) = validator().await;

        assert!(validator.validate_webhook_url("").await.is_valid);

        let secure = validator.validate_webhook_url("https://hooks.slack.com/services/T/B/X").await;
        assert!(secure.is_valid);
        assert!(secure.warning.is_none());

        let plain = validator.validate_webhook_url("http://example.com/hook").await;
        assert!(plain.is_valid);
        assert!(plain.warning.is_some());

        assert!(!validator.validate_webhook_url("not a url").await.is_valid);
        assert!(!validator.validate_webhook_url("ftp://example.com/hook").await.is_valid);
        assert!(!validator.validate_webhook_url("http://127.0.0.1:9000/hook").await.is_valid);
        assert!(!validator.validate_webhook_url("http://[::1]/hook").await.is_valid);
    }

    #[tokio::test]
    async fn test_blocked_hosts() {
        let (validator, _store, _dir) = validator().await;

        for host in ["localhost", "LOCALHOST", "0.0.0.0", "10.1.2.3", "169.254.1.1", "100.64.0.1", "::1", "fd00::1"] {
            assert!(validator.is_blocked_host(host).await, "{host} should be blocked");
        }
        assert!(validator.is_blocked_host("rebind.example").await);

        assert!(!validator.is_blocked_host("example.com").await);
        assert!(!validator.is_blocked_host("8.8.8.8").await);
        // unresolvable names are not blocked by themselves
        assert!(!validator.is_blocked_host("unknown.example").await);
    }

    #[test]
    fn test_public_ip_ranges() {
        assert!(is_public_ip("1.1.1.1".parse().unwrap()));
        assert!(is_public_ip("2606:4700::1111".parse().unwrap()));
        assert!(!is_public_ip("198.18.0.1".parse().unwrap()));
        assert!(!is_public_ip("203.0.113.9".parse().unwrap()));
        assert!(!is_public_ip("255.255.255.255".parse().unwrap()));
        assert!(!is_public_ip("fe80::1".parse().unwrap()));
        assert!(!is_public_ip("2001:db8::1".parse().unwrap()));
        assert!(!is_public_ip("::ffff:192.168.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_settings_are_clamped() {
        let (validator, _store, _dir) = validator().await;

        let input = Settings {
            webhook_url: Some("http://localhost/hook".into()),
            check_interval: 0.1,
            notification_cooldown: 500,
            ..Settings::default()
        };
        let sanitized = validator.sanitize_settings(&input).await;
        assert_eq!(sanitized.webhook_url, None);
        assert_eq!(sanitized.check_interval, 0.5);
        assert_eq!(sanitized.notification_cooldown, 168);

        let input = Settings { check_interval: 120.0, notification_cooldown: 0, ..Settings::default() };
        let sanitized = validator.sanitize_settings(&input).await;
        assert_eq!(sanitized.check_interval, 60.0);
        assert_eq!(sanitized.notification_cooldown, 1);
    }
}
