/// Orchestrator module - wires the engine together
///
/// The orchestrator is the entry point the binaries use:
/// - Opens and migrates the store
/// - Builds the prober, mailer, webhook client and validator from [`Config`]
/// - Runs the scheduler until Ctrl-C
/// - Exposes the admin operations (add, check, settings, webhook test)

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::alerts::{AlertDispatcher, AlertError, Mailer, SmtpMailer, WebhookClient, WebhookSender};
use crate::config::Config;
use crate::database::models::Site;
use crate::database::{LibsqlStore, SiteStore, StoreError, initialize_database};
use crate::monitoring::checker::user_agent;
use crate::monitoring::{BatchRunner, IntervalTrigger, Prober, Scheduler, SchedulerStatus, SiteProber};
use crate::pool::LibsqlPool;
use crate::settings::Settings;
use crate::validation::{HostResolver, SystemResolver, Validator};

#[derive(Debug, Error)]
pub enum SiteError {
    /// Rejected input, message is safe to show
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outbound collaborators; swapped for fakes in tests.
pub struct Components {
    pub prober: Arc<dyn Prober>,
    pub mailer: Arc<dyn Mailer>,
    pub webhooks: Arc<dyn WebhookSender>,
    pub resolver: Arc<dyn HostResolver>,
}

impl Components {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            prober: Arc::new(SiteProber::new(&config.instance.url)?),
            mailer: Arc::new(SmtpMailer::new(&config.smtp, &config.instance)?),
            webhooks: Arc::new(WebhookClient::new(&user_agent(&config.instance.url))?),
            resolver: Arc::new(SystemResolver),
        })
    }
}

/// Main orchestrator for the Pulsewatch service
pub struct Orchestrator {
    config: Arc<Config>,
    store: LibsqlStore,
    validator: Validator,
    dispatcher: Arc<AlertDispatcher>,
    runner: Arc<BatchRunner>,
}

impl Orchestrator {
    /// Migrate the database and build the production components
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        {
            let conn = pool.get().await?;
            info!("Initializing database schema...");
            initialize_database(&conn).await?;
        }

        let components = Components::from_config(&config)?;
        Ok(Self::assemble(config, LibsqlStore::new_from_pool(pool), components))
    }

    /// Build from an already migrated store
    pub fn assemble(config: Config, store: LibsqlStore, components: Components) -> Self {
        let config = Arc::new(config);
        let sites: Arc<dyn SiteStore> = Arc::new(store.clone());

        let dispatcher = Arc::new(AlertDispatcher::new(
            components.mailer,
            components.webhooks,
            Arc::new(store.clone()),
            config.instance.clone(),
        ));
        let runner = Arc::new(BatchRunner::new(
            sites.clone(),
            Arc::new(store.clone()),
            components.prober,
            dispatcher.clone(),
        ));
        let validator = Validator::with_resolver(sites, components.resolver);

        Self { config, store, validator, dispatcher, runner }
    }

    /// Run the scheduler until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        info!("Starting Pulsewatch scheduler for {}", self.config.instance.name);

        let settings = Settings::load(&self.store).await?;
        let trigger = IntervalTrigger::for_check_interval(settings.check_interval);
        let scheduler = Scheduler::new(self.runner.clone(), Arc::new(self.store.clone()), trigger);

        scheduler.run(shutdown_signal()).await?;
        Ok(())
    }

    pub fn store(&self) -> &LibsqlStore {
        &self.store
    }

    pub fn runner(&self) -> &Arc<BatchRunner> {
        &self.runner
    }

    /// Validate and register a site
    pub async fn add_site(&self, url: &str, notify_email: Option<&str>) -> Result<Site, SiteError> {
        let url = self.validator.validate_url(url).await;
        let url = url.to_result().map_err(|e| SiteError::Invalid(e.to_string()))?;

        let email = Validator::validate_email(notify_email.unwrap_or_default());
        let email = email.to_result().map_err(|e| SiteError::Invalid(e.to_string()))?;
        let email = Some(email.as_str()).filter(|email| !email.is_empty());

        let id = self.store.add_site(&url, email).await?;
        info!(site_id = id, "Site added: {}", url);

        self.store.get_site(id).await?.ok_or(SiteError::Store(StoreError::NotFound(id)))
    }

    pub async fn settings(&self) -> Result<Settings, StoreError> {
        Settings::load(&self.store).await
    }

    /// Sanitize, store, and return the settings as stored
    pub async fn save_settings(&self, input: &Settings) -> Result<Settings, StoreError> {
        let sanitized = self.validator.sanitize_settings(input).await;
        sanitized.save(&self.store).await?;
        info!("Settings saved (interval: {} min, cooldown: {} h)", sanitized.check_interval, sanitized.notification_cooldown);
        Settings::load(&self.store).await
    }

    /// Post a test payload to `webhook_url`, or to the stored webhook when `None`
    pub async fn test_webhook(&self, webhook_url: Option<&str>, user: &str) -> Result<(), AlertError> {
        let webhook_url = match webhook_url {
            Some(raw) => {
                let result = self.validator.validate_webhook_url(raw).await;
                if !result.is_valid {
                    return Err(AlertError::InvalidAddress(raw.trim().to_string()));
                }
                result.value.unwrap_or_default()
            }
            None => self.settings().await?.webhook_url().map(str::to_string).unwrap_or_default(),
        };

        self.dispatcher.send_test_webhook(&webhook_url, user).await
    }

    pub async fn status(&self) -> Result<SchedulerStatus, StoreError> {
        SchedulerStatus::collect(&self.runner, &self.store).await
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
