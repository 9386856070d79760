use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::checker::Prober;
use super::lock::RunLock;
use super::types::CheckResult;
use crate::alerts::AlertDispatcher;
use crate::database::models::{LastRun, Site, SiteFilter};
use crate::database::{OptionStore, SiteStore, StoreError};
use crate::settings::Settings;

const LAST_RUN_KEY: &str = "last_run";

pub const BATCH_SIZE_DEFAULT: u32 = 10;
pub const BATCH_SIZE_FAST: u32 = 5;
pub const BATCH_SIZE_VERY_FAST: u32 = 3;

/// Sites checked per run for a check interval in minutes
pub fn batch_size_for(interval_minutes: f64) -> u32 {
    if interval_minutes <= 0.5 {
        BATCH_SIZE_VERY_FAST
    } else if interval_minutes <= 1.0 {
        BATCH_SIZE_FAST
    } else {
        BATCH_SIZE_DEFAULT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run held the lock
    Skipped,
    Completed(LastRun),
}

/// Result of checking every site on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualSummary {
    pub success: bool,
    pub total: u32,
    pub checked: u32,
    pub failed: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualOutcome {
    Busy,
    Finished(ManualSummary),
}

/// A site as stored after a check, with the probe that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCheck {
    pub site: Site,
    pub result: CheckResult,
}

/// Checks due sites in bounded batches and forwards the resulting events.
pub struct BatchRunner {
    sites: Arc<dyn SiteStore>,
    options: Arc<dyn OptionStore>,
    prober: Arc<dyn Prober>,
    dispatcher: Arc<AlertDispatcher>,
    lock: RunLock,
}

impl BatchRunner {
    pub fn new(
        sites: Arc<dyn SiteStore>,
        options: Arc<dyn OptionStore>,
        prober: Arc<dyn Prober>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        let lock = RunLock::new(options.clone());
        Self { sites, options, prober, dispatcher, lock }
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    /// One scheduled run: lock, check the due batch, record the summary.
    pub async fn run_checks(&self) -> Result<RunOutcome, StoreError> {
        if !self.lock.acquire().await? {
            info!("Check run already in progress, skipping this execution");
            return Ok(RunOutcome::Skipped);
        }

        let outcome = self.run_locked().await;

        if let Err(err) = self.lock.release().await {
            error!("Failed to release run lock: {}", err);
        }

        outcome.map(RunOutcome::Completed)
    }

    async fn run_locked(&self) -> Result<LastRun, StoreError> {
        let settings = Settings::load(self.options.as_ref()).await?;
        let batch_size = batch_size_for(settings.check_interval);
        let sites = self.sites.get_sites_for_checking(batch_size, settings.check_interval).await?;

        if sites.is_empty() {
            debug!("No sites need checking at this time");
            return Ok(LastRun { timestamp: Utc::now(), checked: 0, failed: 0, duration: 0.0 });
        }

        info!("Starting check of {} sites (batch size: {})", sites.len(), batch_size);

        let start = Instant::now();
        let (checked, failed) = self.check_all(&sites, &settings).await;
        let duration = (start.elapsed().as_secs_f64() * 100.0).round() / 100.0;

        info!("Batch complete - Checked: {}, Failed: {}, Duration: {}s", checked, failed, duration);

        let summary = LastRun { timestamp: Utc::now(), checked, failed, duration };
        self.options.put(LAST_RUN_KEY, &serde_json::to_string(&summary)?, None).await?;
        Ok(summary)
    }

    /// Check every site regardless of when it was last checked.
    pub async fn manual_check_all(&self) -> Result<ManualOutcome, StoreError> {
        if !self.lock.acquire().await? {
            info!("Manual check requested while a run is in progress");
            return Ok(ManualOutcome::Busy);
        }

        let outcome = self.manual_locked().await;

        if let Err(err) = self.lock.release().await {
            error!("Failed to release run lock: {}", err);
        }

        outcome.map(ManualOutcome::Finished)
    }

    async fn manual_locked(&self) -> Result<ManualSummary, StoreError> {
        let sites = self.sites.get_sites(&SiteFilter::default()).await?;
        if sites.is_empty() {
            return Ok(ManualSummary {
                success: false,
                total: 0,
                checked: 0,
                failed: 0,
                message: "No sites to check".into(),
            });
        }

        let settings = Settings::load(self.options.as_ref()).await?;
        let total = sites.len() as u32;
        let (checked, failed) = self.check_all(&sites, &settings).await;

        Ok(ManualSummary {
            success: true,
            total,
            checked,
            failed,
            message: format!("Checked {checked} of {total} sites. Failed: {failed}"),
        })
    }

    /// Probe one site now, outside the run lock.
    pub async fn check_site(&self, id: i64) -> Result<SiteCheck, StoreError> {
        let site = self.sites.get_site(id).await?.ok_or(StoreError::NotFound(id))?;
        let settings = Settings::load(self.options.as_ref()).await?;
        self.check_and_update(&site, &settings).await
    }

    /// Summary of the most recent scheduled run
    pub async fn last_run(&self) -> Result<Option<LastRun>, StoreError> {
        let Some(raw) = self.options.get(LAST_RUN_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(last_run) => Ok(Some(last_run)),
            Err(err) => {
                warn!("Stored last run summary is unreadable: {}", err);
                Ok(None)
            }
        }
    }

    /// Sequentially check `sites`, returning (checked, failed).
    async fn check_all(&self, sites: &[Site], settings: &Settings) -> (u32, u32) {
        let mut checked = 0;
        let mut failed = 0;

        for site in sites {
            match self.check_and_update(site, settings).await {
                Ok(SiteCheck { result, .. }) => {
                    checked += 1;
                    debug!(
                        site_id = site.id,
                        "Checked {} - Status: {}, Time: {}",
                        site.url,
                        result.status,
                        result.response_time.map(|ms| format!("{ms:.0}ms")).unwrap_or_else(|| "N/A".into()),
                    );
                }
                Err(err) => {
                    error!(site_id = site.id, "Error checking {}: {}", site.url, err);
                    failed += 1;
                }
            }
        }

        (checked, failed)
    }

    async fn check_and_update(&self, site: &Site, settings: &Settings) -> Result<SiteCheck, StoreError> {
        let result = self.prober.check_website(&site.url).await;
        let update = self.sites.update_status(site.id, &result).await?;

        for event in &update.events {
            debug!(site_id = site.id, "{}", event);
            if let Err(err) = self.dispatcher.dispatch(&update.site, event, settings).await {
                error!(site_id = site.id, "Failed to dispatch alert: {}", err);
            }
        }

        Ok(SiteCheck { site: update.site, result })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    use super::BatchRunner;
    use crate::alerts::AlertDispatcher;
    use crate::alerts::testing::{RecordingMailer, RecordingWebhook};
    use crate::config::InstanceConfig;
    use crate::database::LibsqlStore;
    use crate::database::testing::create_test_store;
    use crate::monitoring::checker::Prober;
    use crate::monitoring::types::{CheckResult, SiteStatus};

    /// Returns a fixed result per URL; unknown URLs are UP.
    #[derive(Default)]
    pub struct ScriptedProber {
        results: Mutex<HashMap<String, CheckResult>>,
        pub probed: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        pub fn set(&self, url: &str, result: CheckResult) {
            self.results.lock().unwrap().insert(url.to_string(), result);
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn check_website(&self, url: &str) -> CheckResult {
            self.probed.lock().unwrap().push(url.to_string());
            self.results
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_else(|| CheckResult::new(SiteStatus::Up).with_response_time(42.0))
        }
    }

    pub struct Harness {
        pub runner: BatchRunner,
        pub store: LibsqlStore,
        pub prober: Arc<ScriptedProber>,
        pub mailer: Arc<RecordingMailer>,
        _dir: TempDir,
    }

    /// Runner over a fresh store with a scripted prober and recording mailer
    pub async fn harness() -> Result<Harness> {
        let (store, dir) = create_test_store().await?;
        let prober = Arc::new(ScriptedProber::default());
        let mailer = Arc::new(RecordingMailer::default());
        let instance = InstanceConfig {
            name: "Agency Monitor".into(),
            url: "https://monitor.example".into(),
            admin_email: "admin@agency.example".into(),
        };
        let dispatcher = Arc::new(AlertDispatcher::new(
            mailer.clone(),
            Arc::new(RecordingWebhook::default()),
            Arc::new(store.clone()),
            instance,
        ));
        let runner = BatchRunner::new(Arc::new(store.clone()), Arc::new(store.clone()), prober.clone(), dispatcher);
        Ok(Harness { runner, store, prober, mailer, _dir: dir })
    }
}
