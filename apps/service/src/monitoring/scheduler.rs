use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};
use tracing::{error, info, warn};

use super::executor::{BatchRunner, RunOutcome};
use crate::database::models::LastRun;
use crate::database::{OptionStore, StoreError};
use crate::settings::Settings;

const NEXT_RUN_KEY: &str = "next_run";

pub const PERIOD_THIRTY_SECONDS: Duration = Duration::from_secs(30);
pub const PERIOD_ONE_MINUTE: Duration = Duration::from_secs(60);
pub const PERIOD_FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
pub const PERIOD_FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Firing period for a check interval in minutes
pub fn period_for(interval_minutes: f64) -> Duration {
    if interval_minutes <= 0.5 {
        PERIOD_THIRTY_SECONDS
    } else if interval_minutes <= 1.0 {
        PERIOD_ONE_MINUTE
    } else if interval_minutes <= 5.0 {
        PERIOD_FIVE_MINUTES
    } else {
        PERIOD_FIFTEEN_MINUTES
    }
}

/// Source of best-effort firings for the check run
#[async_trait]
pub trait Trigger: Send {
    /// Wait for the next firing
    async fn tick(&mut self);

    /// When the following firing is expected, if known
    fn next_fire(&self) -> Option<DateTime<Utc>>;

    fn period(&self) -> Duration;

    /// Switch to a new period, first firing one period from now
    fn reschedule(&mut self, period: Duration);
}

/// Fixed-period trigger; firings missed while a run is busy are dropped.
pub struct IntervalTrigger {
    interval: Interval,
    next_fire: DateTime<Utc>,
}

impl IntervalTrigger {
    /// First firing is immediate
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, next_fire: Utc::now() }
    }

    pub fn for_check_interval(interval_minutes: f64) -> Self {
        Self::new(period_for(interval_minutes))
    }
}

fn after(period: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(period).unwrap_or(chrono::Duration::zero())
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn tick(&mut self) {
        self.interval.tick().await;
        self.next_fire = after(self.interval.period());
    }

    fn next_fire(&self) -> Option<DateTime<Utc>> {
        Some(self.next_fire)
    }

    fn period(&self) -> Duration {
        self.interval.period()
    }

    fn reschedule(&mut self, period: Duration) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = interval;
        self.next_fire = after(period);
    }
}

/// Drives [`BatchRunner::run_checks`] from a [`Trigger`] until shutdown.
pub struct Scheduler<T: Trigger> {
    runner: Arc<BatchRunner>,
    options: Arc<dyn OptionStore>,
    trigger: T,
}

impl<T: Trigger> Scheduler<T> {
    pub fn new(runner: Arc<BatchRunner>, options: Arc<dyn OptionStore>, trigger: T) -> Self {
        Self { runner, options, trigger }
    }

    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), StoreError> {
        tokio::pin!(shutdown);
        info!("Scheduler started, firing every {}s", self.trigger.period().as_secs());

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.trigger.tick() => {}
            }

            match self.runner.run_checks().await {
                Ok(RunOutcome::Completed(_)) => {}
                Ok(RunOutcome::Skipped) => info!("Previous run still active, firing dropped"),
                Err(err) => error!("Critical error in check run - {}", err),
            }

            if let Err(err) = self.refresh().await {
                warn!("Could not refresh schedule: {}", err);
            }
        }

        info!("Scheduler stopping");
        self.options.delete(NEXT_RUN_KEY).await?;
        Ok(())
    }

    /// Follow interval changes and publish the next firing for other processes.
    async fn refresh(&mut self) -> Result<(), StoreError> {
        let settings = Settings::load(self.options.as_ref()).await?;
        let period = period_for(settings.check_interval);
        if period != self.trigger.period() {
            info!("Check interval changed, rescheduling every {}s", period.as_secs());
            self.trigger.reschedule(period);
        }

        let Some(next_fire) = self.trigger.next_fire() else {
            return Ok(());
        };
        // goes stale once a whole period passes without a firing
        let stale_after = next_fire + chrono::Duration::from_std(period).unwrap_or(chrono::Duration::zero());
        self.options.put(NEXT_RUN_KEY, &next_fire.to_rfc3339(), Some(stale_after)).await
    }
}

/// Snapshot of scheduling state for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub is_scheduled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub last_run: Option<LastRun>,
    pub check_interval: f64,
}

impl SchedulerStatus {
    pub async fn collect(runner: &BatchRunner, options: &dyn OptionStore) -> Result<Self, StoreError> {
        let next_run = options
            .get(NEXT_RUN_KEY)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|time| time.with_timezone(&Utc));
        let settings = Settings::load(options).await?;

        Ok(Self {
            is_scheduled: next_run.is_some(),
            next_run,
            is_running: runner.lock().is_held().await?,
            last_run: runner.last_run().await?,
            check_interval: settings.check_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SiteStore;
    use crate::monitoring::executor::testing::harness;
    use anyhow::Result;
    use tokio::sync::{mpsc, oneshot};

    /// Fires once per message; never again after the sender is dropped.
    struct ChannelTrigger {
        rx: mpsc::UnboundedReceiver<()>,
        period: Duration,
    }

    #[async_trait]
    impl Trigger for ChannelTrigger {
        async fn tick(&mut self) {
            if self.rx.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }

        fn next_fire(&self) -> Option<DateTime<Utc>> {
            Some(after(self.period))
        }

        fn period(&self) -> Duration {
            self.period
        }

        fn reschedule(&mut self, period: Duration) {
            self.period = period;
        }
    }

    #[test]
    fn test_period_mapping() {
        assert_eq!(period_for(0.5), Duration::from_secs(30));
        assert_eq!(period_for(1.0), Duration::from_secs(60));
        assert_eq!(period_for(2.0), Duration::from_secs(300));
        assert_eq!(period_for(5.0), Duration::from_secs(300));
        assert_eq!(period_for(5.5), Duration::from_secs(900));
        assert_eq!(period_for(60.0), Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_interval_trigger_fires_and_reschedules() {
        let mut trigger = IntervalTrigger::new(Duration::from_millis(20));
        trigger.tick().await;
        trigger.tick().await;
        assert!(trigger.next_fire().is_some_and(|next| next > Utc::now() - chrono::Duration::seconds(1)));

        trigger.reschedule(Duration::from_secs(3600));
        assert_eq!(trigger.period(), Duration::from_secs(3600));
        let fired = tokio::time::timeout(Duration::from_millis(50), trigger.tick()).await;
        assert!(fired.is_err(), "rescheduled trigger waits a full period");
    }

    #[tokio::test]
    async fn test_scheduler_runs_on_tick_until_shutdown() -> Result<()> {
        let h = harness().await?;
        h.store.add_site("https://shop.example", None).await?;

        let options: Arc<dyn OptionStore> = Arc::new(h.store.clone());
        let runner = Arc::new(h.runner);
        let (tick_tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let scheduler = Scheduler::new(runner.clone(), options.clone(), ChannelTrigger { rx, period: PERIOD_FIVE_MINUTES });
        let handle = tokio::spawn(scheduler.run(async {
            let _ = stop_rx.await;
        }));

        tick_tx.send(())?;
        let ran = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if runner.last_run().await.ok().flatten().is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(ran.is_ok(), "run did not complete");

        // published once the tick was handled
        let status = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = SchedulerStatus::collect(&runner, options.as_ref()).await.ok();
                if let Some(status) = status.filter(|status| status.is_scheduled) {
                    break status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        assert!(!status.is_running);
        assert_eq!(status.last_run.map(|run| run.checked), Some(1));
        assert_eq!(status.check_interval, 5.0);

        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), handle).await???;

        let status = SchedulerStatus::collect(&runner, options.as_ref()).await?;
        assert!(!status.is_scheduled);
        assert_eq!(h.prober.probed.lock().unwrap().len(), 1);
        Ok(())
    }
}
