/// Monitoring engine
///
/// This module is responsible for:
/// - Probing sites over HTTP and reading their TLS certificates
/// - Guarding check runs with a store-backed lock
/// - Selecting and checking due sites in batches
/// - Firing runs on a schedule
pub mod cert;
pub mod checker;
pub mod executor;
pub mod lock;
pub mod scheduler;
pub mod types;

pub use checker::{ErrorCategory, Prober, SiteProber};
pub use executor::{BatchRunner, ManualOutcome, ManualSummary, RunOutcome, SiteCheck};
pub use lock::RunLock;
pub use scheduler::{IntervalTrigger, Scheduler, SchedulerStatus, Trigger};
pub use types::{CheckResult, SiteStatus};
