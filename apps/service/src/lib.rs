//! Pulsewatch monitoring engine.
//!
//! Probes registered websites for availability, latency and certificate
//! health, keeps rolling counters in a libsql database, and alerts by email
//! and webhook when a site changes state or its certificate nears expiry.

pub mod alerts;
pub mod config;
pub mod database;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod settings;
pub mod validation;

pub use config::Config;
pub use orchestrator::{Components, Orchestrator, SiteError};
