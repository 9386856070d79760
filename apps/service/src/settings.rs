use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::database::{OptionStore, StoreError};

const SETTINGS_KEY: &str = "settings";

pub const DEFAULT_CHECK_INTERVAL_MINUTES: f64 = 5.0;
pub const DEFAULT_COOLDOWN_HOURS: u32 = 24;

/// Admin-editable settings kept in the option store.
///
/// Never cached: callers load them at the start of every run and again
/// after saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub webhook_url: Option<String>,
    /// Minutes between checks of one site; fractions allowed
    pub check_interval: f64,
    /// Hours an SSL warning stays suppressed after firing
    pub notification_cooldown: u32,
    pub version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            check_interval: DEFAULT_CHECK_INTERVAL_MINUTES,
            notification_cooldown: DEFAULT_COOLDOWN_HOURS,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Settings {
    /// Read the stored settings, writing the defaults on first access.
    pub async fn load(options: &dyn OptionStore) -> Result<Self, StoreError> {
        let Some(raw) = options.get(SETTINGS_KEY).await? else {
            let defaults = Self::default();
            options
                .insert_if_absent(SETTINGS_KEY, &serde_json::to_string(&defaults)?, None)
                .await?;
            return Ok(defaults);
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!("Stored settings are unreadable, using defaults: {}", err);
                Ok(Self::default())
            }
        }
    }

    /// Overwrite the stored settings wholesale
    pub async fn save(&self, options: &dyn OptionStore) -> Result<(), StoreError> {
        options.put(SETTINGS_KEY, &serde_json::to_string(self)?, None).await
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref().filter(|url| !url.is_empty())
    }
}
