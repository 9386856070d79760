use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

/// Static process configuration.
///
/// Dynamic, admin-editable values (webhook URL, check interval, cooldown) are
/// not kept here; they live in the store, see [`crate::settings::Settings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub instance: InstanceConfig,
    pub smtp: SmtpConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Identity of this monitoring instance, used in alerts and the user agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub name: String,
    pub url: String,
    /// Fallback alert recipient and `From` address.
    pub admin_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "pulsewatch.db".into() }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "Pulsewatch".into(),
            url: "http://localhost:8080".into(),
            admin_email: String::new(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 25, username: None, password: None, tls: false }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulsewatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("pulsewatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_title_1(f, "Instance")?;
        write_1(f, "Name", &self.instance.name)?;
        write_1(f, "URL", &self.instance.url)?;
        write_1(f, "Admin Email", &self.instance.admin_email)?;
        write_title_1(f, "SMTP")?;
        write_1(f, "Host", &self.smtp.host)?;
        write_1(f, "Port", &self.smtp.port)?;
        write_1(f, "TLS", &self.smtp.tls)?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pulsewatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// `PULSEWATCH_DATABASE` overrides the database path after loading.
    ///
    /// ```ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(ConfigError::ReadFailed)?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        if let Ok(database) = env::var("PULSEWATCH_DATABASE") {
            config.database.path = database;
        }

        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(ConfigError::WriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let config = Config::from_config(Some(&path)).unwrap();

        assert!(path.exists());
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[instance]\nname = \"Agency Monitor\"\nadmin_email = \"ops@agency.example\"\n")
            .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config.instance.name, "Agency Monitor");
        assert_eq!(config.instance.admin_email, "ops@agency.example");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_extension_is_normalized() {
        let normalized = normalize_toml_path(path::Path::new("/tmp/pulsewatch/config"));
        assert_eq!(normalized, path::PathBuf::from("/tmp/pulsewatch/config.toml"));
    }

    #[test]
    fn test_display_lists_effective_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nbind = \"::1\"\nport = 9090\n").unwrap();

        let rendered = Config::from_config(Some(&path)).unwrap().to_string();

        assert!(rendered.starts_with("Current Internal Configuration State:\n"));
        assert!(rendered.contains("    Bind Address: ::1\n"));
        assert!(rendered.contains("    Port: 9090\n"));
        assert!(rendered.contains("    Level: info\n"));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server\nport = ").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::ParseFailed(_))));
    }
}
