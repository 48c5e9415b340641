//! Layered server configuration
//!
//! Precedence, highest first: environment variables, a config.yaml found on
//! the search path, built-in defaults. The config is loaded once in main and
//! handed by Arc into every component; nothing reads configuration ambiently
//! after startup.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub servicenow: ServiceNowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceNowConfig {
    pub instance: String,
    pub username: String,
    pub password: String,
    pub use_https: bool,
    pub timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth: AuthConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "change-me".to_string(),
            enabled: false,
        }
    }
}

impl Default for ServiceNowConfig {
    fn default() -> Self {
        Self {
            instance: String::new(),
            username: String::new(),
            password: String::new(),
            use_https: true,
            timeout: 30,
        }
    }
}

/// Load configuration from file (if any) and apply environment overrides.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match find_config_file(explicit) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: Config = serde_yaml::from_str(&text)
                .with_context(|| format!("invalid config file {}", path.display()))?;
            info!("using config file {}", path.display());
            config
        }
        None => {
            info!("no config.yaml found, using defaults");
            Config::default()
        }
    };

    config.apply_env();
    Ok(config)
}

/// Search path: explicit path, then ., ./config, ~/.litemid
fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let mut candidates = vec![
        PathBuf::from("config.yaml"),
        PathBuf::from("config/config.yaml"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".litemid").join("config.yaml"));
    }

    candidates.into_iter().find(|p| p.exists())
}

impl Config {
    /// Environment variables win over file values.
    fn apply_env(&mut self) {
        if let Some(v) = env_value("SERVICENOW_INSTANCE") {
            self.servicenow.instance = v;
        }
        if let Some(v) = env_value("SERVICENOW_USERNAME") {
            self.servicenow.username = v;
        }
        if let Some(v) = env_value("SERVICENOW_PASSWORD") {
            self.servicenow.password = v;
        }
        if let Some(v) = env_value("LITEMID_AUTH_USERNAME") {
            self.server.auth.username = v;
        }
        if let Some(v) = env_value("LITEMID_AUTH_PASSWORD") {
            self.server.auth.password = v;
        }
        if let Some(v) = env_value("LITEMID_AUTH_ENABLED") {
            self.server.auth.enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    /// The server must not start without a complete ServiceNow target.
    pub fn validate(&self) -> Result<()> {
        if self.servicenow.instance.is_empty() {
            bail!("ServiceNow instance is required. Set SERVICENOW_INSTANCE or configure it in config.yaml");
        }
        if self.servicenow.username.is_empty() {
            bail!("ServiceNow username is required. Set SERVICENOW_USERNAME or configure it in config.yaml");
        }
        if self.servicenow.password.is_empty() {
            bail!("ServiceNow password is required. Set SERVICENOW_PASSWORD or configure it in config.yaml");
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // load() reads process-global env vars; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_no_file() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.auth.enabled);
        assert!(config.servicenow.use_https);
        assert_eq!(config.servicenow.timeout, 30);
    }

    #[test]
    fn validate_rejects_missing_instance() {
        let mut config = Config::default();
        config.servicenow.username = "svc".into();
        config.servicenow.password = "secret".into();
        assert!(config.validate().is_err());

        config.servicenow.instance = "dev123.service-now.com".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_values_are_loaded() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            "server:\n  port: 9090\nservicenow:\n  instance: file.service-now.com\n  use_https: false\n"
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.servicenow.instance, "file.service-now.com");
        assert!(!config.servicenow.use_https);
    }

    #[test]
    fn env_overrides_file_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "servicenow:\n  instance: file.service-now.com\n").unwrap();

        std::env::set_var("SERVICENOW_INSTANCE", "env.service-now.com");
        let config = load(Some(file.path())).unwrap();
        std::env::remove_var("SERVICENOW_INSTANCE");

        assert_eq!(config.servicenow.instance, "env.service-now.com");
    }
}
