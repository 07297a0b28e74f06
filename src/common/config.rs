//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment < CLI
use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "MSGLINK_";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 100;
pub const DEFAULT_ARCHIVE_TIMEOUT_SECS: u64 = 600;
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;
const MAX_SETTLE_DELAY_MS: u64 = 60_000;

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "msglink")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("msglink.toml"))
}

fn default_db_dir() -> PathBuf {
    ProjectDirs::from("", "", "msglink")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Discovery endpoint that returns the protocol list.
    pub protocol_check_url: String,
}

/// Identity this client presents in every request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub mobile_id: String,
    pub app_type: String,
    pub os_type: String,
    pub app_version: String,
    pub device_id: String,
    pub ip_address: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            mobile_id: String::new(),
            app_type: "13".to_string(),
            os_type: "03".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            device_id: String::new(),
            ip_address: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub request_timeout_secs: u64,
    /// Org archive downloads can be large; they get their own budget.
    pub archive_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            archive_timeout_secs: DEFAULT_ARCHIVE_TIMEOUT_SECS,
            user_agent: concat!("msglink/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgSyncSettings {
    pub db_dir: PathBuf,
    pub db_file_name: String,
    /// Extra wait after the archive is synced to disk. Zero disables it.
    pub settle_delay_ms: u64,
}

impl Default for OrgSyncSettings {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
            db_file_name: "OrgDirectory.sqlite".to_string(),
            settle_delay_ms: 0,
        }
    }
}

impl OrgSyncSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Fully resolved client configuration after all layers merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerSettings,
    pub device: DeviceSettings,
    pub http: HttpSettings,
    pub org_sync: OrgSyncSettings,
}

impl ClientConfig {
    /// Rejects values that would make every request fail or hang.
    pub fn validate(&self) -> Result<()> {
        Self::validate_timeout("http.request_timeout_secs", self.http.request_timeout_secs)?;
        Self::validate_timeout("http.archive_timeout_secs", self.http.archive_timeout_secs)?;
        ensure!(
            !self.http.user_agent.trim().is_empty(),
            "Invalid config: http.user_agent must not be empty"
        );
        ensure!(
            !self.org_sync.db_file_name.trim().is_empty(),
            "Invalid config: org_sync.db_file_name must not be empty"
        );
        ensure!(
            Path::new(&self.org_sync.db_file_name).file_name()
                == Some(self.org_sync.db_file_name.as_ref()),
            "Invalid config: org_sync.db_file_name must be a bare file name"
        );
        ensure!(
            self.org_sync.settle_delay_ms <= MAX_SETTLE_DELAY_MS,
            "Invalid config: org_sync.settle_delay_ms must be <= {MAX_SETTLE_DELAY_MS}"
        );
        Ok(())
    }

    fn validate_timeout(name: &str, secs: u64) -> Result<()> {
        ensure!(secs > 0, "Invalid config: {name} must be > 0");
        ensure!(
            secs <= MAX_TIMEOUT_SECS,
            "Invalid config: {name} must be <= {MAX_TIMEOUT_SECS}"
        );
        Ok(())
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_check_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_dir: Option<PathBuf>,
}

/// Loads config from defaults/file/env.
pub fn load_config() -> Result<ClientConfig> {
    load_config_from(&config_path())
}

/// Loads config using an explicit file path for the file layer.
pub fn load_config_from(path: &Path) -> Result<ClientConfig> {
    let config: ClientConfig = Figment::new()
        .merge(Serialized::defaults(ClientConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("Failed to load configuration")?;

    config.validate()?;

    Ok(config)
}

/// Applies runtime overrides to a loaded config.
pub fn apply_overrides(mut config: ClientConfig, overrides: &ConfigOverrides) -> ClientConfig {
    if let Some(url) = &overrides.protocol_check_url {
        config.server.protocol_check_url = url.clone();
    }
    if let Some(mobile_id) = &overrides.mobile_id {
        config.device.mobile_id = mobile_id.clone();
    }
    if let Some(db_dir) = &overrides.db_dir {
        config.org_sync.db_dir = db_dir.clone();
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.http.request_timeout(), Duration::from_secs(100));
        assert_eq!(config.device.app_type, "13");
        assert_eq!(config.device.os_type, "03");
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = ClientConfig::default();
        config.http.request_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn rejects_db_file_name_with_directories() {
        let mut config = ClientConfig::default();
        config.org_sync.db_file_name = "../escape.sqlite".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("db_file_name"));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut config = ClientConfig::default();
        config.device.mobile_id = "from-file".into();
        let overrides = ConfigOverrides {
            protocol_check_url: Some("http://gw.example/check".into()),
            ..Default::default()
        };

        let config = apply_overrides(config, &overrides);
        assert_eq!(config.server.protocol_check_url, "http://gw.example/check");
        assert_eq!(config.device.mobile_id, "from-file");
    }
}
