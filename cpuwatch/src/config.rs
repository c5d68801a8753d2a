//! Audit configuration
//!
//! Handles:
//! - SSH principal and timeouts
//! - Sampling interval, busy threshold, connection retries
//! - Fleet selection (server list, teams, hostname prefixes) and concurrency
//! - Inventory sources and CSV destination
//!
//! Lookup order: `--config`, `$CPUWATCH_CONFIG`, `<config dir>/cpuwatch/config.toml`.
//! A missing file means defaults; an unreadable or invalid one is an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cpuwatch_core::{FleetConfig, SamplerConfig, DEFAULT_CONCURRENCY, DEFAULT_THRESHOLD_PCT};

pub const CONFIG_ENV: &str = "CPUWATCH_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub ssh: SshConfig,
    pub sampling: SamplingConfig,
    pub fleet: FleetSelection,
    pub inventory: InventoryConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    #[serde(with = "humantime_str")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_str")]
    pub command_timeout: Duration,
    /// Extra `-o` options passed to ssh
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    #[serde(with = "humantime_str")]
    pub interval: Duration,
    pub threshold_pct: f64,
    pub connect_attempts: u32,
    #[serde(with = "humantime_str")]
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSelection {
    pub server_list: PathBuf,
    /// Empty = every team found in the server list
    pub teams: Vec<String>,
    pub prefixes: Vec<String>,
    pub concurrency: usize,
    /// Global deadline for the whole run
    #[serde(with = "humantime_opt")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Files produced by `aws ec2 describe-instances --output json`
    pub ec2_exports: Vec<PathBuf>,
    pub owner_tag: String,
    pub http_url: Option<String>,
    #[serde(with = "humantime_str")]
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// `{date}` is replaced by the run's UTC timestamp
    pub csv_path: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: std::env::var("USER").unwrap_or_else(|_| "root".to_string()),
            port: 22,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            options: vec![
                "BatchMode=yes".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
            ],
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let sampler = SamplerConfig::default();
        Self {
            interval: sampler.interval,
            threshold_pct: DEFAULT_THRESHOLD_PCT,
            connect_attempts: sampler.connect_attempts,
            retry_backoff: sampler.retry_backoff,
        }
    }
}

impl Default for FleetSelection {
    fn default() -> Self {
        Self {
            server_list: PathBuf::from("server_list.txt"),
            teams: Vec::new(),
            prefixes: vec!["TA-".to_string(), "AC-".to_string()],
            concurrency: DEFAULT_CONCURRENCY,
            timeout: None,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            ec2_exports: Vec::new(),
            owner_tag: "Owner".to_string(),
            http_url: None,
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_path: "cpu_usage.csv".to_string(),
        }
    }
}

impl AuditConfig {
    /// Load config from the explicit path, the env var, or the OS config dir
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => Some(PathBuf::from(path)),
                None => Self::config_file_path().filter(|p| p.exists()),
            },
        };

        match path {
            Some(path) => Self::load_from(&path).await,
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AuditConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("cpuwatch");
        path.push("config.toml");
        Some(path)
    }

    pub fn fleet_config(&self) -> FleetConfig {
        FleetConfig {
            sampler: SamplerConfig {
                interval: self.sampling.interval,
                threshold_pct: self.sampling.threshold_pct,
                connect_attempts: self.sampling.connect_attempts,
                retry_backoff: self.sampling.retry_backoff,
            },
            concurrency: self.fleet.concurrency,
        }
    }
}

mod humantime_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod humantime_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| humantime::parse_duration(&t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
