//! Configuration loading and validation

use anyhow::Result;
use lanscope_discovery::probe::DEFAULT_MAX_SWEEP_HOSTS;
use lanscope_discovery::{ScanMode, ScannerConfig};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Mode used when a scan request does not name one
    #[serde(default)]
    pub default_mode: ScanMode,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_mode: ScanMode::default(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Subnet to sweep; the local interface's subnet when unset
    #[serde(default)]
    pub subnet: Option<Ipv4Addr>,
    #[serde(default)]
    pub prefix_len: Option<u8>,
    /// Address to treat as this host
    #[serde(default)]
    pub local_ip: Option<Ipv4Addr>,
    /// Preferred network interface
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_max_sweep_hosts")]
    pub max_sweep_hosts: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet: None,
            prefix_len: None,
            local_ip: None,
            interface: None,
            max_sweep_hosts: default_max_sweep_hosts(),
        }
    }
}

fn default_max_sweep_hosts() -> usize {
    DEFAULT_MAX_SWEEP_HOSTS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_fast_stage")]
    pub fast_stage_timeout_secs: u64,
    #[serde(default = "default_complete_stage")]
    pub complete_stage_timeout_secs: u64,
    #[serde(default = "default_fast_scan")]
    pub fast_scan_timeout_secs: u64,
    #[serde(default = "default_complete_scan")]
    pub complete_scan_timeout_secs: u64,
    #[serde(default = "default_enrichment")]
    pub enrichment_timeout_secs: u64,
    #[serde(default = "default_lookup_ms")]
    pub lookup_timeout_ms: u64,
    /// Per-echo wait for the ping sweep
    #[serde(default = "default_ping")]
    pub ping_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fast_stage_timeout_secs: default_fast_stage(),
            complete_stage_timeout_secs: default_complete_stage(),
            fast_scan_timeout_secs: default_fast_scan(),
            complete_scan_timeout_secs: default_complete_scan(),
            enrichment_timeout_secs: default_enrichment(),
            lookup_timeout_ms: default_lookup_ms(),
            ping_timeout_secs: default_ping(),
        }
    }
}

fn default_fast_stage() -> u64 {
    10
}

fn default_complete_stage() -> u64 {
    30
}

fn default_fast_scan() -> u64 {
    60
}

fn default_complete_scan() -> u64 {
    180
}

fn default_enrichment() -> u64 {
    20
}

fn default_lookup_ms() -> u64 {
    5000
}

fn default_ping() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Manufacturer lookups run together
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Extra `[[vendor]]` table merged over the built-in one
    #[serde(default)]
    pub oui_file: Option<PathBuf>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            oui_file: None,
        }
    }
}

fn default_batch_size() -> usize {
    lanscope_discovery::enrichment::DEFAULT_BATCH_SIZE
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid prefix length /{0}")]
    InvalidPrefix(u8),
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("`{field}` ({stage}s) exceeds the scan timeout ({scan}s)")]
    StageExceedsScan {
        field: &'static str,
        stage: u64,
        scan: u64,
    },
}

impl Config {
    /// Reject values no scan could run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(prefix) = self.discovery.prefix_len {
            if prefix > 32 {
                return Err(ConfigError::InvalidPrefix(prefix));
            }
        }

        let t = &self.timing;
        for (field, value) in [
            ("fast_stage_timeout_secs", t.fast_stage_timeout_secs),
            ("complete_stage_timeout_secs", t.complete_stage_timeout_secs),
            ("fast_scan_timeout_secs", t.fast_scan_timeout_secs),
            ("complete_scan_timeout_secs", t.complete_scan_timeout_secs),
            ("lookup_timeout_ms", t.lookup_timeout_ms),
            ("batch_size", self.enrichment.batch_size as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(field));
            }
        }

        if t.fast_stage_timeout_secs > t.fast_scan_timeout_secs {
            return Err(ConfigError::StageExceedsScan {
                field: "fast_stage_timeout_secs",
                stage: t.fast_stage_timeout_secs,
                scan: t.fast_scan_timeout_secs,
            });
        }
        if t.complete_stage_timeout_secs > t.complete_scan_timeout_secs {
            return Err(ConfigError::StageExceedsScan {
                field: "complete_stage_timeout_secs",
                stage: t.complete_stage_timeout_secs,
                scan: t.complete_scan_timeout_secs,
            });
        }
        Ok(())
    }

    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        let t = &self.timing;
        ScannerConfig {
            subnet: self.discovery.subnet,
            prefix_len: self.discovery.prefix_len,
            local_ip: self.discovery.local_ip,
            interface: self.discovery.interface.clone(),
            max_sweep_hosts: self.discovery.max_sweep_hosts,
            fast_stage_timeout_ms: t.fast_stage_timeout_secs.saturating_mul(1000),
            complete_stage_timeout_ms: t.complete_stage_timeout_secs.saturating_mul(1000),
            fast_scan_timeout_ms: t.fast_scan_timeout_secs.saturating_mul(1000),
            complete_scan_timeout_ms: t.complete_scan_timeout_secs.saturating_mul(1000),
            enrichment_timeout_ms: t.enrichment_timeout_secs.saturating_mul(1000),
            lookup_timeout_ms: t.lookup_timeout_ms,
            ping_timeout_secs: t.ping_timeout_secs,
            batch_size: self.enrichment.batch_size,
            oui_file: self.enrichment.oui_file.clone(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };

    config.validate()?;
    Ok(config)
}
