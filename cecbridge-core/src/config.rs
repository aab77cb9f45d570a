//! Device settings: file locations, profile names, hotspot parameters and
//! every fixed wait/retry constant. Parsed from TOML.

use crate::Result;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

static DEFAULT_SETTINGS: Lazy<AppSettings> = Lazy::new(|| {
    const SETTINGS_TOML: &str = include_str!("../../configs/bridge.toml");
    AppSettings::from_toml_str(SETTINGS_TOML).expect("Failed to parse embedded bridge.toml")
});

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub paths: PathSettings,
    pub network: NetworkSettings,
    pub hotspot: HotspotSettings,
    pub boot: BootSettings,
    pub provisioning: ProvisioningSettings,
    pub bridge: BridgeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    pub config_file: PathBuf,
    pub scan_cache: PathBuf,
    pub speaker_cache: PathBuf,
    pub wifi_creds: PathBuf,
    pub log_file: PathBuf,
    pub force_ap_flag: PathBuf,
    pub skip_ap_flag: PathBuf,
}

/// Radio interface and the three managed profile names.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    pub interface_name: String,
    pub hotspot_profile: String,
    pub candidate_profile: String,
    pub permanent_profile: String,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HotspotSettings {
    pub ssid: String,
    pub psk: String,
    pub gateway_cidr: String,
    pub band: String,
    pub channel: u8,
    pub bind_addr: SocketAddr,
}

impl HotspotSettings {
    /// Gateway address without the prefix length, e.g. `192.168.4.1`.
    pub fn gateway_ip(&self) -> &str {
        self.gateway_cidr.split('/').next().unwrap_or(&self.gateway_cidr)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootSettings {
    pub settle_secs: u64,
    pub profile_retry_count: u32,
    pub lease_wait_secs: u64,
    pub retry_pause_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningSettings {
    pub radio_settle_secs: u64,
    pub lease_poll_attempts: u32,
    pub lease_poll_interval_secs: u64,
    pub discovery_timeout_secs: u64,
    pub reboot_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    pub service_name: String,
    pub admin_bind_addr: SocketAddr,
    pub volume_step: i16,
    pub watchdog_interval_secs: u64,
    pub watchdog_threshold: u32,
    pub watchdog_check_timeout_secs: u64,
    pub startup_wifi_attempts: u32,
    pub startup_wifi_interval_secs: u64,
    pub restart_backoff_secs: u64,
}

impl AppSettings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a settings file from disk, replacing the embedded defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// The settings compiled into the binary.
    pub fn embedded() -> Self {
        DEFAULT_SETTINGS.clone()
    }

    /// Same as the embedded settings, with every file rooted under `dir`.
    /// Used by tests and the mock backend so nothing touches `/opt` or `/boot`.
    pub fn rooted_at(dir: &Path) -> Self {
        let mut settings = Self::embedded();
        let paths = &mut settings.paths;
        for path in [
            &mut paths.config_file,
            &mut paths.scan_cache,
            &mut paths.speaker_cache,
            &mut paths.wifi_creds,
            &mut paths.log_file,
            &mut paths.force_ap_flag,
            &mut paths.skip_ap_flag,
        ] {
            if let Some(name) = path.file_name() {
                *path = dir.join(name);
            }
        }
        settings
    }
}

impl BootSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}
