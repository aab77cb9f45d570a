//! Owner of every file shared between the bridge loop, the setup workflow and
//! the HTTP handlers.
//!
//! Writers replace whole files: the new content goes to `<file>.tmp` and is
//! renamed over the target, so a concurrent reader sees either the old or the
//! new document, never a torn one. Readers treat a missing or unreadable file
//! as empty.

use crate::config::PathSettings;
use crate::structs::{BridgeConfig, DiscoveredSpeaker, Network, WifiCredentials};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct StateStore {
    paths: PathSettings,
}

impl StateStore {
    pub fn new(paths: PathSettings) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathSettings {
        &self.paths
    }

    pub async fn load_config(&self) -> BridgeConfig {
        read_json_or_default(&self.paths.config_file).await
    }

    pub async fn save_config(&self, config: &BridgeConfig) -> Result<()> {
        write_json_atomic(&self.paths.config_file, config).await?;
        tracing::info!(path = %self.paths.config_file.display(), "Configuration saved");
        Ok(())
    }

    /// Remove the configuration entirely (factory reset).
    pub async fn clear_config(&self) -> Result<()> {
        match fs::remove_file(&self.paths.config_file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_scan(&self) -> Vec<Network> {
        read_json_or_default(&self.paths.scan_cache).await
    }

    pub async fn save_scan(&self, networks: &[Network]) -> Result<()> {
        write_json_atomic(&self.paths.scan_cache, &networks).await
    }

    pub async fn load_speakers(&self) -> Vec<DiscoveredSpeaker> {
        read_json_or_default(&self.paths.speaker_cache).await
    }

    pub async fn save_speakers(&self, speakers: &[DiscoveredSpeaker]) -> Result<()> {
        write_json_atomic(&self.paths.speaker_cache, &speakers).await?;
        tracing::info!("Cached {} speakers", speakers.len());
        Ok(())
    }

    pub async fn load_wifi_creds(&self) -> WifiCredentials {
        read_json_or_default(&self.paths.wifi_creds).await
    }

    pub async fn save_wifi_creds(&self, creds: &WifiCredentials) -> Result<()> {
        write_json_atomic(&self.paths.wifi_creds, creds).await
    }

    /// The last `lines` lines of the log file, or an empty string.
    pub async fn tail_log(&self, lines: usize) -> String {
        match fs::read_to_string(&self.paths.log_file).await {
            Ok(content) => {
                let all: Vec<&str> = content.lines().collect();
                let start = all.len().saturating_sub(lines);
                all[start..].join("\n")
            }
            Err(e) => format!("Error reading log: {e}"),
        }
    }
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::error!(path = %path.display(), "Ignoring unreadable file: {}", e);
            T::default()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => T::default(),
        Err(e) => {
            tracing::error!(path = %path.display(), "Failed to read file: {}", e);
            T::default()
        }
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppSettings;
    use tempfile::TempDir;

    fn store() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let settings = AppSettings::rooted_at(dir.path());
        (dir, StateStore::new(settings.paths))
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let (_dir, store) = store();
        assert_eq!(store.load_config().await, BridgeConfig::default());
        assert!(store.load_scan().await.is_empty());
        assert!(store.load_speakers().await.is_empty());
        assert_eq!(store.load_wifi_creds().await, WifiCredentials::default());
    }

    #[tokio::test]
    async fn config_round_trips_and_leaves_no_temp_file() {
        let (dir, store) = store();
        let config = BridgeConfig {
            speaker_address: Some("10.0.0.5".into()),
            speaker_name: Some("Den".into()),
            hdmi_port: Some("2".into()),
            wifi_ssid: Some("Home".into()),
        };
        store.save_config(&config).await.unwrap();
        assert_eq!(store.load_config().await, config);
        assert!(!dir.path().join("config.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_config_reads_as_unconfigured() {
        let (_dir, store) = store();
        std::fs::write(&store.paths().config_file, b"{ not json").unwrap();
        assert!(!store.load_config().await.is_configured());
    }

    #[tokio::test]
    async fn credentials_are_overwritten_by_next_submission() {
        let (_dir, store) = store();
        store
            .save_wifi_creds(&WifiCredentials { ssid: "Old".into(), password: "a".into() })
            .await
            .unwrap();
        store
            .save_wifi_creds(&WifiCredentials { ssid: "Home".into(), password: "b".into() })
            .await
            .unwrap();
        assert_eq!(store.load_wifi_creds().await.ssid, "Home");
    }

    #[tokio::test]
    async fn clear_config_is_idempotent() {
        let (_dir, store) = store();
        store.clear_config().await.unwrap();
        store.save_config(&BridgeConfig::default()).await.unwrap();
        store.clear_config().await.unwrap();
        assert!(!store.paths().config_file.exists());
    }

    #[tokio::test]
    async fn tail_log_returns_last_lines() {
        let (_dir, store) = store();
        std::fs::write(&store.paths().log_file, "one\ntwo\nthree\n").unwrap();
        assert_eq!(store.tail_log(2).await, "two\nthree");
    }
}
