//! Boot-time choice between the setup access point and the bridge.
//!
//! The decision runs once per process. Entering the chosen mode replaces the
//! process (see the daemon's `startup` policy), so only what is on disk
//! crosses from one mode to the other.

use crate::config::{BootSettings, NetworkSettings, PathSettings};
use crate::structs::{BridgeConfig, Mode};
use crate::traits::NetworkProfileStore;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Operator escape hatches dropped on the boot partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootFlags {
    pub force_ap: bool,
    pub skip_ap: bool,
}

impl BootFlags {
    pub fn detect(paths: &PathSettings) -> Self {
        let flags = Self {
            force_ap: paths.force_ap_flag.exists(),
            skip_ap: paths.skip_ap_flag.exists(),
        };
        if flags.force_ap {
            tracing::info!("Found {} - forcing AP mode", paths.force_ap_flag.display());
        }
        if flags.skip_ap {
            tracing::info!("Found {} - skipping AP mode", paths.skip_ap_flag.display());
        }
        flags
    }
}

/// The flag-only part of the decision. `Ok(None)` means the radio decides.
pub fn preflight(flags: BootFlags, config: &BridgeConfig) -> Result<Option<Mode>> {
    if flags.force_ap {
        return Ok(Some(Mode::Ap));
    }
    if flags.skip_ap {
        return if config.is_configured() {
            Ok(Some(Mode::Bridge))
        } else {
            Err(Error::OperatorError(
                "SKIP_AP_MODE is set but no speaker is configured".to_string(),
            ))
        };
    }
    Ok(None)
}

/// The whole decision as a function of its inputs.
pub fn decide(flags: BootFlags, has_profiles: bool, connected: bool, config: &BridgeConfig) -> Result<Mode> {
    if let Some(mode) = preflight(flags, config)? {
        return Ok(mode);
    }
    if !has_profiles || !connected || !config.is_configured() {
        return Ok(Mode::Ap);
    }
    Ok(Mode::Bridge)
}

pub struct ModeSelector {
    profiles: Arc<dyn NetworkProfileStore>,
    network: NetworkSettings,
    boot: BootSettings,
}

impl ModeSelector {
    pub fn new(profiles: Arc<dyn NetworkProfileStore>, network: NetworkSettings, boot: BootSettings) -> Self {
        Self {
            profiles,
            network,
            boot,
        }
    }

    /// Pick the mode for this boot. Only an operator error escapes; any
    /// other failure lands in AP mode so the device stays reachable.
    pub async fn select(&self, flags: BootFlags, config: &BridgeConfig) -> Result<Mode> {
        match self.try_select(flags, config).await {
            Ok(mode) => {
                tracing::info!("Selected {:?} mode", mode);
                Ok(mode)
            }
            Err(e @ Error::OperatorError(_)) => Err(e),
            Err(e) => {
                tracing::error!("Mode selection failed, falling back to AP: {}", e.detail());
                Ok(Mode::Ap)
            }
        }
    }

    async fn try_select(&self, flags: BootFlags, config: &BridgeConfig) -> Result<Mode> {
        if let Some(mode) = preflight(flags, config)? {
            return Ok(mode);
        }

        let known = self.known_profiles().await?;
        tracing::info!("WiFi configured: {}", !known.is_empty());
        let connected = if known.is_empty() {
            false
        } else {
            self.establish(&known).await?
        };
        if connected && !config.is_configured() {
            tracing::info!("WiFi is up but no speaker is configured");
        }
        decide(flags, !known.is_empty(), connected, config)
    }

    /// Every wireless profile except the hotspot and the untested candidate,
    /// the permanent one first.
    async fn known_profiles(&self) -> Result<Vec<String>> {
        let mut known: Vec<String> = self
            .profiles
            .wifi_profiles()
            .await?
            .into_iter()
            .filter(|name| *name != self.network.hotspot_profile && *name != self.network.candidate_profile)
            .collect();
        if let Some(pos) = known.iter().position(|n| *n == self.network.permanent_profile) {
            let permanent = known.remove(pos);
            known.insert(0, permanent);
        }
        Ok(known)
    }

    /// Let the network daemon settle, then try each profile until one holds.
    async fn establish(&self, known: &[String]) -> Result<bool> {
        sleep(self.boot.settle()).await;
        if self.profiles.is_radio_connected().await? {
            tracing::info!("WiFi already connected");
            return Ok(true);
        }

        for name in known {
            for attempt in 1..=self.boot.profile_retry_count {
                tracing::info!("Trying '{}' (attempt {}/{})", name, attempt, self.boot.profile_retry_count);
                match self.profiles.profile_up(name).await {
                    Ok(()) if self.wait_connected().await => return Ok(true),
                    Ok(()) => tracing::warn!("'{}' came up but never connected", name),
                    Err(e) => tracing::warn!("'{}' failed: {}", name, e.detail()),
                }
                sleep(Duration::from_secs(self.boot.retry_pause_secs)).await;
            }
        }
        tracing::warn!("No known network could be joined");
        Ok(false)
    }

    async fn wait_connected(&self) -> bool {
        for _ in 0..self.boot.lease_wait_secs.max(1) {
            if let Ok(true) = self.profiles.is_radio_connected().await {
                return true;
            }
            sleep(Duration::from_secs(1)).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockProfileStore;
    use crate::config::AppSettings;
    use crate::structs::ProfileSpec;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn selector(store: Arc<MockProfileStore>) -> ModeSelector {
        let settings = AppSettings::embedded();
        ModeSelector::new(store, settings.network, settings.boot)
    }

    fn configured() -> BridgeConfig {
        BridgeConfig {
            speaker_address: Some("10.0.0.5".into()),
            wifi_ssid: Some("Home".into()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_device_goes_to_ap() {
        let store = Arc::new(MockProfileStore::new());
        let mode = selector(store.clone())
            .select(BootFlags::default(), &BridgeConfig::default())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Ap);
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_device_joins_known_network() {
        let store = Arc::new(MockProfileStore::new().with_profile(ProfileSpec::station("Home", "Home", "pw", true)));
        let mode = selector(store.clone())
            .select(BootFlags::default(), &configured())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Bridge);
        assert_eq!(store.active().await.as_deref(), Some("Home"));
    }

    #[tokio::test(start_paused = true)]
    async fn hotspot_profile_alone_is_not_a_known_network() {
        let hotspot = ProfileSpec {
            name: "SonosBridge-Hotspot".into(),
            ..ProfileSpec::station("x", "SonosBridge-Setup", "sonosbridge", false)
        };
        let store = Arc::new(MockProfileStore::new().with_profile(hotspot));
        let mode = selector(store.clone())
            .select(BootFlags::default(), &configured())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Ap);
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leftover_candidate_profile_is_ignored() {
        let store = Arc::new(
            MockProfileStore::new().with_profile(ProfileSpec::station("SonosBridge-Temp", "Home", "pw", false)),
        );
        let mode = selector(store.clone())
            .select(BootFlags::default(), &configured())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Ap);
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_profile_that_connects_wins() {
        let store = Arc::new(
            MockProfileStore::new()
                .with_profile(ProfileSpec::station("Cafe", "Cafe", "pw", true))
                .with_profile(ProfileSpec::station("Home", "Home", "pw", true))
                .with_profile(ProfileSpec::station("Office", "Office", "pw", true))
                .fail_activation("Cafe", "Error: Connection activation failed."),
        );
        let mode = selector(store.clone())
            .select(BootFlags::default(), &configured())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Bridge);
        assert_eq!(store.active().await.as_deref(), Some("Home"));

        let calls = store.calls().await;
        assert_eq!(calls.iter().filter(|c| *c == "up Cafe").count(), 3);
        assert_eq!(calls.iter().filter(|c| *c == "up Home").count(), 1);
        assert!(!calls.iter().any(|c| c == "up Office"));
    }

    #[tokio::test(start_paused = true)]
    async fn already_connected_radio_skips_activation() {
        let store = Arc::new(MockProfileStore::new().with_profile(ProfileSpec::station("Home", "Home", "pw", true)));
        store.profile_up("Home").await.unwrap();

        let mode = selector(store.clone())
            .select(BootFlags::default(), &configured())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Bridge);
        assert_eq!(store.calls().await, vec!["up Home".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fall_back_to_ap() {
        let store = Arc::new(
            MockProfileStore::new()
                .with_profile(ProfileSpec::station("Home", "Home", "pw", true))
                .fail_activation("Home", "Error: no network with SSID 'Home' found."),
        );
        let mode = selector(store.clone())
            .select(BootFlags::default(), &configured())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Ap);
        let ups = store.calls().await.iter().filter(|c| *c == "up Home").count();
        assert_eq!(ups, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_but_unconfigured_goes_to_ap() {
        let store = Arc::new(MockProfileStore::new().with_profile(ProfileSpec::station("Home", "Home", "pw", true)));
        let mode = selector(store)
            .select(BootFlags::default(), &BridgeConfig::default())
            .await
            .unwrap();
        assert_eq!(mode, Mode::Ap);
    }

    #[tokio::test]
    async fn skip_flag_without_speaker_is_fatal() {
        let store = Arc::new(MockProfileStore::new());
        let flags = BootFlags {
            force_ap: false,
            skip_ap: true,
        };
        let err = selector(store)
            .select(flags, &BridgeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OperatorError(_)));
    }

    #[test]
    fn flags_are_read_from_marker_files() {
        let dir = TempDir::new().unwrap();
        let paths = AppSettings::rooted_at(dir.path()).paths;
        assert_eq!(BootFlags::detect(&paths), BootFlags::default());

        std::fs::write(&paths.force_ap_flag, b"").unwrap();
        let flags = BootFlags::detect(&paths);
        assert!(flags.force_ap);
        assert!(!flags.skip_ap);
    }

    fn any_config() -> impl Strategy<Value = BridgeConfig> {
        prop::option::of("[0-9. ]{0,12}").prop_map(|speaker_address| BridgeConfig {
            speaker_address,
            ..Default::default()
        })
    }

    proptest! {
        #[test]
        fn force_ap_always_wins(
            skip_ap in any::<bool>(),
            has_profiles in any::<bool>(),
            connected in any::<bool>(),
            config in any_config(),
        ) {
            let flags = BootFlags { force_ap: true, skip_ap };
            prop_assert_eq!(decide(flags, has_profiles, connected, &config).unwrap(), Mode::Ap);
        }

        #[test]
        fn bridge_requires_connection_and_speaker(
            has_profiles in any::<bool>(),
            connected in any::<bool>(),
            config in any_config(),
        ) {
            let mode = decide(BootFlags::default(), has_profiles, connected, &config).unwrap();
            let expected = if has_profiles && connected && config.is_configured() { Mode::Bridge } else { Mode::Ap };
            prop_assert_eq!(mode, expected);
        }

        #[test]
        fn skip_ap_never_consults_the_radio(
            has_profiles in any::<bool>(),
            connected in any::<bool>(),
            config in any_config(),
        ) {
            let flags = BootFlags { force_ap: false, skip_ap: true };
            let result = decide(flags, has_profiles, connected, &config);
            if config.is_configured() {
                prop_assert_eq!(result.unwrap(), Mode::Bridge);
            } else {
                prop_assert!(matches!(result, Err(Error::OperatorError(_))));
            }
        }
    }
}
