//! The setup workflow behind the AP-mode page.
//!
//! Testing a network means tearing down the very access point the operator
//! is connected through. Every run of [`NetworkProvisioner::test_and_scan`]
//! therefore ends by restarting the hotspot, whatever happened before, and
//! the HTTP call that triggers it blocks for the whole duration (tens of
//! seconds up to a couple of minutes). The operator's device drops off the
//! access point meanwhile and has to re-associate before it sees the reply.

use crate::config::{NetworkSettings, ProvisioningSettings};
use crate::hotspot::HotspotManager;
use crate::store::StateStore;
use crate::structs::{BridgeConfig, DiscoveredSpeaker, ProfileSpec, ProvisionResult, SaveRequest, WifiCredentials};
use crate::traits::{NetworkProfileStore, SpeakerRegistry};
use crate::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

const VOLUME_TEST_BUMP: i16 = 5;
const VOLUME_TEST_HOLD: Duration = Duration::from_millis(300);

/// Forward steps of the test-and-scan workflow. Any failure jumps straight to
/// restoring the access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    PersistCredentials,
    TeardownAp,
    CleanStaleProfiles,
    CreateCandidate,
    ActivateCandidate,
    AwaitLease,
    DiscoverSpeakers,
    RestoreAp,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStep::PersistCredentials => "persist credentials",
            ProvisionStep::TeardownAp => "tear down hotspot",
            ProvisionStep::CleanStaleProfiles => "clean stale profiles",
            ProvisionStep::CreateCandidate => "create candidate profile",
            ProvisionStep::ActivateCandidate => "activate candidate profile",
            ProvisionStep::AwaitLease => "await address lease",
            ProvisionStep::DiscoverSpeakers => "discover speakers",
            ProvisionStep::RestoreAp => "restore hotspot",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StepFailure {
    step: ProvisionStep,
    error: Error,
}

trait AtStep<T> {
    fn at(self, step: ProvisionStep) -> std::result::Result<T, StepFailure>;
}

impl<T> AtStep<T> for Result<T> {
    fn at(self, step: ProvisionStep) -> std::result::Result<T, StepFailure> {
        self.map_err(|error| StepFailure { step, error })
    }
}

/// A lease is usable only if it is in a private range; link-local or
/// public addresses mean DHCP has not completed on the home network.
pub fn is_usable_lease(address: Ipv4Addr) -> bool {
    address.is_private()
}

pub struct NetworkProvisioner {
    hotspot: Arc<HotspotManager>,
    profiles: Arc<dyn NetworkProfileStore>,
    speakers: Arc<dyn SpeakerRegistry>,
    state: StateStore,
    network: NetworkSettings,
    settings: ProvisioningSettings,
    // One workflow at a time: they all share the single radio.
    running: Mutex<()>,
}

impl NetworkProvisioner {
    pub fn new(
        hotspot: Arc<HotspotManager>,
        profiles: Arc<dyn NetworkProfileStore>,
        speakers: Arc<dyn SpeakerRegistry>,
        state: StateStore,
        network: NetworkSettings,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            hotspot,
            profiles,
            speakers,
            state,
            network,
            settings,
            running: Mutex::new(()),
        }
    }

    /// Try `ssid`/`password` as a client, discover speakers on that network,
    /// then bring the hotspot back. Never returns an error: failures are
    /// reported in the result with the tool's own message.
    pub async fn test_and_scan(&self, ssid: &str, password: &str) -> ProvisionResult {
        let _guard = self.running.lock().await;
        tracing::info!(ssid = %ssid, "🧪 Testing WiFi (password {} chars)", password.chars().count());

        let result = match self.try_candidate(ssid, password).await {
            Ok(speakers) => ProvisionResult::success(speakers),
            Err(StepFailure { step, error }) => {
                tracing::error!(ssid = %ssid, "❌ Failed to {}: {}", step, error.detail());
                ProvisionResult::failure(error.detail())
            }
        };

        self.restore_ap().await;
        result
    }

    async fn try_candidate(
        &self,
        ssid: &str,
        password: &str,
    ) -> std::result::Result<Vec<DiscoveredSpeaker>, StepFailure> {
        let creds = WifiCredentials {
            ssid: ssid.to_string(),
            password: password.to_string(),
        };
        self.state
            .save_wifi_creds(&creds)
            .await
            .at(ProvisionStep::PersistCredentials)?;

        self.hotspot.stop().await;
        sleep(Duration::from_secs(self.settings.radio_settle_secs)).await;

        tracing::debug!("Step: {}", ProvisionStep::CleanStaleProfiles);
        for name in [
            ssid,
            self.network.permanent_profile.as_str(),
            self.network.candidate_profile.as_str(),
        ] {
            if name == self.network.hotspot_profile {
                continue;
            }
            if let Err(e) = self.profiles.delete_profile(name).await {
                tracing::debug!("Nothing to delete for '{}': {}", name, e.detail());
            }
        }
        sleep(Duration::from_secs(1)).await;

        let candidate = ProfileSpec::station(&self.network.candidate_profile, ssid, password, false);
        self.profiles
            .add_profile(&candidate)
            .await
            .at(ProvisionStep::CreateCandidate)?;

        self.profiles
            .profile_up(&candidate.name)
            .await
            .at(ProvisionStep::ActivateCandidate)?;

        let address = self.await_lease().await.at(ProvisionStep::AwaitLease)?;
        tracing::info!("✅ Joined '{}' with address {}", ssid, address);

        Ok(self.discover_and_cache().await)
    }

    async fn await_lease(&self) -> Result<Ipv4Addr> {
        let attempts = self.settings.lease_poll_attempts;
        for attempt in 1..=attempts {
            match self.profiles.radio_address().await {
                Ok(Some(address)) if is_usable_lease(address) => return Ok(address),
                Ok(other) => tracing::debug!("Lease attempt {}/{}: {:?}", attempt, attempts, other),
                Err(e) => tracing::debug!("Lease attempt {}/{}: {}", attempt, attempts, e.detail()),
            }
            sleep(Duration::from_secs(self.settings.lease_poll_interval_secs)).await;
        }
        Err(Error::Timeout("Connected but no IP address".to_string()))
    }

    /// Discovery failures are not workflow failures: an empty list is a
    /// valid outcome the operator can retry from the page.
    async fn discover_and_cache(&self) -> Vec<DiscoveredSpeaker> {
        let timeout = Duration::from_secs(self.settings.discovery_timeout_secs);
        let speakers = match self.speakers.discover(timeout).await {
            Ok(speakers) => speakers,
            Err(e) => {
                tracing::error!("Failed to {}: {}", ProvisionStep::DiscoverSpeakers, e.detail());
                Vec::new()
            }
        };
        if let Err(e) = self.state.save_speakers(&speakers).await {
            tracing::warn!("Could not cache speakers: {}", e);
        }
        speakers
    }

    async fn restore_ap(&self) {
        // Refresh the network list while the radio is still free.
        self.hotspot.prescan().await;
        if !self.hotspot.start().await {
            tracing::error!(
                "❌ Failed to {}: the device cannot be reached until it is power-cycled",
                ProvisionStep::RestoreAp
            );
        }
    }

    /// Make the tested network permanent and store the chosen speaker.
    ///
    /// The candidate profile is never promoted: it is deleted and a fresh
    /// permanent profile with autoconnect is written in its place.
    pub async fn commit(&self, request: &SaveRequest) -> Result<()> {
        let _guard = self.running.lock().await;

        for name in [&self.network.permanent_profile, &self.network.candidate_profile] {
            if let Err(e) = self.profiles.delete_profile(name).await {
                tracing::debug!("Nothing to delete for '{}': {}", name, e.detail());
            }
        }

        let permanent = ProfileSpec::station(
            &self.network.permanent_profile,
            &request.ssid,
            &request.password,
            true,
        );
        self.profiles.add_profile(&permanent).await?;

        let config = BridgeConfig {
            speaker_address: Some(request.speaker_address.clone()),
            speaker_name: Some(request.speaker_name.clone()),
            hdmi_port: Some(request.hdmi_port.clone()),
            wifi_ssid: Some(request.ssid.clone()),
        };
        self.state.save_config(&config).await?;
        tracing::info!(
            ssid = %request.ssid,
            "💾 Setup saved: speaker {} ({})",
            request.speaker_name,
            request.speaker_address
        );
        Ok(())
    }

    /// Audible confirmation: nudge the volume up, then put it back.
    pub async fn test_volume(&self, address: &str) -> Result<()> {
        test_volume(self.speakers.as_ref(), address).await
    }
}

/// Raise `address` by a few steps for a moment and restore the level.
pub async fn test_volume(speakers: &dyn SpeakerRegistry, address: &str) -> Result<()> {
    let original = speakers.volume(address).await?;
    let bumped = crate::traits::apply_volume_delta(original, VOLUME_TEST_BUMP);
    speakers.set_volume(address, bumped).await?;
    sleep(VOLUME_TEST_HOLD).await;
    speakers.set_volume(address, original).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockProfileStore, MockSpeakers, MockSystem};
    use crate::config::AppSettings;
    use tempfile::TempDir;

    struct Rig {
        _dir: TempDir,
        store: Arc<MockProfileStore>,
        speakers: Arc<MockSpeakers>,
        state: StateStore,
        provisioner: NetworkProvisioner,
    }

    fn rig(store: MockProfileStore, speakers: MockSpeakers) -> Rig {
        let dir = TempDir::new().unwrap();
        let settings = AppSettings::rooted_at(dir.path());
        let store = Arc::new(store);
        let speakers = Arc::new(speakers);
        let state = StateStore::new(settings.paths.clone());
        let hotspot = Arc::new(HotspotManager::new(
            store.clone(),
            Arc::new(MockSystem::new()),
            state.clone(),
            settings.network.clone(),
            settings.hotspot.clone(),
        ));
        let provisioner = NetworkProvisioner::new(
            hotspot,
            store.clone(),
            speakers.clone(),
            state.clone(),
            settings.network,
            settings.provisioning,
        );
        Rig {
            _dir: dir,
            store,
            speakers,
            state,
            provisioner,
        }
    }

    const WRONG_PASSWORD: &str =
        "Error: Connection activation failed: Secrets were required, but not provided.";

    #[tokio::test(start_paused = true)]
    async fn failed_activation_restores_hotspot_and_keeps_raw_error() {
        let rig = rig(
            MockProfileStore::new().fail_activation("Home", WRONG_PASSWORD),
            MockSpeakers::new(),
        );

        let result = rig.provisioner.test_and_scan("Home", "wrong").await;

        assert_eq!(result, ProvisionResult::failure(WRONG_PASSWORD));
        assert_eq!(rig.store.active().await.as_deref(), Some("SonosBridge-Hotspot"));
        assert_eq!(
            rig.state.load_wifi_creds().await,
            WifiCredentials {
                ssid: "Home".into(),
                password: "wrong".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_discovers_caches_and_restores_hotspot() {
        let rig = rig(
            MockProfileStore::new(),
            MockSpeakers::new()
                .with_speaker("Office", "192.168.1.31", false)
                .with_speaker("Living Room", "192.168.1.30", true),
        );

        let result = rig.provisioner.test_and_scan("Home", "hunter22").await;

        assert!(result.wifi_success);
        assert_eq!(result.error, None);
        let names: Vec<_> = result.speakers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Living Room", "Office"]);
        assert_eq!(rig.state.load_speakers().await, result.speakers);
        assert_eq!(rig.store.active().await.as_deref(), Some("SonosBridge-Hotspot"));

        let candidate = rig.store.profile("SonosBridge-Temp").await.unwrap();
        assert_eq!(candidate.ssid, "Home");
        assert_eq!(candidate.psk.as_deref(), Some("hunter22"));
        assert!(!candidate.autoconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_lease_is_reported_after_polling() {
        let rig = rig(MockProfileStore::new().withhold_lease("Attic"), MockSpeakers::new());

        let result = rig.provisioner.test_and_scan("Attic", "pw").await;

        assert_eq!(result, ProvisionResult::failure("Connected but no IP address"));
        assert_eq!(rig.store.active().await.as_deref(), Some("SonosBridge-Hotspot"));
    }

    #[tokio::test(start_paused = true)]
    async fn open_network_candidate_has_no_psk() {
        let rig = rig(MockProfileStore::new(), MockSpeakers::new());
        let result = rig.provisioner.test_and_scan("CafeGuest", "").await;
        assert!(result.wifi_success);
        assert!(result.speakers.is_empty());
        let candidate = rig.store.profile("SonosBridge-Temp").await.unwrap();
        assert_eq!(candidate.psk, None);
    }

    #[tokio::test(start_paused = true)]
    async fn commit_replaces_candidate_with_permanent_profile() {
        let rig = rig(MockProfileStore::new(), MockSpeakers::new());
        rig.provisioner.test_and_scan("Home", "hunter22").await;

        let request = SaveRequest {
            ssid: "Home".into(),
            password: "hunter22".into(),
            speaker_address: "192.168.1.30".into(),
            speaker_name: "Living Room".into(),
            hdmi_port: "2".into(),
        };
        rig.provisioner.commit(&request).await.unwrap();

        assert!(rig.store.profile("SonosBridge-Temp").await.is_none());
        let permanent = rig.store.profile("SonosBridge-WiFi").await.unwrap();
        assert!(permanent.autoconnect);
        assert_eq!(permanent.ssid, "Home");

        let config = rig.state.load_config().await;
        assert_eq!(config.speaker(), Some("192.168.1.30"));
        assert_eq!(config.wifi_ssid.as_deref(), Some("Home"));
    }

    #[tokio::test(start_paused = true)]
    async fn volume_test_restores_original_level() {
        let rig = rig(MockProfileStore::new(), MockSpeakers::new().with_volume("10.0.0.5", 98));
        rig.provisioner.test_volume("10.0.0.5").await.unwrap();
        assert_eq!(rig.speakers.current_volume("10.0.0.5").await, 98);
        assert_eq!(
            rig.speakers.writes().await,
            ["volume 10.0.0.5 100", "volume 10.0.0.5 98"]
        );
    }

    #[test]
    fn only_private_leases_count() {
        assert!(is_usable_lease(Ipv4Addr::new(192, 168, 1, 20)));
        assert!(is_usable_lease(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(is_usable_lease(Ipv4Addr::new(172, 16, 4, 2)));
        assert!(!is_usable_lease(Ipv4Addr::new(169, 254, 3, 3)));
        assert!(!is_usable_lease(Ipv4Addr::new(8, 8, 8, 8)));
    }
}
