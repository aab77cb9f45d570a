use crate::config::{HotspotSettings, NetworkSettings};
use crate::store::StateStore;
use crate::structs::{normalize_scan, Network, ProfileKind, ProfileSpec};
use crate::traits::{NetworkProfileStore, SystemControl};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const STEP_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HotspotStep {
    Create,
    Activate,
}

impl fmt::Display for HotspotStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotspotStep::Create => f.write_str("create access-point profile"),
            HotspotStep::Activate => f.write_str("activate access-point profile"),
        }
    }
}

/// Owns the provisioning access point.
pub struct HotspotManager {
    profiles: Arc<dyn NetworkProfileStore>,
    system: Arc<dyn SystemControl>,
    state: StateStore,
    network: NetworkSettings,
    hotspot: HotspotSettings,
}

impl HotspotManager {
    pub fn new(
        profiles: Arc<dyn NetworkProfileStore>,
        system: Arc<dyn SystemControl>,
        state: StateStore,
        network: NetworkSettings,
        hotspot: HotspotSettings,
    ) -> Self {
        Self {
            profiles,
            system,
            state,
            network,
            hotspot,
        }
    }

    fn profile_spec(&self) -> ProfileSpec {
        ProfileSpec {
            name: self.network.hotspot_profile.clone(),
            ssid: self.hotspot.ssid.clone(),
            psk: Some(self.hotspot.psk.clone()),
            autoconnect: false,
            kind: ProfileKind::AccessPoint {
                band: self.hotspot.band.clone(),
                channel: self.hotspot.channel,
                gateway_cidr: self.hotspot.gateway_cidr.clone(),
            },
        }
    }

    /// Recreate and activate the access point.
    ///
    /// `false` means the device is unreachable; nothing retries after this,
    /// the operator has to power-cycle.
    pub async fn start(&self) -> bool {
        let name = self.network.hotspot_profile.as_str();
        tracing::info!("📡 Starting hotspot '{}'", self.hotspot.ssid);

        if let Err(e) = self.profiles.delete_profile(name).await {
            tracing::debug!("No stale hotspot profile to remove: {}", e.detail());
        }
        if let Err(e) = self.profiles.disconnect_radio().await {
            tracing::debug!("Radio disconnect: {}", e.detail());
        }
        sleep(STEP_PAUSE).await;

        let spec = self.profile_spec();
        if let Err(e) = self.profiles.add_profile(&spec).await {
            return self.step_failed(HotspotStep::Create, e);
        }
        sleep(STEP_PAUSE).await;

        if let Err(e) = self.profiles.profile_up(name).await {
            return self.step_failed(HotspotStep::Activate, e);
        }

        if let Err(e) = self.system.restart_mdns().await {
            // Still reachable by address, just not by name.
            tracing::warn!("Could not restart mDNS responder: {}", e.detail());
        }

        tracing::info!(
            "✅ Hotspot active: connect to '{}' and open http://{}",
            self.hotspot.ssid,
            self.hotspot.gateway_ip()
        );
        true
    }

    fn step_failed(&self, step: HotspotStep, error: crate::Error) -> bool {
        tracing::error!(
            "❌ Hotspot failed to {}: {}. Device is unreachable until power-cycled.",
            step,
            error.detail()
        );
        false
    }

    /// Deactivate and delete the access point. Safe when it is not running.
    pub async fn stop(&self) {
        let name = self.network.hotspot_profile.as_str();
        if let Err(e) = self.profiles.profile_down(name).await {
            tracing::debug!("Hotspot was not active: {}", e.detail());
        }
        if let Err(e) = self.profiles.delete_profile(name).await {
            tracing::debug!("Hotspot profile already gone: {}", e.detail());
        }
        tracing::info!("Hotspot stopped");
    }

    /// Scan while the radio is free and refresh the network cache the setup
    /// page reads. Returns the cached list (empty if the scan failed).
    pub async fn prescan(&self) -> Vec<Network> {
        if let Err(e) = self.profiles.profile_down(&self.network.hotspot_profile).await {
            tracing::debug!("Hotspot not up before scan: {}", e.detail());
        }
        sleep(STEP_PAUSE).await;

        let networks = match self.profiles.scan_networks().await {
            Ok(raw) => normalize_scan(raw),
            Err(e) => {
                tracing::warn!("⚠️ Network scan failed: {}", e.detail());
                return Vec::new();
            }
        };
        if let Err(e) = self.state.save_scan(&networks).await {
            tracing::warn!("Could not cache scan results: {}", e);
        }
        tracing::info!("🔍 Found {} networks", networks.len());
        networks
    }
}
