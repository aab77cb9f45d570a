use crate::structs::{DiscoveredSpeaker, Network, ProfileSpec};
use async_trait::async_trait;
use std::borrow::Cow;
use std::net::Ipv4Addr;
use std::time::Duration;

// Capability seams. Every component in this crate talks to the outside world
// only through these traits; `backends` holds the real and in-memory adapters.

/// Named network profiles and the state of the single wireless radio.
#[async_trait]
pub trait NetworkProfileStore: Send + Sync {
    /// Names of all wireless profiles, in the store's order.
    async fn wifi_profiles(&self) -> crate::Result<Vec<String>>;

    async fn add_profile(&self, spec: &ProfileSpec) -> crate::Result<()>;

    async fn delete_profile(&self, name: &str) -> crate::Result<()>;

    async fn profile_up(&self, name: &str) -> crate::Result<()>;

    async fn profile_down(&self, name: &str) -> crate::Result<()>;

    /// Drop whatever the radio is currently doing.
    async fn disconnect_radio(&self) -> crate::Result<()>;

    async fn is_radio_connected(&self) -> crate::Result<bool>;

    /// The IPv4 address currently leased on the radio, if any.
    async fn radio_address(&self) -> crate::Result<Option<Ipv4Addr>>;

    /// Trigger a rescan and return the raw (unsorted, possibly duplicated) list.
    async fn scan_networks(&self) -> crate::Result<Vec<Network>>;
}

/// Reachable playback devices, addressed by IP.
///
/// Implementors provide the primitive reads and writes; the relative volume
/// change and the mute toggle are built on top of them.
#[async_trait]
pub trait SpeakerRegistry: Send + Sync {
    /// Best-effort discovery bounded by `timeout`.
    async fn discover(&self, timeout: Duration) -> crate::Result<Vec<DiscoveredSpeaker>>;

    async fn volume(&self, address: &str) -> crate::Result<u8>;

    async fn set_volume(&self, address: &str, volume: u8) -> crate::Result<()>;

    async fn is_muted(&self, address: &str) -> crate::Result<bool>;

    async fn set_mute(&self, address: &str, muted: bool) -> crate::Result<()>;

    /// Apply a relative change, saturating at 0 and 100. Returns the new level.
    async fn adjust_volume(&self, address: &str, delta: i16) -> crate::Result<u8> {
        let current = self.volume(address).await?;
        let target = apply_volume_delta(current, delta);
        self.set_volume(address, target).await?;
        Ok(target)
    }

    /// Read the mute flag and write its inverse. Returns the new state.
    ///
    /// Not atomic: two overlapping toggles from different callers may both
    /// read the same state and cancel out to a single flip.
    async fn toggle_mute(&self, address: &str) -> crate::Result<bool> {
        let muted = !self.is_muted(address).await?;
        self.set_mute(address, muted).await?;
        Ok(muted)
    }
}

/// `current + delta`, clamped to `[0, 100]`.
pub fn apply_volume_delta(current: u8, delta: i16) -> u8 {
    (i16::from(current.min(100)) + delta).clamp(0, 100) as u8
}

/// Producer of CEC bus traffic as text lines.
#[async_trait]
pub trait CecTransport: Send + Sync {
    /// Start listening, announcing this device under `osd_name`.
    async fn open(&self, osd_name: &str) -> crate::Result<Box<dyn CecLineSource>>;
}

/// An open CEC stream. `Ok(None)` means the transport closed.
#[async_trait]
pub trait CecLineSource: Send {
    async fn next_line(&mut self) -> crate::Result<Option<String>>;
}

/// Host-level operations outside the network store.
#[async_trait]
pub trait SystemControl: Send + Sync {
    /// Unconditional reboot of the whole device.
    async fn reboot(&self) -> crate::Result<()>;

    /// Restart the bridge's own service unit.
    async fn restart_service(&self) -> crate::Result<()>;

    /// Service state as reported by the init system ("active", "failed", ...).
    async fn service_status(&self) -> String;

    /// Restart the local service-discovery responder so the device stays
    /// reachable by name after the radio changed mode.
    async fn restart_mdns(&self) -> crate::Result<()>;
}

/// Frontend asset provider.
#[async_trait]
pub trait UiAssetProvider: Send + Sync {
    /// Retrieves a single UI asset.
    ///
    /// # Arguments
    /// * `path` - The path to the asset (e.g., "setup/index.html").
    ///
    /// # Returns
    /// The asset's content and its MIME type, or `Error::AssetNotFound`.
    async fn get_asset(&self, path: &str) -> crate::Result<(Cow<'static, [u8]>, String)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn volume_delta_saturates() {
        assert_eq!(apply_volume_delta(99, 2), 100);
        assert_eq!(apply_volume_delta(1, -2), 0);
        assert_eq!(apply_volume_delta(40, 2), 42);
    }

    proptest! {
        #[test]
        fn repeated_deltas_stay_in_range(
            start in 0u8..=100,
            deltas in prop::collection::vec(-10i16..=10, 0..200)
        ) {
            let mut volume = start;
            for delta in deltas {
                let next = apply_volume_delta(volume, delta);
                prop_assert!(next <= 100);
                prop_assert_eq!(i16::from(next), (i16::from(volume) + delta).clamp(0, 100));
                volume = next;
            }
        }
    }
}
