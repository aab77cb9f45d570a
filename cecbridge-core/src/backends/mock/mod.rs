//! In-memory adapters for every capability trait. Used by the unit tests and
//! by the daemon when built with `backend_mock`, so the whole appliance can
//! be exercised on a laptop.

use crate::structs::{DiscoveredSpeaker, Network, ProfileKind, ProfileSpec};
use crate::traits::{CecLineSource, CecTransport, NetworkProfileStore, SpeakerRegistry, SystemControl};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

const STATION_LEASE: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 57);

#[derive(Debug, Default)]
struct RadioState {
    profiles: Vec<ProfileSpec>,
    active: Option<String>,
    lease: Option<Ipv4Addr>,
    link_down: bool,
    failing: HashMap<String, String>,
    leaseless: HashSet<String>,
    networks: Vec<Network>,
    calls: Vec<String>,
}

/// A fake NetworkManager: named profiles and one radio.
#[derive(Debug, Default)]
pub struct MockProfileStore {
    state: Mutex<RadioState>,
}

impl MockProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with a few networks in range, for running the daemon without hardware.
    pub fn demo() -> Self {
        Self::new().with_networks(vec![
            network("MyHomeWiFi", 95, "WPA2"),
            network("CafeGuest", 78, ""),
            network("Neighbor's Network", 55, "WPA2"),
            network("MyHomeWiFi", 61, "WPA2"),
            network("xfinitywifi", 88, "WPA2"),
        ])
        .fail_activation("xfinitywifi", "Error: Connection activation failed: Secrets were required, but not provided.")
    }

    pub fn with_networks(mut self, networks: Vec<Network>) -> Self {
        self.state.get_mut().networks = networks;
        self
    }

    pub fn with_profile(mut self, spec: ProfileSpec) -> Self {
        self.state.get_mut().profiles.push(spec);
        self
    }

    /// Activating any profile for `ssid` fails with `message`.
    pub fn fail_activation(mut self, ssid: &str, message: &str) -> Self {
        self.state
            .get_mut()
            .failing
            .insert(ssid.to_string(), message.to_string());
        self
    }

    /// Profiles for `ssid` associate but never obtain an address.
    pub fn withhold_lease(mut self, ssid: &str) -> Self {
        self.state.get_mut().leaseless.insert(ssid.to_string());
        self
    }

    /// Simulate the link dropping (or coming back) under an active profile.
    pub async fn set_link_down(&self, down: bool) {
        self.state.lock().await.link_down = down;
    }

    pub async fn active(&self) -> Option<String> {
        self.state.lock().await.active.clone()
    }

    pub async fn profile(&self, name: &str) -> Option<ProfileSpec> {
        let state = self.state.lock().await;
        state.profiles.iter().find(|p| p.name == name).cloned()
    }

    /// Every mutating call, in order, e.g. `"up SonosBridge-Temp"`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }
}

fn network(ssid: &str, signal: u8, security: &str) -> Network {
    Network {
        ssid: ssid.to_string(),
        signal,
        security: security.to_string(),
    }
}

fn unknown_connection(name: &str) -> Error {
    Error::CommandFailed(format!("Error: unknown connection '{}'.", name))
}

#[async_trait]
impl NetworkProfileStore for MockProfileStore {
    async fn wifi_profiles(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.profiles.iter().map(|p| p.name.clone()).collect())
    }

    async fn add_profile(&self, spec: &ProfileSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("add {}", spec.name));
        state.profiles.retain(|p| p.name != spec.name);
        state.profiles.push(spec.clone());
        Ok(())
    }

    async fn delete_profile(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete {}", name));
        let before = state.profiles.len();
        state.profiles.retain(|p| p.name != name);
        if state.profiles.len() == before {
            return Err(unknown_connection(name));
        }
        if state.active.as_deref() == Some(name) {
            state.active = None;
            state.lease = None;
        }
        Ok(())
    }

    async fn profile_up(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("up {}", name));
        let spec = state
            .profiles
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| unknown_connection(name))?;

        // Bringing any profile up takes the radio away from the previous one.
        state.active = None;
        state.lease = None;

        if let Some(message) = state.failing.get(&spec.ssid) {
            return Err(Error::CommandFailed(message.clone()));
        }

        state.lease = match &spec.kind {
            ProfileKind::AccessPoint { gateway_cidr, .. } => gateway_cidr
                .split('/')
                .next()
                .and_then(|ip| ip.parse().ok()),
            ProfileKind::Station if state.leaseless.contains(&spec.ssid) => None,
            ProfileKind::Station => Some(STATION_LEASE),
        };
        state.active = Some(spec.name);
        state.link_down = false;
        Ok(())
    }

    async fn profile_down(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("down {}", name));
        if state.active.as_deref() != Some(name) {
            return Err(Error::CommandFailed(format!(
                "Error: '{}' is not an active connection.",
                name
            )));
        }
        state.active = None;
        state.lease = None;
        Ok(())
    }

    async fn disconnect_radio(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push("disconnect".to_string());
        state.active = None;
        state.lease = None;
        Ok(())
    }

    async fn is_radio_connected(&self) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.active.is_some() && !state.link_down)
    }

    async fn radio_address(&self) -> Result<Option<Ipv4Addr>> {
        let state = self.state.lock().await;
        Ok(if state.link_down { None } else { state.lease })
    }

    async fn scan_networks(&self) -> Result<Vec<Network>> {
        let mut state = self.state.lock().await;
        state.calls.push("scan".to_string());
        Ok(state.networks.clone())
    }
}

#[derive(Debug, Default)]
struct SpeakerState {
    speakers: Vec<DiscoveredSpeaker>,
    volumes: HashMap<String, u8>,
    muted: HashMap<String, bool>,
    unreachable: HashSet<String>,
    writes: Vec<String>,
}

/// Speakers that live in a hash map. Unknown addresses start at volume 20.
#[derive(Debug, Default)]
pub struct MockSpeakers {
    state: Mutex<SpeakerState>,
}

impl MockSpeakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn demo() -> Self {
        Self::new()
            .with_speaker("Living Room", "192.168.1.20", true)
            .with_speaker("Kitchen", "192.168.1.21", false)
    }

    pub fn with_speaker(mut self, name: &str, address: &str, is_coordinator: bool) -> Self {
        self.state.get_mut().speakers.push(DiscoveredSpeaker {
            name: name.to_string(),
            address: address.to_string(),
            model: "Sonos One".to_string(),
            is_coordinator,
        });
        self
    }

    pub fn with_volume(mut self, address: &str, volume: u8) -> Self {
        self.state.get_mut().volumes.insert(address.to_string(), volume);
        self
    }

    pub fn unreachable(mut self, address: &str) -> Self {
        self.state.get_mut().unreachable.insert(address.to_string());
        self
    }

    pub async fn current_volume(&self, address: &str) -> u8 {
        let state = self.state.lock().await;
        state.volumes.get(address).copied().unwrap_or(20)
    }

    pub async fn current_mute(&self, address: &str) -> bool {
        let state = self.state.lock().await;
        state.muted.get(address).copied().unwrap_or(false)
    }

    /// Every successful write, e.g. `"volume 10.0.0.5 25"`.
    pub async fn writes(&self) -> Vec<String> {
        self.state.lock().await.writes.clone()
    }
}

fn check_reachable(state: &SpeakerState, address: &str) -> Result<()> {
    if state.unreachable.contains(address) {
        return Err(Error::Speaker(format!("{} did not respond", address)));
    }
    Ok(())
}

#[async_trait]
impl SpeakerRegistry for MockSpeakers {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredSpeaker>> {
        let state = self.state.lock().await;
        let mut speakers = state.speakers.clone();
        crate::structs::sort_speakers(&mut speakers);
        Ok(speakers)
    }

    async fn volume(&self, address: &str) -> Result<u8> {
        let state = self.state.lock().await;
        check_reachable(&state, address)?;
        Ok(state.volumes.get(address).copied().unwrap_or(20))
    }

    async fn set_volume(&self, address: &str, volume: u8) -> Result<()> {
        let mut state = self.state.lock().await;
        check_reachable(&state, address)?;
        state.volumes.insert(address.to_string(), volume);
        state.writes.push(format!("volume {} {}", address, volume));
        Ok(())
    }

    async fn is_muted(&self, address: &str) -> Result<bool> {
        let state = self.state.lock().await;
        check_reachable(&state, address)?;
        Ok(state.muted.get(address).copied().unwrap_or(false))
    }

    async fn set_mute(&self, address: &str, muted: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        check_reachable(&state, address)?;
        state.muted.insert(address.to_string(), muted);
        state.writes.push(format!("mute {} {}", address, muted));
        Ok(())
    }
}

/// Counts host operations instead of performing them.
#[derive(Debug, Default)]
pub struct MockSystem {
    reboots: AtomicUsize,
    service_restarts: AtomicUsize,
    mdns_restarts: AtomicUsize,
}

impl MockSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::SeqCst)
    }

    pub fn service_restarts(&self) -> usize {
        self.service_restarts.load(Ordering::SeqCst)
    }

    pub fn mdns_restarts(&self) -> usize {
        self.mdns_restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SystemControl for MockSystem {
    async fn reboot(&self) -> Result<()> {
        tracing::warn!("🤖 [MockSystem] reboot requested");
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restart_service(&self) -> Result<()> {
        self.service_restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn service_status(&self) -> String {
        "active".to_string()
    }

    async fn restart_mdns(&self) -> Result<()> {
        self.mdns_restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Replays a fixed script of bus lines, then either closes or stays silent.
#[derive(Debug)]
pub struct MockCec {
    script: Mutex<Vec<String>>,
    hold_open: bool,
    opened_as: Mutex<Vec<String>>,
}

impl MockCec {
    /// The stream ends after the last line.
    pub fn closing(lines: &[&str]) -> Self {
        Self::build(lines, false)
    }

    /// After the last line the stream stays open and idle.
    pub fn idle_after(lines: &[&str]) -> Self {
        Self::build(lines, true)
    }

    fn build(lines: &[&str], hold_open: bool) -> Self {
        Self {
            script: Mutex::new(lines.iter().map(|l| l.to_string()).collect()),
            hold_open,
            opened_as: Mutex::new(Vec::new()),
        }
    }

    /// OSD names passed to each `open`.
    pub async fn opened_as(&self) -> Vec<String> {
        self.opened_as.lock().await.clone()
    }
}

#[async_trait]
impl CecTransport for MockCec {
    async fn open(&self, osd_name: &str) -> Result<Box<dyn CecLineSource>> {
        self.opened_as.lock().await.push(osd_name.to_string());
        let lines = std::mem::take(&mut *self.script.lock().await);
        Ok(Box::new(ScriptedLines {
            lines: lines.into(),
            hold_open: self.hold_open,
        }))
    }
}

struct ScriptedLines {
    lines: VecDeque<String>,
    hold_open: bool,
}

#[async_trait]
impl CecLineSource for ScriptedLines {
    async fn next_line(&mut self) -> Result<Option<String>> {
        match self.lines.pop_front() {
            Some(line) => Ok(Some(line)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_activation_leaves_radio_idle() {
        let store = MockProfileStore::new()
            .with_profile(ProfileSpec::station("Temp", "Home", "pw", false))
            .fail_activation("Home", "Secrets were required");
        let err = store.profile_up("Temp").await.unwrap_err();
        assert_eq!(err.detail(), "Secrets were required");
        assert_eq!(store.active().await, None);
        assert!(!store.is_radio_connected().await.unwrap());
    }

    #[tokio::test]
    async fn station_gets_lease_unless_withheld() {
        let store = MockProfileStore::new()
            .with_profile(ProfileSpec::station("A", "Home", "pw", true))
            .with_profile(ProfileSpec::station("B", "Attic", "pw", true))
            .withhold_lease("Attic");
        store.profile_up("A").await.unwrap();
        assert_eq!(store.radio_address().await.unwrap(), Some(STATION_LEASE));
        store.profile_up("B").await.unwrap();
        assert_eq!(store.active().await.as_deref(), Some("B"));
        assert_eq!(store.radio_address().await.unwrap(), None);
    }
}
