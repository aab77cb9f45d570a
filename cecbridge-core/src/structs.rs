use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single Wi-Fi network found during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub ssid: String,
    pub signal: u8,       // signal strength, 0 to 100
    pub security: String, // "WPA2", "WPA1 WPA2", "" (open) ...
}

/// Collapse a raw scan into the cached form: no empty SSIDs, one entry per
/// SSID (the strongest), strongest first.
pub fn normalize_scan(raw: Vec<Network>) -> Vec<Network> {
    let mut best: HashMap<String, Network> = HashMap::new();
    for network in raw {
        if network.ssid.is_empty() {
            continue;
        }
        match best.get(&network.ssid) {
            Some(existing) if existing.signal >= network.signal => {}
            _ => {
                best.insert(network.ssid.clone(), network);
            }
        }
    }

    let mut networks: Vec<Network> = best.into_values().collect();
    networks.sort_by(|a, b| b.signal.cmp(&a.signal).then_with(|| a.ssid.cmp(&b.ssid)));
    networks
}

/// A playback device found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSpeaker {
    pub name: String,
    #[serde(alias = "ip")]
    pub address: String,
    pub model: String,
    pub is_coordinator: bool,
}

/// Coordinators first, then alphabetical by name.
pub fn sort_speakers(speakers: &mut [DiscoveredSpeaker]) {
    speakers.sort_by(|a, b| {
        b.is_coordinator
            .cmp(&a.is_coordinator)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Persisted device configuration. A non-empty `speaker_address` is the only
/// "is configured" signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default, alias = "speaker_ip")]
    pub speaker_address: Option<String>,
    #[serde(default)]
    pub speaker_name: Option<String>,
    #[serde(default)]
    pub hdmi_port: Option<String>,
    #[serde(default)]
    pub wifi_ssid: Option<String>,
}

impl BridgeConfig {
    pub fn speaker(&self) -> Option<&str> {
        self.speaker_address
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }

    pub fn is_configured(&self) -> bool {
        self.speaker().is_some()
    }
}

/// Credentials the operator submitted most recently. Written before the
/// hotspot goes down so a page reload after re-association can show them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

/// Body of `/api/test-wifi-and-scan`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionRequest {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

/// Result contract of the test-and-scan workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    pub wifi_success: bool,
    pub speakers: Vec<DiscoveredSpeaker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProvisionResult {
    pub fn success(speakers: Vec<DiscoveredSpeaker>) -> Self {
        Self {
            wifi_success: true,
            speakers,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            wifi_success: false,
            speakers: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Body of `/api/save`: commit the tested network and the chosen speaker.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "speaker_ip")]
    pub speaker_address: String,
    #[serde(default)]
    pub speaker_name: String,
    #[serde(default = "default_hdmi_port")]
    pub hdmi_port: String,
}

fn default_hdmi_port() -> String {
    "2".to_string()
}

/// Operating mode chosen once per boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ap,
    Bridge,
}

impl Mode {
    /// The daemon subcommand that runs this mode.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Mode::Ap => "ap",
            Mode::Bridge => "bridge",
        }
    }
}

/// Whether a profile runs the radio as a client or as the access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileKind {
    Station,
    AccessPoint {
        band: String,
        channel: u8,
        gateway_cidr: String,
    },
}

/// Everything needed to create one named network profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSpec {
    pub name: String,
    pub ssid: String,
    /// `None` creates an open (password-less) profile.
    pub psk: Option<String>,
    pub autoconnect: bool,
    pub kind: ProfileKind,
}

impl ProfileSpec {
    pub fn station(name: &str, ssid: &str, password: &str, autoconnect: bool) -> Self {
        Self {
            name: name.to_string(),
            ssid: ssid.to_string(),
            psk: (!password.is_empty()).then(|| password.to_string()),
            autoconnect,
            kind: ProfileKind::Station,
        }
    }

    pub fn is_access_point(&self) -> bool {
        matches!(self.kind, ProfileKind::AccessPoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn net(ssid: &str, signal: u8) -> Network {
        Network {
            ssid: ssid.to_string(),
            signal,
            security: "WPA2".to_string(),
        }
    }

    fn speaker(name: &str, is_coordinator: bool) -> DiscoveredSpeaker {
        DiscoveredSpeaker {
            name: name.to_string(),
            address: "10.0.0.9".to_string(),
            model: "Sonos One".to_string(),
            is_coordinator,
        }
    }

    #[test]
    fn normalize_keeps_strongest_duplicate() {
        let scan = normalize_scan(vec![net("Home", 40), net("Cafe", 70), net("Home", 90), net("", 99)]);
        assert_eq!(scan, vec![net("Home", 90), net("Cafe", 70)]);
    }

    #[test]
    fn speakers_sort_coordinator_first_then_name() {
        let mut speakers = vec![
            speaker("Office", false),
            speaker("Kitchen", true),
            speaker("Bedroom", false),
            speaker("Den", true),
        ];
        sort_speakers(&mut speakers);
        let names: Vec<_> = speakers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Den", "Kitchen", "Bedroom", "Office"]);
    }

    #[test]
    fn config_accepts_legacy_speaker_ip() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"speaker_ip": "10.0.0.5", "speaker_name": "Den"}"#).unwrap();
        assert_eq!(config.speaker(), Some("10.0.0.5"));
        assert!(config.is_configured());
    }

    #[test]
    fn blank_speaker_address_is_unconfigured() {
        let config: BridgeConfig = serde_json::from_str(r#"{"speaker_address": "  "}"#).unwrap();
        assert!(!config.is_configured());
        assert!(!BridgeConfig::default().is_configured());
    }

    #[test]
    fn failure_result_carries_the_error() {
        let json = serde_json::to_value(ProvisionResult::failure("Secrets were required")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "wifi_success": false, "speakers": [], "error": "Secrets were required" })
        );
    }

    #[test]
    fn success_without_speakers_still_lists_them() {
        let json = serde_json::to_string(&ProvisionResult::success(vec![])).unwrap();
        assert_eq!(json, r#"{"wifi_success":true,"speakers":[]}"#);
    }

    proptest! {
        #[test]
        fn normalized_scan_is_unique_and_descending(
            raw in prop::collection::vec(("[a-d]{0,2}", 0u8..=100), 0..40)
        ) {
            let raw: Vec<Network> = raw.into_iter().map(|(ssid, signal)| net(&ssid, signal)).collect();
            let scan = normalize_scan(raw.clone());

            let mut seen = std::collections::HashSet::new();
            for network in &scan {
                prop_assert!(seen.insert(network.ssid.clone()));
                let strongest = raw.iter().filter(|n| n.ssid == network.ssid).map(|n| n.signal).max();
                prop_assert_eq!(Some(network.signal), strongest);
            }
            prop_assert!(scan.windows(2).all(|w| w[0].signal >= w[1].signal));
        }

        #[test]
        fn speaker_order_is_coordinators_then_names(
            raw in prop::collection::vec(("[A-Z][a-z]{0,5}", any::<bool>()), 0..20)
        ) {
            let mut speakers: Vec<_> = raw.iter().map(|(n, c)| speaker(n, *c)).collect();
            sort_speakers(&mut speakers);
            for pair in speakers.windows(2) {
                prop_assert!(pair[0].is_coordinator >= pair[1].is_coordinator);
                if pair[0].is_coordinator == pair[1].is_coordinator {
                    prop_assert!(pair[0].name <= pair[1].name);
                }
            }
        }
    }
}
