// NetworkProfileStore backed by the `nmcli` command-line tool, for systems
// whose radio is managed by NetworkManager (Raspberry Pi OS Bookworm).

pub mod parsing;

use crate::config::NetworkSettings;
use crate::structs::{Network, ProfileKind, ProfileSpec};
use crate::traits::NetworkProfileStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct NmcliProfileStore {
    iface: String,
    timeout: Duration,
}

impl NmcliProfileStore {
    pub fn new(settings: &NetworkSettings) -> Self {
        Self {
            iface: settings.interface_name.clone(),
            timeout: Duration::from_secs(settings.command_timeout_secs),
        }
    }

    /// Run `nmcli <args>`; on failure return the tool's own message.
    async fn nmcli(&self, args: &[&str]) -> Result<String> {
        tracing::debug!("nmcli {}", redact(args).join(" "));
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("nmcli").args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| Error::Timeout(format!("nmcli {} timed out", args.first().unwrap_or(&""))))??;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("nmcli exited with {}", output.status)
        };
        Err(Error::CommandFailed(message))
    }

    fn add_args(&self, spec: &ProfileSpec) -> Vec<String> {
        let mut args: Vec<String> = ["connection", "add", "type", "wifi", "ifname", self.iface.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if let ProfileKind::AccessPoint { .. } = spec.kind {
            args.extend(["mode".into(), "ap".into()]);
        }
        args.extend([
            "con-name".into(),
            spec.name.clone(),
            "ssid".into(),
            spec.ssid.clone(),
        ]);

        match &spec.kind {
            ProfileKind::AccessPoint {
                band,
                channel,
                gateway_cidr,
            } => {
                args.extend([
                    "autoconnect".into(),
                    yes_no(spec.autoconnect).into(),
                    "wifi.band".into(),
                    band.clone(),
                    "wifi.channel".into(),
                    channel.to_string(),
                    "ipv4.method".into(),
                    "shared".into(),
                    "ipv4.addresses".into(),
                    gateway_cidr.clone(),
                    "ipv6.method".into(),
                    "disabled".into(),
                ]);
            }
            ProfileKind::Station => {
                args.extend(["connection.autoconnect".into(), yes_no(spec.autoconnect).into()]);
            }
        }

        // Key management is always explicit, never auto-detected.
        if let Some(psk) = &spec.psk {
            args.extend([
                "wifi-sec.key-mgmt".into(),
                "wpa-psk".into(),
                "wifi-sec.psk".into(),
                psk.clone(),
            ]);
        }
        args
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Hide pre-shared keys from debug logs.
fn redact<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        out.push(if hide_next { "********" } else { *arg });
        hide_next = *arg == "wifi-sec.psk";
    }
    out
}

#[async_trait]
impl NetworkProfileStore for NmcliProfileStore {
    async fn wifi_profiles(&self) -> Result<Vec<String>> {
        let output = self
            .nmcli(&["-t", "-f", "NAME,TYPE", "connection", "show"])
            .await?;
        Ok(parsing::parse_wifi_profiles(&output))
    }

    async fn add_profile(&self, spec: &ProfileSpec) -> Result<()> {
        let args = self.add_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.nmcli(&args).await.map(|_| ())
    }

    async fn delete_profile(&self, name: &str) -> Result<()> {
        self.nmcli(&["connection", "delete", name]).await.map(|_| ())
    }

    async fn profile_up(&self, name: &str) -> Result<()> {
        self.nmcli(&["connection", "up", name]).await.map(|_| ())
    }

    async fn profile_down(&self, name: &str) -> Result<()> {
        self.nmcli(&["connection", "down", name]).await.map(|_| ())
    }

    async fn disconnect_radio(&self) -> Result<()> {
        self.nmcli(&["device", "disconnect", self.iface.as_str()])
            .await
            .map(|_| ())
    }

    async fn is_radio_connected(&self) -> Result<bool> {
        let output = self
            .nmcli(&["-t", "-f", "DEVICE,STATE", "device", "status"])
            .await?;
        Ok(parsing::parse_device_connected(&output, &self.iface))
    }

    async fn radio_address(&self) -> Result<Option<Ipv4Addr>> {
        let output = self
            .nmcli(&["-t", "-f", "IP4.ADDRESS", "device", "show", self.iface.as_str()])
            .await?;
        Ok(parsing::parse_ip4_address(&output))
    }

    async fn scan_networks(&self) -> Result<Vec<Network>> {
        if let Err(e) = self.nmcli(&["device", "wifi", "rescan"]).await {
            tracing::debug!("Rescan request refused: {}", e);
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        let output = self
            .nmcli(&["-t", "-f", "SSID,SIGNAL,SECURITY", "device", "wifi", "list"])
            .await?;
        Ok(parsing::parse_wifi_list(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppSettings;

    fn store() -> NmcliProfileStore {
        NmcliProfileStore::new(&AppSettings::embedded().network)
    }

    #[test]
    fn station_profile_args_spell_out_security() {
        let spec = ProfileSpec::station("SonosBridge-Temp", "Home", "hunter22", false);
        let args = store().add_args(&spec).join(" ");
        assert_eq!(
            args,
            "connection add type wifi ifname wlan0 con-name SonosBridge-Temp ssid Home \
             connection.autoconnect no wifi-sec.key-mgmt wpa-psk wifi-sec.psk hunter22"
        );
    }

    #[test]
    fn open_station_profile_has_no_security() {
        let spec = ProfileSpec::station("SonosBridge-WiFi", "Cafe", "", true);
        let args = store().add_args(&spec);
        assert!(!args.iter().any(|a| a.starts_with("wifi-sec")));
        assert!(args.windows(2).any(|w| w[0] == "connection.autoconnect" && w[1] == "yes"));
    }

    #[test]
    fn access_point_profile_uses_shared_ipv4() {
        let spec = ProfileSpec {
            name: "SonosBridge-Hotspot".into(),
            ssid: "SonosBridge-Setup".into(),
            psk: Some("sonosbridge".into()),
            autoconnect: false,
            kind: ProfileKind::AccessPoint {
                band: "bg".into(),
                channel: 6,
                gateway_cidr: "192.168.4.1/24".into(),
            },
        };
        let args = store().add_args(&spec).join(" ");
        assert!(args.contains("mode ap con-name SonosBridge-Hotspot"));
        assert!(args.contains("wifi.channel 6 ipv4.method shared ipv4.addresses 192.168.4.1/24"));
        assert!(args.contains("ipv6.method disabled"));
    }

    #[test]
    fn psk_is_redacted_in_logs() {
        let args = ["connection", "add", "wifi-sec.psk", "secret"];
        assert_eq!(redact(&args), ["connection", "add", "wifi-sec.psk", "********"]);
    }
}
