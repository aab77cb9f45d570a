//! Sonos speakers over UPnP: SSDP discovery plus RenderingControl for
//! volume and mute.

mod device;
mod soap;
mod ssdp;

use crate::structs::{sort_speakers, DiscoveredSpeaker};
use crate::traits::SpeakerRegistry;
use crate::{Error, Result};
use async_trait::async_trait;
use device::{extract_ip_from_url, DeviceDescription};
use soap::{SoapClient, RENDERING_CONTROL, ZONE_GROUP_TOPOLOGY};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinSet;

const MASTER_CHANNEL: &str = "<InstanceID>0</InstanceID><Channel>Master</Channel>";

#[derive(Debug, Clone)]
pub struct SonosRegistry {
    http: reqwest::Client,
    soap: SoapClient,
}

impl SonosRegistry {
    /// `request_timeout` bounds every single HTTP exchange with a player.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            soap: SoapClient::new(http.clone()),
            http,
        })
    }

    async fn coordinators(&self, ip: &str) -> Result<HashSet<String>> {
        let response = self
            .soap
            .call(ip, ZONE_GROUP_TOPOLOGY, "GetZoneGroupState", "")
            .await?;
        let state = soap::element_text(&response, "ZoneGroupState")?
            .ok_or_else(|| Error::Speaker("GetZoneGroupState returned no state".into()))?;
        soap::coordinator_uuids(&state)
    }
}

async fn fetch_description(http: &reqwest::Client, location: &str) -> Result<DeviceDescription> {
    let xml = http.get(location).send().await?.error_for_status()?.text().await?;
    DeviceDescription::from_xml(&xml)
}

/// Read `field` from a response envelope and parse it.
fn parse_field<T: FromStr>(xml: &str, field: &str) -> Result<T> {
    let text = soap::element_text(xml, field)?
        .ok_or_else(|| Error::Speaker(format!("response is missing {field}")))?;
    text.trim()
        .parse()
        .map_err(|_| Error::Speaker(format!("unexpected {field} value {text:?}")))
}

#[async_trait]
impl SpeakerRegistry for SonosRegistry {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredSpeaker>> {
        let locations = ssdp::search(timeout).await?;
        tracing::debug!("SSDP returned {} location(s)", locations.len());

        let mut tasks = JoinSet::new();
        for location in locations {
            let http = self.http.clone();
            tasks.spawn(async move {
                let description = fetch_description(&http, &location).await;
                (location, description)
            });
        }

        let mut found: Vec<(String, DeviceDescription)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((location, Ok(description))) => {
                    if !description.is_sonos_device() {
                        continue;
                    }
                    match extract_ip_from_url(&location) {
                        Some(ip) if !found.iter().any(|(known, _)| *known == ip) => {
                            found.push((ip, description))
                        }
                        _ => {}
                    }
                }
                Ok((location, Err(e))) => {
                    tracing::debug!("Skipping {}: {}", location, e);
                }
                Err(e) => tracing::warn!("Description fetch task failed: {}", e),
            }
        }

        let coordinators = match found.first() {
            Some((ip, _)) => self.coordinators(ip).await.unwrap_or_else(|e| {
                tracing::warn!("Could not read zone groups from {}: {}", ip, e);
                HashSet::new()
            }),
            None => HashSet::new(),
        };

        let mut speakers: Vec<DiscoveredSpeaker> = found
            .into_iter()
            .map(|(ip, description)| DiscoveredSpeaker {
                name: description.player_name().to_string(),
                is_coordinator: coordinators.contains(description.uuid()),
                model: description.model_name,
                address: ip,
            })
            .collect();
        sort_speakers(&mut speakers);
        tracing::info!("🔊 Discovered {} speaker(s)", speakers.len());
        Ok(speakers)
    }

    async fn volume(&self, address: &str) -> Result<u8> {
        let response = self
            .soap
            .call(address, RENDERING_CONTROL, "GetVolume", MASTER_CHANNEL)
            .await?;
        parse_field(&response, "CurrentVolume")
    }

    async fn set_volume(&self, address: &str, volume: u8) -> Result<()> {
        let payload = format!("{MASTER_CHANNEL}<DesiredVolume>{}</DesiredVolume>", volume.min(100));
        self.soap
            .call(address, RENDERING_CONTROL, "SetVolume", &payload)
            .await
            .map(|_| ())
    }

    async fn is_muted(&self, address: &str) -> Result<bool> {
        let response = self
            .soap
            .call(address, RENDERING_CONTROL, "GetMute", MASTER_CHANNEL)
            .await?;
        let flag: u8 = parse_field(&response, "CurrentMute")?;
        Ok(flag != 0)
    }

    async fn set_mute(&self, address: &str, muted: bool) -> Result<()> {
        let payload = format!("{MASTER_CHANNEL}<DesiredMute>{}</DesiredMute>", u8::from(muted));
        self.soap
            .call(address, RENDERING_CONTROL, "SetMute", &payload)
            .await
            .map(|_| ())
    }
}
