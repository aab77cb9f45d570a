//! UPnP device description parsing.

use crate::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Root {
    device: DeviceDescription,
}

/// The parts of `/xml/device_description.xml` the registry uses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeviceDescription {
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model_name: String,
    #[serde(rename = "UDN")]
    pub udn: String,
    pub room_name: Option<String>,
}

impl DeviceDescription {
    pub fn from_xml(xml: &str) -> Result<Self> {
        let root: Root = quick_xml::de::from_str(xml)?;
        Ok(root.device)
    }

    pub fn is_sonos_device(&self) -> bool {
        self.manufacturer.to_lowercase().contains("sonos") || self.device_type.contains("ZonePlayer")
    }

    /// Player name as shown in the Sonos app (the room), falling back to the
    /// UPnP friendly name.
    pub fn player_name(&self) -> &str {
        self.room_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.friendly_name)
    }

    /// `uuid:RINCON_xxx` -> `RINCON_xxx`, the form used in zone group state.
    pub fn uuid(&self) -> &str {
        self.udn.strip_prefix("uuid:").unwrap_or(&self.udn)
    }
}

/// Host part of a description URL such as
/// `http://192.168.1.100:1400/xml/device_description.xml`.
pub(crate) fn extract_ip_from_url(url: &str) -> Option<String> {
    let host = url.split("//").nth(1)?.split(['/', ':']).next()?;
    (!host.is_empty()).then(|| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:ZonePlayer:1</deviceType>
    <friendlyName>192.168.1.100 - Sonos One - RINCON_000E58A0123456</friendlyName>
    <manufacturer>Sonos, Inc.</manufacturer>
    <modelName>Sonos One</modelName>
    <UDN>uuid:RINCON_000E58A0123456</UDN>
    <roomName>Living Room</roomName>
  </device>
</root>"#;

    #[test]
    fn parses_description() {
        let device = DeviceDescription::from_xml(DESCRIPTION).unwrap();
        assert!(device.is_sonos_device());
        assert_eq!(device.player_name(), "Living Room");
        assert_eq!(device.model_name, "Sonos One");
        assert_eq!(device.uuid(), "RINCON_000E58A0123456");
    }

    #[test]
    fn extracts_host_from_location() {
        assert_eq!(
            extract_ip_from_url("http://192.168.1.100:1400/xml/device_description.xml"),
            Some("192.168.1.100".to_string())
        );
        assert_eq!(extract_ip_from_url("http://10.0.0.5/desc.xml"), Some("10.0.0.5".to_string()));
        assert_eq!(extract_ip_from_url("invalid-url"), None);
    }
}
