//! Minimal UPnP SOAP client for the two Sonos services the bridge needs.

use crate::{Error, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;

/// A UPnP service: control URL path and service type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Service {
    pub endpoint: &'static str,
    pub urn: &'static str,
}

pub(crate) const RENDERING_CONTROL: Service = Service {
    endpoint: "MediaRenderer/RenderingControl/Control",
    urn: "urn:schemas-upnp-org:service:RenderingControl:1",
};

pub(crate) const ZONE_GROUP_TOPOLOGY: Service = Service {
    endpoint: "ZoneGroupTopology/Control",
    urn: "urn:schemas-upnp-org:service:ZoneGroupTopology:1",
};

#[derive(Debug, Clone)]
pub(crate) struct SoapClient {
    http: reqwest::Client,
}

impl SoapClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Invoke `action` and return the raw response envelope.
    pub async fn call(&self, ip: &str, service: Service, action: &str, payload: &str) -> Result<String> {
        let body = format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{urn}">{payload}</u:{action}></s:Body></s:Envelope>"#,
            urn = service.urn,
        );
        let url = format!("http://{}:1400/{}", ip, service.endpoint);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPACTION", format!("\"{}#{}\"", service.urn, action))
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if let Some(code) = fault_code(&text)? {
            return Err(Error::Speaker(format!("{action} failed: UPnP error {code}")));
        }
        if !status.is_success() {
            return Err(Error::Speaker(format!("{action} failed: HTTP {status}")));
        }
        Ok(text)
    }
}

/// `Some(code)` if the envelope is a SOAP fault (500 when no UPnP code is given).
fn fault_code(xml: &str) -> Result<Option<u16>> {
    if element_text(xml, "Fault")?.is_none() {
        return Ok(None);
    }
    let code = element_text(xml, "errorCode")?
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(500);
    Ok(Some(code))
}

/// Unescaped text of the first element whose local name is `local`.
/// `Some("")` for an empty element, `None` when absent.
pub(crate) fn element_text(xml: &str, local: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == local.as_bytes() => inside = true,
            Event::Empty(e) if e.local_name().as_ref() == local.as_bytes() => {
                return Ok(Some(String::new()));
            }
            Event::Text(t) if inside => return Ok(Some(t.unescape()?.into_owned())),
            Event::End(_) if inside => return Ok(Some(String::new())),
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// UUIDs of every group coordinator named in a `ZoneGroupState` document.
pub(crate) fn coordinator_uuids(zone_group_state: &str) -> Result<HashSet<String>> {
    let mut reader = Reader::from_str(zone_group_state);
    reader.trim_text(true);
    let mut coordinators = HashSet::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"ZoneGroup" => {
                if let Some(attr) = e.try_get_attribute("Coordinator")? {
                    coordinators.insert(attr.unescape_value()?.into_owned());
                }
            }
            Event::Eof => return Ok(coordinators),
            _ => {}
        }
    }
}
