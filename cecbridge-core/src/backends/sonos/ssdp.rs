//! SSDP M-SEARCH client used to find Sonos zone players on the local network.

use crate::Result;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

pub(crate) const ZONE_PLAYER_URN: &str = "urn:schemas-upnp-org:device:ZonePlayer:1";
const SSDP_ADDR: &str = "239.255.255.250:1900";

/// SSDP response headers we care about.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SsdpResponse {
    pub location: String,
    pub urn: String,
}

/// Multicast an M-SEARCH for zone players and collect every distinct
/// description URL that answers before `timeout` expires.
pub(crate) async fn search(timeout: Duration) -> Result<BTreeSet<String>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_multicast_loop_v4(true)?;

    let request = format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_ADDR}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 1\r\n\
         ST: {ZONE_PLAYER_URN}\r\n\
         \r\n"
    );
    // UDP is lossy; a second datagram costs nothing.
    for _ in 0..2 {
        socket.send_to(request.as_bytes(), SSDP_ADDR).await?;
    }

    let deadline = Instant::now() + timeout;
    let mut locations = BTreeSet::new();
    let mut buffer = [0u8; 2048];
    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await;
        let (size, _) = match received {
            Ok(Ok(datagram)) => datagram,
            Ok(Err(e)) => {
                tracing::debug!("SSDP receive error: {}", e);
                break;
            }
            Err(_) => break,
        };
        let Ok(text) = std::str::from_utf8(&buffer[..size]) else {
            continue;
        };
        if let Some(response) = parse_ssdp_response(text) {
            if response.urn == ZONE_PLAYER_URN {
                locations.insert(response.location);
            }
        }
    }
    Ok(locations)
}

/// Parse an SSDP response from HTTP text.
fn parse_ssdp_response(response: &str) -> Option<SsdpResponse> {
    let mut location = None;
    let mut urn = None;

    for line in response.lines() {
        let line = line.trim();
        if let Some(value) = extract_header_value(line, "LOCATION:") {
            location = Some(value);
        } else if let Some(value) = extract_header_value(line, "ST:") {
            urn = Some(value);
        }
    }

    Some(SsdpResponse {
        location: location?,
        urn: urn?,
    })
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
    let name = line.get(..header.len())?;
    let value = line.get(header.len()..)?;
    if !value.is_empty() && name.eq_ignore_ascii_case(header) {
        Some(value.trim().to_string())
    } else {
        None
    }
}
