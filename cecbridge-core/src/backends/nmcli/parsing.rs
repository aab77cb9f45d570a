use crate::structs::Network;
use std::net::Ipv4Addr;

/// Split one line of `nmcli -t` output into fields. Terse mode escapes `:`
/// and `\` inside values with a backslash.
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

/// `nmcli -t -f NAME,TYPE connection show` -> names of wireless profiles.
pub fn parse_wifi_profiles(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line.trim_end());
            match fields.as_slice() {
                [name, kind] if kind == "802-11-wireless" && !name.is_empty() => Some(name.clone()),
                _ => None,
            }
        })
        .collect()
}

/// `nmcli -t -f DEVICE,STATE device status` -> is `iface` connected.
pub fn parse_device_connected(output: &str, iface: &str) -> bool {
    output.lines().any(|line| {
        let fields = split_terse(line.trim_end());
        match fields.as_slice() {
            [device, state, ..] => device == iface && state.starts_with("connected"),
            _ => false,
        }
    })
}

/// `nmcli -t -f IP4.ADDRESS device show <iface>` -> first IPv4 address.
pub fn parse_ip4_address(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let fields = split_terse(line.trim_end());
        let value = fields.get(1)?;
        value.split('/').next()?.trim().parse().ok()
    })
}

/// `nmcli -t -f SSID,SIGNAL,SECURITY device wifi list` -> raw network list.
pub fn parse_wifi_list(output: &str) -> Vec<Network> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line.trim_end());
            let ssid = fields.first()?.trim().to_string();
            if ssid.is_empty() {
                return None;
            }
            let signal = fields
                .get(1)
                .and_then(|s| s.trim().parse::<u8>().ok())
                .unwrap_or(0)
                .min(100);
            let security = fields.get(2).cloned().unwrap_or_default();
            Some(Network {
                ssid,
                signal,
                security,
            })
        })
        .collect()
}
