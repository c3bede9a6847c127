//! DHCP scopes and static bindings.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, key_values};

/// A `dhcp scope N` address pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DhcpScope {
    pub id: u32,
    pub range_start: String,
    pub range_end: String,
    pub prefix: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// Lease time in hours (0 = firmware default).
    pub lease: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain_name: String,
    /// Lease time as written by newer firmware (`hh:mm` or `infinity`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expire: String,
}

/// A `dhcp scope bind` reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DhcpBinding {
    pub scope_id: u32,
    pub ip_address: String,
    /// Normalized lowercase `xx:xx:xx:xx:xx:xx`, empty when bound by client id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
    /// Raw client identifier (`01 xx xx ...`) when bound by identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_identifier: String,
    pub use_client_identifier: bool,
}

static SCOPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^dhcp\s+scope\s+(\d+)\s+([0-9.]+)-([0-9.]+)/(\d+)\s*(.*)$").expect("static regex")
});
static BIND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^dhcp\s+scope\s+bind\s+(\d+)\s+([0-9.]+)\s+(?:(01)\s+|ethernet\s+)?(.+)$")
        .expect("static regex")
});
static SCOPE_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^dhcp\s+scope\s+option\s+(\d+)\s+(.+)$").expect("static regex"));

const SCOPE_KEYWORDS: &[&str] = &["gateway", "dns", "lease", "domain", "expire", "maxexpire"];

impl ParsedConfig {
    /// DHCP scopes sorted by id. `dhcp scope option N dns=...,domain=...` lines
    /// are folded into their scope.
    pub fn extract_dhcp_scopes(&self) -> Vec<DhcpScope> {
        let mut scopes: BTreeMap<u32, DhcpScope> = BTreeMap::new();
        for line in self.global_with_prefix("dhcp scope ") {
            if let Some(caps) = SCOPE.captures(line) {
                let Ok(id) = caps[1].parse::<u32>() else {
                    continue;
                };
                let scope = scopes.entry(id).or_default();
                scope.id = id;
                scope.range_start = caps[2].to_string();
                scope.range_end = caps[3].to_string();
                scope.prefix = caps[4].parse().unwrap_or(0);
                apply_scope_options(scope, &caps[5]);
            } else if let Some(caps) = SCOPE_OPTION.captures(line) {
                let Ok(id) = caps[1].parse::<u32>() else {
                    continue;
                };
                let scope = scopes.entry(id).or_default();
                scope.id = id;
                for (key, value) in key_values(&caps[2]) {
                    match key.as_str() {
                        "dns" => {
                            scope.dns_servers = value.split(',').map(str::to_string).collect();
                        }
                        "domain" => scope.domain_name = value,
                        "router" => scope.gateway = value,
                        _ => {}
                    }
                }
            }
        }
        scopes.into_values().filter(|s| !s.range_start.is_empty()).collect()
    }

    /// Static bindings sorted by scope then address.
    pub fn extract_dhcp_bindings(&self) -> Vec<DhcpBinding> {
        let mut bindings: Vec<DhcpBinding> = self
            .global_with_prefix("dhcp scope bind ")
            .filter_map(parse_binding)
            .collect();
        bindings.sort_by(|a, b| {
            (a.scope_id, ip_sort_key(&a.ip_address)).cmp(&(b.scope_id, ip_sort_key(&b.ip_address)))
        });
        bindings
    }
}

fn apply_scope_options(scope: &mut DhcpScope, options: &str) {
    let tokens: Vec<&str> = options.split_whitespace().collect();
    let mut index = 0;
    while index < tokens.len() {
        match tokens[index] {
            "gateway" => {
                index += 1;
                scope.gateway = tokens.get(index).map(|s| s.to_string()).unwrap_or_default();
            }
            "dns" => {
                let servers: Vec<String> = tokens[index + 1..]
                    .iter()
                    .take_while(|t| !SCOPE_KEYWORDS.contains(t))
                    .map(|s| s.to_string())
                    .collect();
                index += servers.len();
                scope.dns_servers = servers;
            }
            "lease" => {
                index += 1;
                scope.lease = tokens.get(index).and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            "domain" => {
                index += 1;
                scope.domain_name = tokens.get(index).map(|s| s.to_string()).unwrap_or_default();
            }
            "expire" => {
                index += 1;
                scope.expire = tokens.get(index).map(|s| s.to_string()).unwrap_or_default();
            }
            _ => {}
        }
        index += 1;
    }
}

fn parse_binding(line: &str) -> Option<DhcpBinding> {
    let caps = BIND.captures(line)?;
    let scope_id = caps[1].parse().ok()?;
    let ip_address = caps[2].to_string();
    let target = caps[4].trim();
    if caps.get(3).is_some() {
        return Some(DhcpBinding {
            scope_id,
            ip_address,
            mac_address: String::new(),
            client_identifier: format!("01 {target}"),
            use_client_identifier: true,
        });
    }
    Some(DhcpBinding {
        scope_id,
        ip_address,
        mac_address: normalize_mac(target)?,
        client_identifier: String::new(),
        use_client_identifier: false,
    })
}

/// Accepts `aa:bb:..`, `aa-bb-..`, `aabb.ccdd.eeff` or space separated octets.
pub(crate) fn normalize_mac(mac: &str) -> Option<String> {
    let hex: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
        .collect::<String>()
        .to_ascii_lowercase();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let octets: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":"))
}

fn ip_sort_key(ip: &str) -> u32 {
    ip.parse::<std::net::Ipv4Addr>().map(u32::from).unwrap_or(u32::MAX)
}

/// `dhcp scope bind` command for a binding.
pub fn build_dhcp_binding_command(binding: &DhcpBinding) -> String {
    if binding.use_client_identifier {
        let id = binding
            .client_identifier
            .trim()
            .trim_start_matches("01")
            .trim();
        format!(
            "dhcp scope bind {} {} 01 {}",
            binding.scope_id, binding.ip_address, id
        )
    } else {
        format!(
            "dhcp scope bind {} {} {}",
            binding.scope_id, binding.ip_address, binding.mac_address
        )
    }
}

/// Removes the reservation for one address.
pub fn build_delete_dhcp_binding_command(scope_id: u32, ip_address: &str) -> String {
    format!("no dhcp scope bind {scope_id} {ip_address}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_with_options() {
        let cfg = ParsedConfig::parse(
            "dhcp service server\n\
             dhcp scope 2 10.0.0.10-10.0.0.99/24 gateway 10.0.0.1 dns 1.1.1.1 8.8.8.8 lease 72\n\
             dhcp scope 1 192.168.1.2-192.168.1.191/24 expire 24:00\n\
             dhcp scope option 1 dns=192.168.1.1,192.168.1.2 domain=example.jp\n",
        )
        .expect("parse");
        let scopes = cfg.extract_dhcp_scopes();
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0].id, 1);
        assert_eq!(scopes[0].expire, "24:00");
        assert_eq!(scopes[0].dns_servers, vec!["192.168.1.1", "192.168.1.2"]);
        assert_eq!(scopes[0].domain_name, "example.jp");
        assert_eq!(scopes[1].gateway, "10.0.0.1");
        assert_eq!(scopes[1].dns_servers, vec!["1.1.1.1", "8.8.8.8"]);
        assert_eq!(scopes[1].lease, 72);
        assert_eq!(scopes[1].prefix, 24);
    }

    #[test]
    fn bindings_by_mac_and_client_id() {
        let cfg = ParsedConfig::parse(
            "dhcp scope bind 1 192.168.1.20 ethernet 00:A0:DE:01:02:03\n\
             dhcp scope bind 1 192.168.1.5 01 00 a0 de 11 22 33\n\
             dhcp scope bind 1 192.168.1.30 00-a0-de-aa-bb-cc\n",
        )
        .expect("parse");
        let bindings = cfg.extract_dhcp_bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].ip_address, "192.168.1.5");
        assert!(bindings[0].use_client_identifier);
        assert_eq!(bindings[0].client_identifier, "01 00 a0 de 11 22 33");
        assert_eq!(bindings[1].mac_address, "00:a0:de:01:02:03");
        assert_eq!(bindings[2].mac_address, "00:a0:de:aa:bb:cc");
    }

    #[test]
    fn binding_commands() {
        let binding = DhcpBinding {
            scope_id: 1,
            ip_address: "192.168.1.20".to_string(),
            mac_address: "00:a0:de:01:02:03".to_string(),
            ..DhcpBinding::default()
        };
        assert_eq!(
            build_dhcp_binding_command(&binding),
            "dhcp scope bind 1 192.168.1.20 00:a0:de:01:02:03"
        );
        let by_id = DhcpBinding {
            client_identifier: "01 00 a0 de 11 22 33".to_string(),
            use_client_identifier: true,
            ..binding
        };
        assert_eq!(
            build_dhcp_binding_command(&by_id),
            "dhcp scope bind 1 192.168.1.20 01 00 a0 de 11 22 33"
        );
        assert_eq!(
            build_delete_dhcp_binding_command(1, "192.168.1.20"),
            "no dhcp scope bind 1 192.168.1.20"
        );
    }

    #[test]
    fn mac_normalization() {
        assert_eq!(
            normalize_mac("00a0.de01.0203").as_deref(),
            Some("00:a0:de:01:02:03")
        );
        assert_eq!(normalize_mac("zz:zz"), None);
    }
}
