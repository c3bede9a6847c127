//! Interface settings (`ip lanN ...`, `description`, `ethernet lanN filter`).

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, Section, number_list, on_off, unquote};

/// IPv4 address assignment of an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceAddress {
    /// CIDR address, empty when assigned by DHCP.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    pub dhcp: bool,
}

/// Settings of one interface (`lan1`, `bridge1`, `pp1`, `tunnel1`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<InterfaceAddress>,
    #[serde(default)]
    pub secure_filter_in: Vec<u32>,
    #[serde(default)]
    pub secure_filter_out: Vec<u32>,
    /// Dynamic filters listed after `dynamic` on the outbound filter line.
    #[serde(default)]
    pub dynamic_filter_out: Vec<u32>,
    #[serde(default)]
    pub ethernet_filter_in: Vec<u32>,
    #[serde(default)]
    pub ethernet_filter_out: Vec<u32>,
    /// NAT descriptor number (0 = none).
    pub nat_descriptor: u32,
    pub proxyarp: bool,
    /// MTU (0 = firmware default).
    pub mtu: u32,
}

static GLOBAL_IP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ip\s+((?:lan|bridge|vlan)\d+(?:/\d+)?)\s+(.+)$").expect("static regex")
});
static DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^description\s+((?:lan|bridge|vlan)\d+(?:/\d+)?)\s+(.+)$").expect("static regex")
});
static ETHERNET_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ethernet\s+(lan\d+)\s+filter\s+(in|out)\s+(.+)$").expect("static regex")
});

impl ParsedConfig {
    /// Interfaces with at least one setting, sorted by name.
    ///
    /// LAN and bridge settings come from the global section; `ip pp ...` and
    /// `ip tunnel ...` lines inside a `pp select` / `tunnel select` block are
    /// attributed to `ppN` / `tunnelN`.
    pub fn extract_interfaces(&self) -> Vec<InterfaceConfig> {
        let mut interfaces: BTreeMap<String, InterfaceConfig> = BTreeMap::new();

        for line in self.global_commands() {
            let text = line.text.as_str();
            if let Some(caps) = GLOBAL_IP.captures(text) {
                apply_ip_setting(entry(&mut interfaces, &caps[1]), &caps[2]);
            } else if let Some(caps) = DESCRIPTION.captures(text) {
                entry(&mut interfaces, &caps[1]).description = unquote(&caps[2]);
            } else if let Some(caps) = ETHERNET_FILTER.captures(text) {
                let iface = entry(&mut interfaces, &caps[1]);
                let filters = number_list(&caps[3], None);
                if &caps[2] == "in" {
                    iface.ethernet_filter_in = filters;
                } else {
                    iface.ethernet_filter_out = filters;
                }
            }
        }

        for section in self.sections().collect::<Vec<_>>() {
            let (name, ip_prefix, desc_prefix) = match section {
                Section::Pp(id) => (format!("pp{id}"), "ip pp ", "description pp "),
                Section::Tunnel(id) => (format!("tunnel{id}"), "ip tunnel ", "description tunnel "),
                _ => continue,
            };
            for line in self.commands_in(section) {
                if let Some(rest) = line.text.strip_prefix(ip_prefix) {
                    apply_ip_setting(entry(&mut interfaces, &name), rest);
                } else if let Some(rest) = line.text.strip_prefix(desc_prefix) {
                    entry(&mut interfaces, &name).description = unquote(rest);
                }
            }
        }

        interfaces.into_values().collect()
    }

    /// One interface by name.
    pub fn interface(&self, name: &str) -> Option<InterfaceConfig> {
        self.extract_interfaces().into_iter().find(|i| i.name == name)
    }
}

fn entry<'a>(map: &'a mut BTreeMap<String, InterfaceConfig>, name: &str) -> &'a mut InterfaceConfig {
    map.entry(name.to_string()).or_insert_with(|| InterfaceConfig {
        name: name.to_string(),
        ..InterfaceConfig::default()
    })
}

/// Applies the part of an `ip <if> ...` line after the interface name.
fn apply_ip_setting(iface: &mut InterfaceConfig, rest: &str) {
    let rest = rest.trim();
    if let Some(addr) = rest.strip_prefix("address ") {
        let addr = addr.split_whitespace().next().unwrap_or_default();
        iface.ip_address = Some(if addr == "dhcp" {
            InterfaceAddress {
                address: String::new(),
                dhcp: true,
            }
        } else {
            InterfaceAddress {
                address: addr.to_string(),
                dhcp: false,
            }
        });
    } else if let Some(list) = rest.strip_prefix("secure filter in ") {
        iface.secure_filter_in = number_list(list, Some("dynamic"));
    } else if let Some(list) = rest.strip_prefix("secure filter out ") {
        iface.secure_filter_out = number_list(list, Some("dynamic"));
        iface.dynamic_filter_out = list
            .split_once("dynamic")
            .map(|(_, dynamic)| number_list(dynamic, None))
            .unwrap_or_default();
    } else if let Some(nat) = rest.strip_prefix("nat descriptor ") {
        iface.nat_descriptor = number_list(nat, None).first().copied().unwrap_or(0);
    } else if let Some(value) = rest.strip_prefix("proxyarp ") {
        iface.proxyarp = on_off(value.trim());
    } else if let Some(value) = rest.strip_prefix("mtu ") {
        iface.mtu = value.trim().parse().unwrap_or(0);
    }
}
