//! NAT masquerade descriptors.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ParsedConfig;

/// A static port mapping of a masquerade descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MasqueradeStaticEntry {
    pub entry_number: u32,
    pub inside_local: String,
    pub inside_local_port: u32,
    /// Outer port, equal to the inside port when not remapped.
    pub outside_global_port: u32,
    /// `tcp`, `udp`, or empty for protocols without ports (`esp`...).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

/// A `nat descriptor type N masquerade` descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NatMasquerade {
    pub descriptor_id: u32,
    /// `ipcp`, `primary`, an interface name or an address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub outer_address: String,
    /// Address range, e.g. `192.168.1.0-192.168.1.255` or `auto`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub inner_network: String,
    #[serde(default)]
    pub static_entries: Vec<MasqueradeStaticEntry>,
}

static TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^nat\s+descriptor\s+type\s+(\d+)\s+masquerade$").expect("static regex")
});
static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^nat\s+descriptor\s+address\s+(outer|inner)\s+(\d+)\s+(\S+)").expect("static regex")
});
static STATIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^nat\s+descriptor\s+masquerade\s+static\s+(\d+)\s+(\d+)\s+(\S+)\s+(\S+)(?:\s+(\S+))?")
        .expect("static regex")
});

impl ParsedConfig {
    /// Masquerade descriptors sorted by id. Address and static lines for
    /// descriptors of other NAT types are ignored.
    pub fn extract_nat_masquerade(&self) -> Vec<NatMasquerade> {
        let mut descriptors: BTreeMap<u32, NatMasquerade> = BTreeMap::new();
        for line in self.global_with_prefix("nat descriptor type ") {
            if let Some(id) = TYPE.captures(line).and_then(|c| c[1].parse().ok()) {
                descriptors.insert(
                    id,
                    NatMasquerade {
                        descriptor_id: id,
                        ..NatMasquerade::default()
                    },
                );
            }
        }

        for line in self.global_with_prefix("nat descriptor ") {
            if let Some(caps) = ADDRESS.captures(line) {
                let Some(nat) = caps[2]
                    .parse::<u32>()
                    .ok()
                    .and_then(|id| descriptors.get_mut(&id))
                else {
                    continue;
                };
                if &caps[1] == "outer" {
                    nat.outer_address = caps[3].to_string();
                } else {
                    nat.inner_network = caps[3].to_string();
                }
            } else if let Some(caps) = STATIC.captures(line) {
                let Some(nat) = caps[1]
                    .parse::<u32>()
                    .ok()
                    .and_then(|id| descriptors.get_mut(&id))
                else {
                    continue;
                };
                if let Some(entry) = parse_static_entry(&caps) {
                    nat.static_entries.push(entry);
                }
            }
        }

        let mut result: Vec<NatMasquerade> = descriptors.into_values().collect();
        for nat in &mut result {
            nat.static_entries.sort_by_key(|e| e.entry_number);
        }
        result
    }
}

/// Handles `IP PROTO PORT[=PORT]`, `IP PROTO` and the older
/// `IP:PORT=IP:PORT PROTO` form.
fn parse_static_entry(caps: &regex::Captures<'_>) -> Option<MasqueradeStaticEntry> {
    let entry_number = caps[2].parse().ok()?;
    let third = &caps[3];
    let fourth = &caps[4];

    if let Some((inside, outside)) = third.split_once('=')
        && let (Some((local, local_port)), Some((_, global_port))) =
            (inside.split_once(':'), outside.split_once(':'))
    {
        return Some(MasqueradeStaticEntry {
            entry_number,
            inside_local: local.to_string(),
            inside_local_port: local_port.parse().unwrap_or(0),
            outside_global_port: global_port.parse().unwrap_or(0),
            protocol: fourth.to_string(),
        });
    }

    let (outer, inner) = match caps.get(5).map(|m| m.as_str()) {
        Some(ports) => match ports.split_once('=') {
            Some((outer, inner)) => (outer.parse().unwrap_or(0), inner.parse().unwrap_or(0)),
            None => {
                let port = ports.parse().unwrap_or(0);
                (port, port)
            }
        },
        None => (0, 0),
    };
    Some(MasqueradeStaticEntry {
        entry_number,
        inside_local: third.to_string(),
        inside_local_port: inner,
        outside_global_port: outer,
        protocol: fourth.to_string(),
    })
}
