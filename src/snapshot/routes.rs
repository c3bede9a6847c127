//! Static routes (`ip route ...`).

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ParsedConfig;

/// One gateway of a static route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NextHop {
    /// Gateway IP address, empty when the route points at an interface.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub next_hop: String,
    /// Gateway interface (`pp 1`, `tunnel 2`, `dhcp lan2`, `null`, `lan1`...).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface: String,
    /// Route weight, 1 when not configured.
    pub distance: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// `keepalive` was set on this gateway.
    pub permanent: bool,
    /// Filter number (0 = none).
    pub filter: u32,
    /// `hide` was set on this gateway.
    pub hide: bool,
}

/// A destination with all of its gateways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StaticRoute {
    /// Network address, `0.0.0.0` for the default route.
    pub prefix: String,
    /// Dotted netmask.
    pub mask: String,
    pub next_hops: Vec<NextHop>,
}

impl StaticRoute {
    /// `ip route` commands that create every gateway of this route.
    pub fn to_commands(&self) -> Vec<String> {
        self.next_hops
            .iter()
            .filter_map(|hop| build_route_command(&self.prefix, &self.mask, hop))
            .collect()
    }

    /// Network in RTX notation: `default` or `a.b.c.d/len`.
    pub fn network(&self) -> String {
        network_notation(&self.prefix, &self.mask)
    }
}

impl ParsedConfig {
    /// Static routes grouped by destination, sorted by prefix then mask.
    pub fn extract_static_routes(&self) -> Vec<StaticRoute> {
        let mut routes: BTreeMap<(String, String), Vec<NextHop>> = BTreeMap::new();
        for line in self.global_with_prefix("ip route ") {
            if let Some((prefix, mask, hops)) = parse_route_line(line) {
                routes.entry((prefix, mask)).or_default().extend(hops);
            }
        }
        routes
            .into_iter()
            .map(|((prefix, mask), next_hops)| StaticRoute {
                prefix,
                mask,
                next_hops,
            })
            .collect()
    }
}

/// Parses `ip route <network> gateway <gw> [options] [gateway <gw> ...]`.
fn parse_route_line(line: &str) -> Option<(String, String, Vec<NextHop>)> {
    let rest = line.strip_prefix("ip route ")?.trim();
    let (network, gateways) = rest.split_once(" gateway ")?;
    let (prefix, mask) = parse_network(network.trim())?;
    let hops = gateways
        .split(" gateway ")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(parse_gateway)
        .collect::<Vec<_>>();
    if hops.is_empty() {
        return None;
    }
    Some((prefix, mask, hops))
}

fn parse_network(network: &str) -> Option<(String, String)> {
    if network == "default" {
        return Some(("0.0.0.0".to_string(), "0.0.0.0".to_string()));
    }
    match network.split_once('/') {
        Some((addr, len)) => {
            let mask = if len.contains('.') {
                len.to_string()
            } else {
                prefix_to_mask(len.parse().ok()?)?
            };
            Some((addr.to_string(), mask))
        }
        None => Some((network.to_string(), "255.255.255.255".to_string())),
    }
}

const GATEWAY_KEYWORDS: &[&str] = &["weight", "filter", "hide", "keepalive", "name"];

fn parse_gateway(part: &str) -> Option<NextHop> {
    let tokens: Vec<&str> = part.split_whitespace().collect();
    let first = *tokens.first()?;
    let mut hop = NextHop {
        distance: 1,
        ..NextHop::default()
    };

    let mut index = 1;
    match first {
        "pp" | "tunnel" | "dhcp" => {
            let id = tokens.get(1)?;
            hop.interface = format!("{first} {id}");
            index = 2;
        }
        "null" | "loopback" => hop.interface = first.to_string(),
        _ if first.parse::<std::net::Ipv4Addr>().is_ok() => hop.next_hop = first.to_string(),
        _ => hop.interface = first.to_string(),
    }

    while index < tokens.len() {
        match tokens[index] {
            "weight" => {
                index += 1;
                hop.distance = tokens
                    .get(index)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
            }
            "filter" => {
                index += 1;
                hop.filter = tokens.get(index).and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            "hide" => hop.hide = true,
            "keepalive" => {
                hop.permanent = true;
                if tokens
                    .get(index + 1)
                    .map(|v| v.parse::<u32>().is_ok())
                    .unwrap_or(false)
                {
                    index += 1;
                }
            }
            "name" => {
                let words: Vec<&str> = tokens[index + 1..]
                    .iter()
                    .take_while(|t| !GATEWAY_KEYWORDS.contains(t))
                    .copied()
                    .collect();
                index += words.len();
                hop.name = words.join(" ");
            }
            _ => {}
        }
        index += 1;
    }
    Some(hop)
}

/// Converts a prefix length to a dotted netmask.
pub(crate) fn prefix_to_mask(len: u32) -> Option<String> {
    if len > 32 {
        return None;
    }
    let bits: u32 = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    Some(std::net::Ipv4Addr::from(bits).to_string())
}

/// Converts a dotted netmask to a prefix length when it is contiguous.
pub(crate) fn mask_to_prefix(mask: &str) -> Option<u32> {
    let bits = u32::from(mask.parse::<std::net::Ipv4Addr>().ok()?);
    let len = bits.leading_ones();
    (bits.checked_shl(len).unwrap_or(0) == 0).then_some(len)
}

fn network_notation(prefix: &str, mask: &str) -> String {
    if prefix == "0.0.0.0" && mask == "0.0.0.0" {
        return "default".to_string();
    }
    match mask_to_prefix(mask) {
        Some(len) => format!("{prefix}/{len}"),
        None => format!("{prefix}/{mask}"),
    }
}

/// `ip route` command for one gateway, `None` when the hop has no target.
pub fn build_route_command(prefix: &str, mask: &str, hop: &NextHop) -> Option<String> {
    let target = if !hop.interface.is_empty() {
        hop.interface.as_str()
    } else if !hop.next_hop.is_empty() {
        hop.next_hop.as_str()
    } else {
        return None;
    };
    let mut cmd = format!("ip route {} gateway {}", network_notation(prefix, mask), target);
    if hop.distance > 1 {
        cmd.push_str(&format!(" weight {}", hop.distance));
    }
    if hop.filter > 0 {
        cmd.push_str(&format!(" filter {}", hop.filter));
    }
    if hop.hide {
        cmd.push_str(" hide");
    }
    if hop.permanent {
        cmd.push_str(" keepalive");
    }
    Some(cmd)
}

/// `no ip route` for the whole destination.
pub fn build_delete_route_command(prefix: &str, mask: &str) -> String {
    format!("no ip route {}", network_notation(prefix, mask))
}

/// Grep pattern selecting the route lines of one destination.
pub(crate) fn route_grep_pattern(prefix: &str, mask: &str) -> String {
    format!("ip route {} ", network_notation(prefix, mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(text: &str) -> Vec<StaticRoute> {
        ParsedConfig::parse(text)
            .expect("parse")
            .extract_static_routes()
    }

    #[test]
    fn default_route_to_pp() {
        let r = routes("ip route default gateway pp 1\n");
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].prefix, "0.0.0.0");
        assert_eq!(r[0].mask, "0.0.0.0");
        assert_eq!(r[0].next_hops[0].interface, "pp 1");
        assert_eq!(r[0].next_hops[0].distance, 1);
        assert_eq!(r[0].network(), "default");
    }

    #[test]
    fn gateways_with_options_are_grouped_by_destination() {
        let r = routes(
            "ip route 10.0.0.0/8 gateway 192.168.1.254 weight 2 filter 100 keepalive 1\n\
             ip route 10.0.0.0/8 gateway tunnel 3 hide\n\
             ip route 172.16.0.0/255.255.0.0 gateway null\n",
        );
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].prefix, "10.0.0.0");
        assert_eq!(r[0].mask, "255.0.0.0");
        assert_eq!(r[0].next_hops.len(), 2);
        let first = &r[0].next_hops[0];
        assert_eq!(first.next_hop, "192.168.1.254");
        assert_eq!(first.distance, 2);
        assert_eq!(first.filter, 100);
        assert!(first.permanent);
        assert_eq!(r[0].next_hops[1].interface, "tunnel 3");
        assert!(r[0].next_hops[1].hide);
        assert_eq!(r[1].mask, "255.255.0.0");
        assert_eq!(r[1].next_hops[0].interface, "null");
    }

    #[test]
    fn multiple_gateways_on_one_line() {
        let r = routes("ip route 192.168.10.0/24 gateway 10.0.0.1 gateway 10.0.0.2 weight 3\n");
        assert_eq!(r[0].next_hops.len(), 2);
        assert_eq!(r[0].next_hops[1].distance, 3);
    }

    #[test]
    fn host_route_and_unknown_lines() {
        let r = routes("ip route 8.8.8.8 gateway dhcp lan2\nip routing process fast\n");
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].mask, "255.255.255.255");
        assert_eq!(r[0].next_hops[0].interface, "dhcp lan2");
    }

    #[test]
    fn absent_section_is_empty() {
        assert!(routes("dns server 8.8.8.8\n").is_empty());
    }

    #[test]
    fn commands_are_rebuilt() {
        let route = StaticRoute {
            prefix: "10.1.0.0".to_string(),
            mask: "255.255.0.0".to_string(),
            next_hops: vec![NextHop {
                next_hop: "192.168.1.1".to_string(),
                distance: 5,
                permanent: true,
                ..NextHop::default()
            }],
        };
        assert_eq!(
            route.to_commands(),
            vec!["ip route 10.1.0.0/16 gateway 192.168.1.1 weight 5 keepalive".to_string()]
        );
        assert_eq!(
            build_delete_route_command("0.0.0.0", "0.0.0.0"),
            "no ip route default"
        );
        assert_eq!(
            build_route_command("10.0.0.0", "255.0.0.0", &NextHop::default()),
            None
        );
    }

    #[test]
    fn mask_conversions() {
        assert_eq!(prefix_to_mask(24).as_deref(), Some("255.255.255.0"));
        assert_eq!(prefix_to_mask(0).as_deref(), Some("0.0.0.0"));
        assert_eq!(prefix_to_mask(33), None);
        assert_eq!(mask_to_prefix("255.255.255.128"), Some(25));
        assert_eq!(mask_to_prefix("255.0.255.0"), None);
    }
}
