//! IPsec and L2TP tunnels (`tunnel select N` blocks).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, Section, on_off, unquote};

/// An IPsec tunnel interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IpsecTunnel {
    /// Tunnel interface number.
    pub id: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// `ipsec tunnel N` SA policy id (0 = none).
    pub sa_policy: u32,
    /// IKE gateway id referenced by the SA policy.
    pub gateway: u32,
    /// `esp` or `ah`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encryption: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub integrity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_address: String,
    /// Pre-shared key as written in the dump.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pre_shared_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ike_local_id: String,
    /// `dpd` or `heartbeat`, empty when keepalive is off.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keepalive_mode: String,
    pub dpd_interval: u32,
    pub dpd_retry: u32,
    pub enabled: bool,
}

/// An L2TPv2 (LNS) or L2TPv3 (L2VPN) tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct L2tpTunnel {
    pub id: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// `l2tp` or `l2tpv3`.
    pub version: String,
    /// `lns` for L2TPv2, `l2vpn` for L2TPv3.
    pub mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tunnel_source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tunnel_dest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_router_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_router_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_end_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    pub always_on: bool,
    pub auth_enabled: bool,
    pub keepalive_enabled: bool,
    pub keepalive_interval: u32,
    pub keepalive_retry: u32,
    /// Idle disconnect in seconds (0 = never).
    pub disconnect_time: u32,
    /// IPsec tunnel protecting this L2TP tunnel (0 = none).
    pub ipsec_profile: u32,
    pub enabled: bool,
}

impl ParsedConfig {
    /// Tunnels carrying IPsec settings, sorted by tunnel id.
    ///
    /// `ipsec ike ...` lines for the tunnel's gateway are taken from the
    /// tunnel block and, for firmware that writes them globally, from the
    /// global section.
    pub fn extract_ipsec_tunnels(&self) -> Vec<IpsecTunnel> {
        let mut tunnels = Vec::new();
        for id in self.tunnel_ids() {
            let lines: Vec<&str> = self
                .commands_in(Section::Tunnel(id))
                .map(|l| l.text.as_str())
                .collect();
            let is_ipsec = lines.iter().any(|l| {
                l.starts_with("ipsec tunnel ") || l.starts_with("tunnel encapsulation ipsec")
            });
            if !is_ipsec {
                continue;
            }

            let mut tunnel = IpsecTunnel {
                id,
                ..IpsecTunnel::default()
            };
            for text in &lines {
                apply_tunnel_common(text, id, &mut tunnel.name, &mut tunnel.enabled);
                if let Some(sa) = text.strip_prefix("ipsec tunnel ") {
                    tunnel.sa_policy = sa.trim().parse().unwrap_or(0);
                }
            }

            let policy_prefix = format!("ipsec sa policy {} ", tunnel.sa_policy);
            let policies = lines
                .iter()
                .copied()
                .chain(self.global_with_prefix("ipsec sa policy "));
            for text in policies {
                if tunnel.sa_policy == 0 {
                    break;
                }
                if let Some(rest) = text.strip_prefix(&policy_prefix) {
                    let tokens: Vec<&str> = rest.split_whitespace().collect();
                    tunnel.gateway = tokens.first().and_then(|v| v.parse().ok()).unwrap_or(0);
                    tunnel.protocol = tokens.get(1).unwrap_or(&"").to_string();
                    tunnel.encryption = tokens.get(2).unwrap_or(&"").to_string();
                    tunnel.integrity = tokens.get(3).unwrap_or(&"").to_string();
                    break;
                }
            }

            let gateway = if tunnel.gateway > 0 { tunnel.gateway } else { id };
            let ike_lines = lines
                .iter()
                .copied()
                .chain(self.global_with_prefix("ipsec ike "));
            for text in ike_lines {
                if let Some(rest) = text.strip_prefix("ipsec ike ") {
                    apply_ike_setting(&mut tunnel, rest, gateway);
                }
            }
            tunnels.push(tunnel);
        }
        tunnels
    }

    /// Tunnels with `tunnel encapsulation l2tp|l2tpv3` or `l2tp` settings,
    /// sorted by tunnel id.
    pub fn extract_l2tp_tunnels(&self) -> Vec<L2tpTunnel> {
        let mut tunnels = Vec::new();
        for id in self.tunnel_ids() {
            let lines: Vec<&str> = self
                .commands_in(Section::Tunnel(id))
                .map(|l| l.text.as_str())
                .collect();
            let encapsulation = lines
                .iter()
                .find_map(|l| l.strip_prefix("tunnel encapsulation "))
                .map(str::trim);
            let has_l2tp = lines.iter().any(|l| l.starts_with("l2tp "));
            let version = match encapsulation {
                Some("l2tpv3") | Some("l2tpv3-raw") => "l2tpv3",
                Some("l2tp") => "l2tp",
                _ if has_l2tp => "l2tpv3",
                _ => continue,
            };

            let mut tunnel = L2tpTunnel {
                id,
                version: version.to_string(),
                mode: if version == "l2tp" { "lns" } else { "l2vpn" }.to_string(),
                ..L2tpTunnel::default()
            };
            for text in &lines {
                apply_tunnel_common(text, id, &mut tunnel.name, &mut tunnel.enabled);
                if let Some(rest) = text.strip_prefix("tunnel endpoint address ") {
                    let mut parts = rest.split_whitespace();
                    match (parts.next(), parts.next()) {
                        (Some(local), Some(remote)) => {
                            tunnel.tunnel_source = local.to_string();
                            tunnel.tunnel_dest = remote.to_string();
                        }
                        (Some(remote), None) => tunnel.tunnel_dest = remote.to_string(),
                        _ => {}
                    }
                } else if let Some(sa) = text.strip_prefix("ipsec tunnel ") {
                    tunnel.ipsec_profile = sa.trim().parse().unwrap_or(0);
                } else if let Some(rest) = text.strip_prefix("l2tp ") {
                    apply_l2tp_setting(&mut tunnel, rest);
                }
            }
            tunnels.push(tunnel);
        }
        tunnels
    }
}

/// `description tunnel ...`, `tunnel name ...` and `tunnel enable N`.
fn apply_tunnel_common(text: &str, id: u32, name: &mut String, enabled: &mut bool) {
    if let Some(desc) = text
        .strip_prefix("description tunnel ")
        .or_else(|| text.strip_prefix("tunnel name "))
    {
        *name = unquote(desc);
    } else if text == format!("tunnel enable {id}") {
        *enabled = true;
    } else if text == format!("tunnel disable {id}") {
        *enabled = false;
    }
}

fn apply_ike_setting(tunnel: &mut IpsecTunnel, rest: &str, gateway: u32) {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let for_gateway = |skip: usize| gateway_args(&tokens, skip, gateway);
    match tokens.as_slice() {
        ["local", "address", ..] => {
            if let Some(args) = for_gateway(2) {
                tunnel.local_address = args.first().unwrap_or(&"").to_string();
            }
        }
        ["remote", "address", ..] => {
            if let Some(args) = for_gateway(2) {
                tunnel.remote_address = args.first().unwrap_or(&"").to_string();
            }
        }
        ["local", "name", ..] | ["local", "id", ..] => {
            if let Some(args) = for_gateway(2) {
                tunnel.ike_local_id = args.first().unwrap_or(&"").to_string();
            }
        }
        ["pre-shared-key", ..] => {
            if let Some(args) = for_gateway(1) {
                // `text <key>` or `encrypted <key>`
                tunnel.pre_shared_key = args.last().unwrap_or(&"").to_string();
            }
        }
        ["keepalive", "use", ..] => {
            if let Some(args) = for_gateway(2) {
                if args.first() == Some(&"on") {
                    let mode = args.get(1).copied().unwrap_or("heartbeat");
                    tunnel.keepalive_mode = mode.to_string();
                    tunnel.dpd_interval = args.get(2).and_then(|v| v.parse().ok()).unwrap_or(0);
                    tunnel.dpd_retry = args.get(3).and_then(|v| v.parse().ok()).unwrap_or(0);
                } else {
                    tunnel.keepalive_mode.clear();
                }
            }
        }
        _ => {}
    }
}

/// Arguments after the gateway id, when the id at `skip` is `gateway`.
fn gateway_args<'a>(tokens: &'a [&'a str], skip: usize, gateway: u32) -> Option<&'a [&'a str]> {
    let id: u32 = tokens.get(skip)?.parse().ok()?;
    (id == gateway).then(|| &tokens[skip + 1..])
}

fn apply_l2tp_setting(tunnel: &mut L2tpTunnel, rest: &str) {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    match tokens.as_slice() {
        ["local", "router-id", id, ..] => tunnel.local_router_id = id.to_string(),
        ["remote", "router-id", id, ..] => tunnel.remote_router_id = id.to_string(),
        ["remote", "end-id", id, ..] => tunnel.remote_end_id = id.to_string(),
        ["hostname", name, ..] => tunnel.hostname = name.to_string(),
        ["always-on", value, ..] => tunnel.always_on = on_off(value),
        ["tunnel", "auth", value, ..] => tunnel.auth_enabled = on_off(value),
        ["tunnel", "disconnect", "time", value, ..] => {
            tunnel.disconnect_time = value.parse().unwrap_or(0);
        }
        ["keepalive", "use", value, rest @ ..] => {
            tunnel.keepalive_enabled = on_off(value);
            tunnel.keepalive_interval = rest.first().and_then(|v| v.parse().ok()).unwrap_or(0);
            tunnel.keepalive_retry = rest.get(1).and_then(|v| v.parse().ok()).unwrap_or(0);
        }
        _ => {}
    }
}
