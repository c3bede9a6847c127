//! DNS resolver and relay settings.

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, on_off};

/// A `dns server select` rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DnsServerSelect {
    pub id: u32,
    pub servers: Vec<String>,
    /// `a`, `aaaa`, `ptr`, `mx`, `ns`, `cname` or `any`.
    pub record_type: String,
    pub query_pattern: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_sender: String,
    /// PP session restriction (0 = none).
    pub restrict_pp: u32,
}

/// A `dns static` host entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DnsHost {
    pub name: String,
    pub address: String,
}

/// Router-wide DNS settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DnsConfig {
    /// `dns domain lookup`, on unless disabled.
    pub domain_lookup: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain_name: String,
    #[serde(default)]
    pub name_servers: Vec<String>,
    #[serde(default)]
    pub server_select: Vec<DnsServerSelect>,
    #[serde(default)]
    pub hosts: Vec<DnsHost>,
    pub service_on: bool,
    pub private_spoof: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            domain_lookup: true,
            domain_name: String::new(),
            name_servers: Vec::new(),
            server_select: Vec::new(),
            hosts: Vec::new(),
            service_on: false,
            private_spoof: false,
        }
    }
}

impl DnsConfig {
    /// True when nothing differs from the router defaults.
    pub fn is_default(&self) -> bool {
        *self == DnsConfig::default()
    }
}

const RECORD_TYPES: &[&str] = &["a", "aaaa", "ptr", "mx", "ns", "cname", "any"];

static SERVER_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^dns\s+server\s+select\s+(\d+)\s+(.+)$").expect("static regex"));

impl ParsedConfig {
    /// DNS settings. `None` when the dump has no `dns` line at all.
    pub fn extract_dns(&self) -> Option<DnsConfig> {
        let mut config = DnsConfig::default();
        let mut seen = false;

        for line in self.global_commands().map(|l| l.text.as_str()) {
            let Some(rest) = line
                .strip_prefix("dns ")
                .or_else(|| line.strip_prefix("no dns "))
            else {
                continue;
            };
            seen = true;
            let negated = line.starts_with("no ");

            if rest == "domain lookup" && negated {
                config.domain_lookup = false;
            } else if let Some(value) = rest.strip_prefix("domain lookup ") {
                config.domain_lookup = on_off(value.trim());
            } else if let Some(name) = rest.strip_prefix("domain ") {
                config.domain_name = name.trim().to_string();
            } else if let Some(caps) = SERVER_SELECT.captures(line) {
                if let Some(select) = parse_server_select(&caps[1], &caps[2]) {
                    config.server_select.push(select);
                }
            } else if let Some(servers) = rest.strip_prefix("server ") {
                config.name_servers = servers
                    .split_whitespace()
                    .filter(|s| *s != "edns=on")
                    .map(str::to_string)
                    .collect();
            } else if let Some(entry) = rest.strip_prefix("static ") {
                let tokens: Vec<&str> = entry.split_whitespace().collect();
                // `dns static [type] name address`
                if let [.., name, address] = tokens.as_slice() {
                    config.hosts.push(DnsHost {
                        name: name.to_string(),
                        address: address.to_string(),
                    });
                }
            } else if let Some(value) = rest.strip_prefix("service ") {
                config.service_on = matches!(value.trim(), "on" | "recursive");
            } else if let Some(value) = rest.strip_prefix("private address spoof ") {
                config.private_spoof = on_off(value.trim());
            }
        }

        if !seen {
            return None;
        }
        config.server_select.sort_by_key(|s| s.id);
        config.hosts.sort_by(|a, b| a.name.cmp(&b.name));
        Some(config)
    }
}

/// `dns server select N server... [edns=on] [type] query [original-sender] [restrict pp N]`
fn parse_server_select(id: &str, rest: &str) -> Option<DnsServerSelect> {
    let mut select = DnsServerSelect {
        id: id.parse().ok()?,
        record_type: "a".to_string(),
        ..DnsServerSelect::default()
    };
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut index = 0;
    while let Some(token) = tokens.get(index) {
        if token.parse::<std::net::IpAddr>().is_ok() {
            select.servers.push(token.to_string());
            index += 1;
        } else if token.starts_with("edns=") {
            index += 1;
        } else {
            break;
        }
    }
    if let Some(token) = tokens.get(index)
        && RECORD_TYPES.contains(token)
    {
        select.record_type = token.to_string();
        index += 1;
    }
    select.query_pattern = tokens.get(index).map(|s| s.to_string()).unwrap_or_default();
    index += 1;
    while let Some(token) = tokens.get(index) {
        if *token == "restrict" && tokens.get(index + 1) == Some(&"pp") {
            select.restrict_pp = tokens
                .get(index + 2)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            index += 3;
        } else {
            select.original_sender = token.to_string();
            index += 1;
        }
    }
    Some(select)
}

/// Commands that bring the router to `config`. Settings at their default
/// are not emitted.
pub fn build_dns_commands(config: &DnsConfig) -> Vec<String> {
    let mut commands = Vec::new();
    if !config.name_servers.is_empty() {
        commands.push(format!("dns server {}", config.name_servers.join(" ")));
    }
    if !config.domain_name.is_empty() {
        commands.push(format!("dns domain {}", config.domain_name));
    }
    if !config.domain_lookup {
        commands.push("dns domain lookup off".to_string());
    }
    for select in &config.server_select {
        let mut cmd = format!(
            "dns server select {} {} {} {}",
            select.id,
            select.servers.join(" "),
            select.record_type,
            select.query_pattern
        );
        if !select.original_sender.is_empty() {
            cmd.push_str(&format!(" {}", select.original_sender));
        }
        if select.restrict_pp > 0 {
            cmd.push_str(&format!(" restrict pp {}", select.restrict_pp));
        }
        commands.push(cmd);
    }
    for host in &config.hosts {
        commands.push(format!("dns static a {} {}", host.name, host.address));
    }
    if config.service_on {
        commands.push("dns service recursive".to_string());
    }
    if config.private_spoof {
        commands.push("dns private address spoof on".to_string());
    }
    commands
}

/// Commands that reset every DNS setting present in `config`.
pub fn build_delete_dns_commands(config: &DnsConfig) -> Vec<String> {
    let mut commands = Vec::new();
    if !config.name_servers.is_empty() {
        commands.push("no dns server".to_string());
    }
    if !config.domain_name.is_empty() {
        commands.push("no dns domain".to_string());
    }
    if !config.domain_lookup {
        commands.push("dns domain lookup on".to_string());
    }
    for select in &config.server_select {
        commands.push(format!("no dns server select {}", select.id));
    }
    for host in &config.hosts {
        commands.push(format!("no dns static a {}", host.name));
    }
    if config.service_on {
        commands.push("dns service off".to_string());
    }
    if config.private_spoof {
        commands.push("dns private address spoof off".to_string());
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_dns_block() {
        let cfg = ParsedConfig::parse(
            "dns host lan1\n\
             dns service recursive\n\
             dns server 8.8.8.8 8.8.4.4\n\
             dns server select 2 192.168.100.1 any internal.example.com\n\
             dns server select 1 10.0.0.53 edns=on aaaa . 192.168.1.0/24 restrict pp 1\n\
             dns domain example.com\n\
             dns static a router.example.com 192.168.1.1\n\
             dns private address spoof on\n\
             no dns domain lookup\n",
        )
        .expect("parse");
        let dns = cfg.extract_dns().expect("dns present");
        assert_eq!(dns.name_servers, vec!["8.8.8.8", "8.8.4.4"]);
        assert_eq!(dns.domain_name, "example.com");
        assert!(!dns.domain_lookup);
        assert!(dns.service_on);
        assert!(dns.private_spoof);
        assert_eq!(dns.hosts.len(), 1);
        assert_eq!(dns.hosts[0].address, "192.168.1.1");

        assert_eq!(dns.server_select.len(), 2);
        let first = &dns.server_select[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.servers, vec!["10.0.0.53"]);
        assert_eq!(first.record_type, "aaaa");
        assert_eq!(first.query_pattern, ".");
        assert_eq!(first.original_sender, "192.168.1.0/24");
        assert_eq!(first.restrict_pp, 1);
        assert_eq!(dns.server_select[1].record_type, "any");
    }

    #[test]
    fn absent_dns_is_none() {
        let cfg = ParsedConfig::parse("ip route default gateway pp 1\n").expect("parse");
        assert_eq!(cfg.extract_dns(), None);
    }

    #[test]
    fn commands_skip_defaults() {
        let config = DnsConfig {
            name_servers: vec!["1.1.1.1".to_string()],
            ..DnsConfig::default()
        };
        assert_eq!(build_dns_commands(&config), vec!["dns server 1.1.1.1"]);
        assert_eq!(build_delete_dns_commands(&config), vec!["no dns server"]);
        assert!(build_dns_commands(&DnsConfig::default()).is_empty());
        assert!(DnsConfig::default().is_default());
    }
}
