//! Static and dynamic IP filters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ParsedConfig;

/// An `ip filter N ...` rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IpFilter {
    pub number: u32,
    /// `pass`, `reject`, `restrict`, `pass-log`, `reject-nolog`...
    pub action: String,
    pub source_address: String,
    pub dest_address: String,
    /// `tcp`, `udp`, `icmp`, `*`... (`*` when omitted).
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dest_port: String,
    pub established: bool,
}

/// An `ip filter dynamic N ...` stateful rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IpFilterDynamic {
    pub number: u32,
    pub source: String,
    pub dest: String,
    /// Application protocol (`ftp`, `www`, `domain`, `tcp`...).
    pub protocol: String,
    pub syslog: bool,
}

impl ParsedConfig {
    /// Static IP filters sorted by number.
    pub fn extract_ip_filters(&self) -> Vec<IpFilter> {
        let mut filters: Vec<IpFilter> = self
            .global_with_prefix("ip filter ")
            .filter(|line| !line.starts_with("ip filter dynamic ") && !line.starts_with("ip filter set "))
            .filter_map(parse_ip_filter)
            .collect();
        filters.sort_by_key(|f| f.number);
        filters.dedup_by_key(|f| f.number);
        filters
    }

    /// Dynamic filters sorted by number.
    pub fn extract_ip_filters_dynamic(&self) -> Vec<IpFilterDynamic> {
        let mut filters: Vec<IpFilterDynamic> = self
            .global_with_prefix("ip filter dynamic ")
            .filter_map(parse_dynamic_filter)
            .collect();
        filters.sort_by_key(|f| f.number);
        filters
    }
}

fn parse_ip_filter(line: &str) -> Option<IpFilter> {
    let tokens: Vec<&str> = line.strip_prefix("ip filter ")?.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let number = tokens[0].parse().ok()?;
    let mut filter = IpFilter {
        number,
        action: tokens[1].to_string(),
        source_address: tokens[2].to_string(),
        dest_address: tokens[3].to_string(),
        protocol: tokens.get(4).unwrap_or(&"*").to_string(),
        ..IpFilter::default()
    };
    for token in tokens.iter().skip(5).copied() {
        if token == "established" {
            filter.established = true;
        } else if filter.source_port.is_empty() {
            filter.source_port = token.to_string();
        } else if filter.dest_port.is_empty() {
            filter.dest_port = token.to_string();
        }
    }
    if filter.protocol == "established" {
        filter.protocol = "tcp".to_string();
        filter.established = true;
    }
    Some(filter)
}

fn parse_dynamic_filter(line: &str) -> Option<IpFilterDynamic> {
    let tokens: Vec<&str> = line
        .strip_prefix("ip filter dynamic ")?
        .split_whitespace()
        .collect();
    if tokens.len() < 4 {
        return None;
    }
    let syslog = tokens
        .windows(2)
        .any(|pair| pair[0] == "syslog" && pair[1] == "on");
    Some(IpFilterDynamic {
        number: tokens[0].parse().ok()?,
        source: tokens[1].to_string(),
        dest: tokens[2].to_string(),
        protocol: tokens[3].to_string(),
        syslog,
    })
}

/// `ip filter` command for a rule. Trailing wildcards are kept explicit.
pub fn build_ip_filter_command(filter: &IpFilter) -> String {
    let mut cmd = format!(
        "ip filter {} {} {} {} {}",
        filter.number,
        filter.action,
        or_any(&filter.source_address),
        or_any(&filter.dest_address),
        or_any(&filter.protocol)
    );
    if filter.established {
        cmd.push_str(" established");
        return cmd;
    }
    if !filter.source_port.is_empty() || !filter.dest_port.is_empty() {
        cmd.push_str(&format!(
            " {} {}",
            or_any(&filter.source_port),
            or_any(&filter.dest_port)
        ));
    }
    cmd
}

pub fn build_delete_ip_filter_command(number: u32) -> String {
    format!("no ip filter {number}")
}

fn or_any(value: &str) -> &str {
    if value.is_empty() { "*" } else { value }
}
