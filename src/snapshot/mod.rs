//! Configuration snapshot parsing.
//!
//! A snapshot is the full `show config` text of a router. [`ParsedConfig::parse`]
//! splits it into sections (the global section plus one per `tunnel select` /
//! `pp select` block) and keeps every command with its section, line number and
//! indentation. Typed records are materialized on demand by the `extract_*`
//! methods defined in the submodules; extraction is pure and never talks to the
//! router.
//!
//! # Main Components
//!
//! - [`ParsedConfig`] - Sectioned view of one snapshot
//! - [`SnapshotCache`] - Write-invalidated cache of the parsed snapshot
//! - [`ConfigFetcher`] - Source of raw snapshot text (SFTP or direct command)

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RtxError;

pub use admin::{AdminConfig, AdminUser};
pub use cache::{CacheEntry, SnapshotCache};
pub use dhcp::{
    DhcpBinding, DhcpScope, build_delete_dhcp_binding_command, build_dhcp_binding_command,
};
pub use dns::{DnsConfig, DnsHost, DnsServerSelect, build_delete_dns_commands, build_dns_commands};
pub use fetch::{ConfigFetcher, ConfigPathResolver, DEFAULT_CONFIG_PATH, SftpFetcher};
pub use filters::{
    IpFilter, IpFilterDynamic, build_delete_ip_filter_command, build_ip_filter_command,
};
pub use interfaces::{InterfaceAddress, InterfaceConfig};
pub use nat::{MasqueradeStaticEntry, NatMasquerade};
pub use pp::PpSession;
pub use routes::{NextHop, StaticRoute, build_delete_route_command, build_route_command};
pub(crate) use routes::route_grep_pattern;
pub use services::{ServiceConfig, ServicesConfig};
pub use syslog::{SyslogConfig, SyslogHost};
pub use system::{ConsoleConfig, PacketBufferConfig, SystemConfig};
pub use tunnels::{IpsecTunnel, L2tpTunnel};

/// A block of the configuration dump.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Section {
    /// Top-level commands.
    Global,
    /// Commands after `tunnel select N`.
    Tunnel(u32),
    /// Commands after `pp select N`.
    Pp(u32),
    /// Commands after `pp select anonymous`.
    PpAnonymous,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Global => write!(f, "global"),
            Section::Tunnel(id) => write!(f, "tunnel {id}"),
            Section::Pp(id) => write!(f, "pp {id}"),
            Section::PpAnonymous => write!(f, "pp anonymous"),
        }
    }
}

impl Section {
    /// Prefixes an unindented line may carry and still belong to this section.
    fn context_prefixes(self) -> &'static [&'static str] {
        match self {
            Section::Global => &[],
            Section::Tunnel(_) => &["tunnel ", "ipsec ", "l2tp ", "ip tunnel ", "description "],
            Section::Pp(_) | Section::PpAnonymous => {
                &["pp ", "pppoe ", "ppp ", "ip pp ", "ipv6 pp ", "description "]
            }
        }
    }

    /// Looks a section up by its display name (`global`, `tunnel 1`, `pp anonymous`).
    pub fn from_name(name: &str) -> Option<Section> {
        let name = name.trim().to_ascii_lowercase();
        let mut parts = name.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("global"), None, None) => Some(Section::Global),
            (Some("tunnel"), Some(id), None) => id.parse().ok().map(Section::Tunnel),
            (Some("pp"), Some("anonymous"), None) => Some(Section::PpAnonymous),
            (Some("pp"), Some(id), None) => id.parse().ok().map(Section::Pp),
            _ => None,
        }
    }
}

/// One command line of the dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigLine {
    /// Command text without surrounding whitespace.
    pub text: String,
    pub section: Section,
    /// 1-based line number in the original dump.
    pub line_number: usize,
    /// Leading whitespace width.
    pub indent: usize,
}

/// Sectioned, queryable view of one configuration dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfig {
    raw: String,
    line_count: usize,
    commands: Vec<ConfigLine>,
    sections: BTreeMap<Section, Vec<usize>>,
}

static TUNNEL_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tunnel\s+select(?:\s+(.*))?$").expect("static regex"));
static PP_SELECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^pp\s+select(?:\s+(.*))?$").expect("static regex"));
static CONTEXT_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:tunnel|pp)\s+(?:enable|disable)\s+\S+").expect("static regex")
});

impl ParsedConfig {
    /// Parses a full configuration dump.
    ///
    /// Unknown lines are kept as commands of their section. Only a malformed
    /// section selector is an error.
    pub fn parse(raw: &str) -> Result<ParsedConfig, RtxError> {
        let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
        let physical: Vec<&str> = normalized.split('\n').collect();
        let line_count = physical
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map(|p| p + 1)
            .unwrap_or(0);

        let mut commands = Vec::new();
        let mut sections: BTreeMap<Section, Vec<usize>> = BTreeMap::new();
        sections.insert(Section::Global, Vec::new());
        let mut current = Section::Global;

        for (line_number, line) in join_wrapped_lines(&physical) {
            let text = line.trim();
            if text.is_empty() || text.starts_with('#') || text.starts_with('!') {
                continue;
            }
            let indent = line.len() - line.trim_start().len();

            if let Some(caps) = TUNNEL_SELECT.captures(text) {
                current = match caps.get(1).map(|m| m.as_str().trim()) {
                    Some("none") => Section::Global,
                    Some(arg) => arg.parse().map(Section::Tunnel).map_err(|_| {
                        RtxError::parse(line_number, format!("invalid tunnel id '{arg}'"))
                    })?,
                    None => {
                        return Err(RtxError::parse(line_number, "tunnel select without id"));
                    }
                };
            } else if let Some(caps) = PP_SELECT.captures(text) {
                current = match caps.get(1).map(|m| m.as_str().trim()) {
                    Some("none") => Section::Global,
                    Some("anonymous") => Section::PpAnonymous,
                    Some(arg) => arg.parse().map(Section::Pp).map_err(|_| {
                        RtxError::parse(line_number, format!("invalid pp id '{arg}'"))
                    })?,
                    None => return Err(RtxError::parse(line_number, "pp select without id")),
                };
            } else if current != Section::Global
                && indent == 0
                && !current
                    .context_prefixes()
                    .iter()
                    .any(|prefix| text.starts_with(prefix))
            {
                current = Section::Global;
            }

            let index = commands.len();
            commands.push(ConfigLine {
                text: text.to_string(),
                section: current,
                line_number,
                indent,
            });
            sections.entry(current).or_default().push(index);

            if current != Section::Global && CONTEXT_END.is_match(text) {
                current = Section::Global;
            }
        }

        Ok(ParsedConfig {
            raw: raw.to_string(),
            line_count,
            commands,
            sections,
        })
    }

    /// The dump exactly as it was handed to [`ParsedConfig::parse`].
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Number of physical lines, ignoring trailing blank lines.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Number of commands (non-blank, non-comment logical lines).
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Hex SHA-256 of the raw dump. Identifies a snapshot without exposing it.
    pub fn digest(&self) -> String {
        sha256_hex(self.raw.as_bytes())
    }

    /// All commands in dump order.
    pub fn commands(&self) -> &[ConfigLine] {
        &self.commands
    }

    /// Sections present in the dump. `Global` is always present.
    pub fn sections(&self) -> impl Iterator<Item = Section> + '_ {
        self.sections.keys().copied()
    }

    /// Commands of one section in dump order.
    pub fn commands_in(&self, section: Section) -> impl Iterator<Item = &ConfigLine> + '_ {
        self.sections
            .get(&section)
            .into_iter()
            .flatten()
            .filter_map(|index| self.commands.get(*index))
    }

    /// Commands outside any tunnel or pp block.
    pub fn global_commands(&self) -> impl Iterator<Item = &ConfigLine> + '_ {
        self.commands_in(Section::Global)
    }

    /// Section text as it appeared in the dump, one command per line.
    pub fn section_text(&self, section: Section) -> Option<String> {
        let lines = self.sections.get(&section)?;
        let text = lines
            .iter()
            .filter_map(|index| self.commands.get(*index))
            .map(|line| format!("{}{}", " ".repeat(line.indent), line.text))
            .collect::<Vec<_>>()
            .join("\n");
        Some(text)
    }

    /// Looks a section up by display name, see [`Section::from_name`].
    pub fn section_by_name(&self, name: &str) -> Option<String> {
        Section::from_name(name).and_then(|section| self.section_text(section))
    }

    /// Global command texts that start with `prefix`.
    pub(crate) fn global_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.global_commands()
            .map(|line| line.text.as_str())
            .filter(move |text| text.starts_with(prefix))
    }

    /// Tunnel ids in ascending order.
    pub fn tunnel_ids(&self) -> Vec<u32> {
        self.sections
            .keys()
            .filter_map(|section| match section {
                Section::Tunnel(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// PP ids in ascending order (anonymous excluded).
    pub fn pp_ids(&self) -> Vec<u32> {
        self.sections
            .keys()
            .filter_map(|section| match section {
                Section::Pp(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// Rejoins lines the router wrapped at the terminal width.
///
/// A line whose first non-blank character is a digit continues the previous
/// one. When the previous line ends in a digit and the continuation starts in
/// column 0, the number itself was split and the halves are joined without a
/// space. Yields the 1-based number of the first physical line of each logical
/// line.
fn join_wrapped_lines(physical: &[&str]) -> Vec<(usize, String)> {
    let mut joined: Vec<(usize, String)> = Vec::with_capacity(physical.len());
    for (index, line) in physical.iter().enumerate() {
        let trimmed = line.trim();
        let continues = trimmed.starts_with(|c: char| c.is_ascii_digit())
            && joined
                .last()
                .map(|(_, prev)| {
                    let prev = prev.trim();
                    !prev.is_empty() && !prev.starts_with('#')
                })
                .unwrap_or(false);
        if continues && let Some((_, prev)) = joined.last_mut() {
            let prev_ends_digit = prev.ends_with(|c: char| c.is_ascii_digit());
            let starts_at_column_zero = line.starts_with(|c: char| c.is_ascii_digit());
            if !(prev_ends_digit && starts_at_column_zero) {
                prev.push(' ');
            }
            prev.push_str(trimmed);
            continue;
        }
        joined.push((index + 1, line.to_string()));
    }
    joined
}

/// Lowercase hex SHA-256, used to identify snapshots in logs.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Parses a space separated list of positive numbers, stopping at `stop`.
pub(crate) fn number_list(text: &str, stop: Option<&str>) -> Vec<u32> {
    text.split_whitespace()
        .take_while(|token| Some(*token) != stop)
        .filter_map(|token| token.parse::<u32>().ok())
        .filter(|n| *n > 0)
        .collect()
}

/// Removes one level of double quotes.
pub(crate) fn unquote(text: &str) -> String {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .to_string()
}

/// Splits `key=value` tokens into pairs; bare tokens get an empty value.
pub(crate) fn key_values(text: &str) -> Vec<(String, String)> {
    text.split_whitespace()
        .map(|token| match token.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (token.to_string(), String::new()),
        })
        .collect()
}

pub(crate) fn on_off(value: &str) -> bool {
    value.eq_ignore_ascii_case("on")
}

mod admin;
mod cache;
mod dhcp;
mod dns;
mod fetch;
mod filters;
mod interfaces;
mod nat;
mod pp;
mod routes;
mod services;
mod syslog;
mod system;
mod tunnels;
