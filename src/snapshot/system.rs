//! System-wide settings (timezone, console, packet buffers, statistics).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, on_off, unquote};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleConfig {
    /// `ja.sjis`, `ascii`, `ja.euc`, `en.ascii`...
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub character: String,
    /// Lines per page, `infinity` disables paging.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lines: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PacketBufferConfig {
    /// `small`, `middle` or `large`.
    pub size: String,
    pub max_buffer: u32,
    pub max_free: u32,
    pub min_free: u32,
}

/// Global system settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SystemConfig {
    /// UTC offset, e.g. `+09:00`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleConfig>,
    #[serde(default)]
    pub packet_buffers: Vec<PacketBufferConfig>,
    pub statistics_traffic: bool,
    pub statistics_nat: bool,
}

impl ParsedConfig {
    /// System settings. `None` when none of them are configured.
    pub fn extract_system(&self) -> Option<SystemConfig> {
        let mut system = SystemConfig::default();
        let mut seen = false;

        for text in self.global_commands().map(|l| l.text.as_str()) {
            if let Some(tz) = text.strip_prefix("timezone ") {
                system.timezone = tz.trim().to_string();
            } else if let Some(rest) = text.strip_prefix("console ") {
                let console = system.console.get_or_insert_with(ConsoleConfig::default);
                if let Some(value) = rest.strip_prefix("character ") {
                    console.character = value.trim().to_string();
                } else if let Some(value) = rest.strip_prefix("lines ") {
                    console.lines = value.trim().to_string();
                } else if let Some(value) = rest.strip_prefix("prompt ") {
                    console.prompt = unquote(value);
                }
            } else if let Some(rest) = text.strip_prefix("system packet-buffer ") {
                if let Some(buffer) = parse_packet_buffer(rest) {
                    system.packet_buffers.push(buffer);
                }
            } else if let Some(value) = text.strip_prefix("statistics traffic ") {
                system.statistics_traffic = on_off(value.trim());
            } else if let Some(value) = text.strip_prefix("statistics nat ") {
                system.statistics_nat = on_off(value.trim());
            } else {
                continue;
            }
            seen = true;
        }

        seen.then(|| {
            system.packet_buffers.sort_by(|a, b| a.size.cmp(&b.size));
            system
        })
    }
}

/// `small max-buffer=5000 max-free=1300 min-free=20`
fn parse_packet_buffer(rest: &str) -> Option<PacketBufferConfig> {
    let mut tokens = rest.split_whitespace();
    let mut buffer = PacketBufferConfig {
        size: tokens.next()?.to_string(),
        ..PacketBufferConfig::default()
    };
    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let value = value.parse().unwrap_or(0);
        match key {
            "max-buffer" => buffer.max_buffer = value,
            "max-free" => buffer.max_free = value,
            "min-free" => buffer.min_free = value,
            _ => {}
        }
    }
    Some(buffer)
}
