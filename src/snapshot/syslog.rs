//! Syslog forwarding.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, on_off};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyslogHost {
    pub address: String,
    /// UDP port (0 = default 514).
    pub port: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyslogConfig {
    #[serde(default)]
    pub hosts: Vec<SyslogHost>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub facility: String,
    pub notice: bool,
    pub info: bool,
    pub debug: bool,
}

impl ParsedConfig {
    /// Syslog settings. `None` without any `syslog` line.
    pub fn extract_syslog(&self) -> Option<SyslogConfig> {
        let mut syslog = SyslogConfig::default();
        let mut seen = false;
        for text in self.global_with_prefix("syslog ") {
            seen = true;
            let rest = &text["syslog ".len()..];
            if let Some(host) = rest.strip_prefix("host ") {
                let mut tokens = host.split_whitespace();
                let Some(address) = tokens.next() else {
                    continue;
                };
                let port = tokens
                    .find_map(|t| t.strip_prefix("port="))
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0);
                syslog.hosts.push(SyslogHost {
                    address: address.to_string(),
                    port,
                });
            } else if let Some(value) = rest.strip_prefix("facility ") {
                syslog.facility = value.trim().to_string();
            } else if let Some(value) = rest.strip_prefix("local address ") {
                syslog.local_address = value.trim().to_string();
            } else if let Some(value) = rest.strip_prefix("notice ") {
                syslog.notice = on_off(value.trim());
            } else if let Some(value) = rest.strip_prefix("info ") {
                syslog.info = on_off(value.trim());
            } else if let Some(value) = rest.strip_prefix("debug ") {
                syslog.debug = on_off(value.trim());
            }
        }
        seen.then(|| {
            syslog.hosts.sort_by(|a, b| a.address.cmp(&b.address));
            syslog
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_and_levels() {
        let cfg = ParsedConfig::parse(
            "syslog host 192.168.1.20 port=5514\n\
             syslog host 192.168.1.10\n\
             syslog facility local3\n\
             syslog notice on\n\
             syslog debug off\n\
             syslog local address 192.168.1.1\n",
        )
        .expect("parse");
        let syslog = cfg.extract_syslog().expect("syslog");
        assert_eq!(syslog.hosts.len(), 2);
        assert_eq!(syslog.hosts[0].address, "192.168.1.10");
        assert_eq!(syslog.hosts[0].port, 0);
        assert_eq!(syslog.hosts[1].port, 5514);
        assert_eq!(syslog.facility, "local3");
        assert_eq!(syslog.local_address, "192.168.1.1");
        assert!(syslog.notice);
        assert!(!syslog.debug);
        assert!(!syslog.info);
    }

    #[test]
    fn absent_is_none() {
        let cfg = ParsedConfig::parse("").expect("parse");
        assert_eq!(cfg.extract_syslog(), None);
    }
}
