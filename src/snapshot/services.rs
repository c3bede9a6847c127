//! Management services: HTTP, SSH and SFTP daemons.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, on_off};

/// One daemon's settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceConfig {
    /// `<daemon> service on|off`. Unset means the firmware default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Interfaces from `<daemon> host`, e.g. `any`, `lan1`.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// `sshd auth method` (`password`, `publickey`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_method: String,
    /// `httpd proxy-access l2ms permit on`.
    pub proxy_access: bool,
}

/// The three management daemons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServicesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub httpd: Option<ServiceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sshd: Option<ServiceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sftpd: Option<ServiceConfig>,
}

impl ParsedConfig {
    pub fn extract_services(&self) -> ServicesConfig {
        ServicesConfig {
            httpd: self.extract_service("httpd"),
            sshd: self.extract_service("sshd"),
            sftpd: self.extract_service("sftpd"),
        }
    }

    fn extract_service(&self, daemon: &str) -> Option<ServiceConfig> {
        let prefix = format!("{daemon} ");
        let mut service = ServiceConfig::default();
        let mut seen = false;
        for text in self.global_with_prefix(&prefix) {
            let rest = &text[prefix.len()..];
            if rest.starts_with("host key ") {
                continue;
            }
            if let Some(hosts) = rest.strip_prefix("host ") {
                service.hosts = hosts.split_whitespace().map(str::to_string).collect();
            } else if let Some(value) = rest.strip_prefix("service ") {
                service.enabled = Some(on_off(value.trim()));
            } else if let Some(method) = rest.strip_prefix("auth method ") {
                service.auth_method = method.trim().to_string();
            } else if let Some(value) = rest.strip_prefix("proxy-access l2ms permit ") {
                service.proxy_access = on_off(value.trim());
            } else {
                continue;
            }
            seen = true;
        }
        seen.then_some(service)
    }
}
