//! PP (PPPoE) sessions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, Section, on_off, unquote};

/// A `pp select N` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PpSession {
    pub number: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Physical interface from `pppoe use`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface: String,
    /// `pp bind` target (e.g. `tunnel1`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bind_interface: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ac_name: String,
    /// `pp auth accept` methods (`pap`, `chap`...).
    #[serde(default)]
    pub auth_accept: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_password: String,
    pub always_on: bool,
    /// `pp disconnect time` in seconds (0 = never).
    pub disconnect_timeout: u32,
    pub lcp_echo: bool,
    pub enabled: bool,
}

impl ParsedConfig {
    /// Numbered PP sessions sorted by number. `pp select anonymous` is not a
    /// PPPoE session and is skipped.
    pub fn extract_pp_sessions(&self) -> Vec<PpSession> {
        self.pp_ids()
            .into_iter()
            .map(|number| {
                let mut session = PpSession {
                    number,
                    ..PpSession::default()
                };
                for line in self.commands_in(Section::Pp(number)) {
                    apply_pp_setting(&mut session, &line.text);
                }
                session
            })
            .collect()
    }
}

fn apply_pp_setting(session: &mut PpSession, text: &str) {
    let number = session.number.to_string();
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.as_slice() {
        ["description", "pp", rest @ ..] => session.name = unquote(&rest.join(" ")),
        ["pppoe", "use", iface, ..] => session.interface = iface.to_string(),
        ["pppoe", "service-name", name, ..] => session.service_name = name.to_string(),
        ["pppoe", "access", "concentrator", name, ..] => session.ac_name = name.to_string(),
        ["pp", "bind", iface, ..] => session.bind_interface = iface.to_string(),
        ["pp", "always-on", value, ..] => session.always_on = on_off(value),
        ["pp", "auth", "accept", methods @ ..] => {
            session.auth_accept = methods.iter().map(|m| m.to_string()).collect();
        }
        ["pp", "auth", "myname", user, password, ..] => {
            session.auth_username = user.to_string();
            session.auth_password = password.to_string();
        }
        ["pp", "disconnect", "time", value, ..] => {
            session.disconnect_timeout = value.parse().unwrap_or(0);
        }
        ["pp", "keepalive", "use", "lcp-echo", ..] => session.lcp_echo = true,
        ["pp", "enable", id] if *id == number => session.enabled = true,
        ["pp", "disable", id] if *id == number => session.enabled = false,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pppoe_session() {
        let cfg = ParsedConfig::parse(
            "pp select 1\n\
             \u{20}description pp \"FLET'S\"\n\
             \u{20}pp keepalive use lcp-echo\n\
             \u{20}pp always-on on\n\
             \u{20}pppoe use lan2\n\
             \u{20}pp auth accept pap chap\n\
             \u{20}pp auth myname user@isp.example pass\n\
             \u{20}pp disconnect time off\n\
             \u{20}ip pp mtu 1454\n\
             \u{20}pp enable 1\n\
             pp select anonymous\n\
             \u{20}pp bind tunnel1\n",
        )
        .expect("parse");
        let sessions = cfg.extract_pp_sessions();
        assert_eq!(sessions.len(), 1);
        let pp = &sessions[0];
        assert_eq!(pp.number, 1);
        assert_eq!(pp.name, "FLET'S");
        assert_eq!(pp.interface, "lan2");
        assert_eq!(pp.auth_accept, vec!["pap", "chap"]);
        assert_eq!(pp.auth_username, "user@isp.example");
        assert_eq!(pp.auth_password, "pass");
        assert_eq!(pp.disconnect_timeout, 0);
        assert!(pp.always_on);
        assert!(pp.lcp_echo);
        assert!(pp.enabled);
    }
}
