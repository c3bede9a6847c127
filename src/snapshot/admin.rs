//! Login/administrator passwords and local users.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ParsedConfig, key_values, on_off};

/// A `login user` account with its `user attribute` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AdminUser {
    pub username: String,
    /// Password as stored in the dump (possibly encrypted).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    pub encrypted: bool,
    /// `administrator=on`; `None` when the attribute is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub administrator: Option<bool>,
    /// Allowed connection kinds (`serial`, `telnet`, `ssh`, `sftp`, `http`...).
    #[serde(default)]
    pub connection: Vec<String>,
    #[serde(default)]
    pub gui_pages: Vec<String>,
    /// Idle logout in seconds (0 = never); `None` when not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_timer: Option<u32>,
}

/// Router passwords and accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AdminConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub login_password: String,
    pub login_password_encrypted: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_password: String,
    pub admin_password_encrypted: bool,
    #[serde(default)]
    pub users: Vec<AdminUser>,
}

impl ParsedConfig {
    /// Passwords and users. `None` when the dump carries no account lines.
    pub fn extract_admin(&self) -> Option<AdminConfig> {
        let mut admin = AdminConfig::default();
        let mut seen = false;

        for text in self.global_commands().map(|l| l.text.as_str()) {
            if let Some(rest) = text.strip_prefix("login password ") {
                let (encrypted, password) = split_encrypted(rest);
                admin.login_password = password;
                admin.login_password_encrypted = encrypted;
                seen = true;
            } else if let Some(rest) = text.strip_prefix("administrator password ") {
                let (encrypted, password) = split_encrypted(rest);
                admin.admin_password = password;
                admin.admin_password_encrypted = encrypted;
                seen = true;
            }
        }

        admin.users = self.extract_admin_users();
        if !admin.users.is_empty() {
            seen = true;
        }
        seen.then_some(admin)
    }

    /// Local users sorted by name. Attributes without a `login user` line
    /// still produce an entry.
    pub fn extract_admin_users(&self) -> Vec<AdminUser> {
        let mut users: BTreeMap<String, AdminUser> = BTreeMap::new();
        for text in self.global_commands().map(|l| l.text.as_str()) {
            if let Some(rest) = text.strip_prefix("login user ") {
                let mut parts = rest.splitn(2, ' ');
                let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
                    continue;
                };
                let (encrypted, password) = split_encrypted(parts.next().unwrap_or_default());
                let user = user_entry(&mut users, name);
                user.password = password;
                user.encrypted = encrypted;
            } else if let Some(rest) = text.strip_prefix("user attribute ") {
                let mut parts = rest.splitn(2, ' ');
                let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
                    continue;
                };
                let user = user_entry(&mut users, name);
                for (key, value) in key_values(parts.next().unwrap_or_default()) {
                    match key.as_str() {
                        "administrator" => user.administrator = Some(on_off(&value)),
                        "connection" => user.connection = split_list(&value),
                        "gui-page" => user.gui_pages = split_list(&value),
                        "login-timer" => user.login_timer = value.parse().ok(),
                        _ => {}
                    }
                }
            }
        }
        users.into_values().collect()
    }
}

fn user_entry<'a>(users: &'a mut BTreeMap<String, AdminUser>, name: &str) -> &'a mut AdminUser {
    users.entry(name.to_string()).or_insert_with(|| AdminUser {
        username: name.to_string(),
        ..AdminUser::default()
    })
}

fn split_encrypted(rest: &str) -> (bool, String) {
    let rest = rest.trim();
    match rest.strip_prefix("encrypted ") {
        Some(password) => (true, password.trim().to_string()),
        None => (false, rest.to_string()),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_and_users() {
        let cfg = ParsedConfig::parse(
            "login password encrypted ABCDEF\n\
             administrator password secret\n\
             login user operator encrypted XYZ\n\
             login user admin plain\n\
             user attribute admin administrator=on connection=ssh,sftp login-timer=300\n\
             user attribute guest connection=serial\n",
        )
        .expect("parse");
        let admin = cfg.extract_admin().expect("admin settings");
        assert_eq!(admin.login_password, "ABCDEF");
        assert!(admin.login_password_encrypted);
        assert_eq!(admin.admin_password, "secret");
        assert!(!admin.admin_password_encrypted);

        let names: Vec<_> = admin.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["admin", "guest", "operator"]);
        let user = &admin.users[0];
        assert_eq!(user.password, "plain");
        assert_eq!(user.administrator, Some(true));
        assert_eq!(user.connection, vec!["ssh", "sftp"]);
        assert_eq!(user.login_timer, Some(300));
        assert!(admin.users[2].encrypted);
        assert_eq!(admin.users[1].password, "");
    }

    #[test]
    fn no_accounts_is_none() {
        let cfg = ParsedConfig::parse("dns server 1.1.1.1\n").expect("parse");
        assert_eq!(cfg.extract_admin(), None);
        assert!(cfg.extract_admin_users().is_empty());
    }
}
