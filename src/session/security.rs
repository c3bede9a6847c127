use super::*;

/// SSH algorithm profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only. Works with current RTX firmware.
    #[default]
    Secure,
    /// Adds SHA-1 key exchange and CBC ciphers.
    Balanced,
    /// Everything an RTX1100/RTX1200-era SSH server may insist on.
    LegacyCompatible,
}

impl SecurityLevel {
    pub(crate) fn preferred(self) -> Preferred {
        let (kex, key, cipher, mac) = match self {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}

/// How the router's host key is verified.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// `~/.ssh/known_hosts`.
    #[default]
    KnownHosts,
    KnownHostsFile { path: String },
    /// A pinned base64 public key, as printed by `show ssh server host key`.
    Pinned { key: String },
    /// Skip verification. Lab routers only.
    Insecure,
}

impl HostKeyPolicy {
    pub(crate) fn server_check(&self) -> ServerCheckMethod {
        match self {
            HostKeyPolicy::KnownHosts => ServerCheckMethod::DefaultKnownHostsFile,
            HostKeyPolicy::KnownHostsFile { path } => ServerCheckMethod::KnownHostsFile(path.clone()),
            HostKeyPolicy::Pinned { key } => ServerCheckMethod::PublicKey(key.clone()),
            HostKeyPolicy::Insecure => ServerCheckMethod::NoCheck,
        }
    }
}

/// The SSH-level settings of one [`ClientConfig`], shared by the shell and
/// SFTP connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub host_key: HostKeyPolicy,
}

impl ConnectionSecurityOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            level: config.security,
            host_key: config.host_key.clone(),
        }
    }

    pub(crate) fn server_check(&self) -> ServerCheckMethod {
        self.host_key.server_check()
    }

    pub(crate) fn preferred(&self) -> Preferred {
        self.level.preferred()
    }
}
