//! Where snapshot text comes from.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::io::AsyncReadExt;

use crate::config::ClientConfig;
use crate::error::RtxError;
use crate::session::open_client;

use super::sha256_hex;

/// Startup configuration file used when the router does not say otherwise.
pub const DEFAULT_CONFIG_PATH: &str = "/system/config0";

/// Reads the raw configuration text from the router.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<String, RtxError>;
}

/// Fetches the configuration file over SFTP on a connection of its own, so the
/// interactive shell is never blocked by a large transfer.
#[derive(Debug, Clone)]
pub struct SftpFetcher {
    config: ClientConfig,
}

impl SftpFetcher {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RtxError> {
        let client = open_client(&self.config).await?;
        let result = async {
            let channel = client.get_channel().await?;
            channel.request_subsystem(true, "sftp").await?;
            let sftp = SftpSession::new(channel.into_stream()).await?;
            let mut file = sftp.open_with_flags(path, OpenFlags::READ).await?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).await?;
            let _ = sftp.close().await;
            Ok::<_, RtxError>(contents)
        }
        .await;
        let _ = client.disconnect().await;
        result
    }
}

#[async_trait]
impl ConfigFetcher for SftpFetcher {
    async fn fetch(&self, path: &str) -> Result<String, RtxError> {
        let device_addr = self.config.device_addr();
        let deadline = self.config.connect_timeout() + self.config.timeout();
        let contents = tokio::time::timeout(deadline, self.read_file(path))
            .await
            .map_err(|_| {
                RtxError::Connection(format!("sftp read of {path} exceeded {deadline:?}"))
            })??;
        debug!(
            "{} fetched {} ({} bytes, sha256 {})",
            device_addr,
            path,
            contents.len(),
            sha256_hex(&contents)
        );
        Ok(String::from_utf8_lossy(&contents).into_owned())
    }
}

static DEFAULT_CONFIG_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:Default config file|デフォルト設定ファイル)\s*[:：]\s*(config[0-9]+(?:\.[0-9]+)?)")
        .expect("static regex")
});

/// Finds the startup configuration file from `show environment` output.
pub struct ConfigPathResolver;

impl ConfigPathResolver {
    /// The command whose output [`ConfigPathResolver::resolve`] understands.
    pub const COMMAND: &'static str = "show environment";

    /// Upper bound for the command, which is quick on every firmware.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    /// The SFTP path named in `environment`, if any.
    pub fn parse(environment: &str) -> Option<String> {
        DEFAULT_CONFIG_FILE
            .captures(environment)
            .and_then(|caps| caps.get(1))
            .map(|name| format!("/system/{}", name.as_str()))
    }

    /// Like [`ConfigPathResolver::parse`], falling back to [`DEFAULT_CONFIG_PATH`].
    pub fn resolve(environment: &str) -> String {
        Self::parse(environment).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }
}
