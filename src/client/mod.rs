//! High-level router client.
//!
//! [`Client`] owns one [`CommandRunner`] session, one [`SnapshotCache`] and the
//! fetcher that fills it. Reads of configured entities are served from the
//! cached snapshot when SFTP is enabled and fall back to a direct
//! `show config | grep` query otherwise. Writes run as one batch in
//! administrator mode, end with `save`, and always leave the cache invalid.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::error::RtxError;
use crate::session::{
    Command, CommandRunner, Connector, SessionEvent, SessionRecorder, SessionState, SshConnector,
};
use crate::snapshot::{
    ConfigFetcher, ConfigPathResolver, DEFAULT_CONFIG_PATH, ParsedConfig, SftpFetcher,
    SnapshotCache, sha256_hex,
};

mod dhcp;
mod dns;
mod filters;
mod routes;

/// A configured RTX router.
pub struct Client {
    config: ClientConfig,
    device_addr: String,
    runner: CommandRunner,
    cache: Arc<SnapshotCache>,
    fetcher: Arc<dyn ConfigFetcher>,
    config_path: Mutex<Option<String>>,
    recorder: Option<SessionRecorder>,
}

impl Client {
    /// A client that talks SSH and fetches snapshots over SFTP.
    pub fn new(config: ClientConfig) -> Result<Self, RtxError> {
        let fetcher = Arc::new(SftpFetcher::new(config.clone()));
        Self::with_parts(config, Arc::new(SshConnector), fetcher)
    }

    /// A client with explicit transport and snapshot sources.
    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        fetcher: Arc<dyn ConfigFetcher>,
    ) -> Result<Self, RtxError> {
        config.validate()?;
        let cache = Arc::new(SnapshotCache::new());
        let runner = CommandRunner::new(config.clone(), connector, cache.clone());
        Ok(Self {
            device_addr: config.device_addr(),
            config,
            runner,
            cache,
            fetcher,
            config_path: Mutex::new(None),
            recorder: None,
        })
    }

    /// Records session events, command output and snapshot fetches.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.runner = self.runner.with_recorder(recorder.clone());
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn state(&self) -> SessionState {
        self.runner.state()
    }

    pub fn sftp_enabled(&self) -> bool {
        self.config.sftp_enabled
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Forgets the cached snapshot, for changes made outside this client.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    pub async fn dial(&self) -> Result<(), RtxError> {
        self.runner.dial().await
    }

    /// Runs one command. A write invalidates the snapshot cache, and until a
    /// `save` follows, reads query the running configuration directly.
    pub async fn run(&self, command: &Command) -> Result<String, RtxError> {
        self.runner.run(command).await
    }

    pub async fn run_batch(&self, commands: &[Command]) -> Result<Vec<String>, RtxError> {
        self.runner.run_batch(commands).await
    }

    pub async fn close(&self) -> Result<(), RtxError> {
        self.runner.close().await
    }

    /// Writes the running configuration to the startup file.
    pub async fn save_config(&self) -> Result<(), RtxError> {
        self.runner.run(&Command::new("save", "save")).await?;
        Ok(())
    }

    /// The SFTP path of the startup configuration.
    ///
    /// An explicit `sftp_config_path` wins. Otherwise the path is read from
    /// `show environment` once per client, falling back to
    /// [`DEFAULT_CONFIG_PATH`] when the router does not name one.
    pub async fn resolve_config_path(&self) -> Result<String, RtxError> {
        if let Some(path) = self.config.sftp_config_path.as_ref() {
            return Ok(path.clone());
        }
        let mut memo = self.config_path.lock().await;
        if let Some(path) = memo.as_ref() {
            return Ok(path.clone());
        }

        let command = Command::new("environment", ConfigPathResolver::COMMAND)
            .with_timeout(ConfigPathResolver::TIMEOUT.as_secs());
        let path = match self.runner.run(&command).await {
            Ok(output) => {
                let path = ConfigPathResolver::resolve(&output);
                *memo = Some(path.clone());
                path
            }
            Err(err) if err.is_transient() => {
                warn!(
                    "{} cannot read environment ({}), using {}",
                    self.device_addr, err, DEFAULT_CONFIG_PATH
                );
                DEFAULT_CONFIG_PATH.to_string()
            }
            Err(err) => return Err(err),
        };
        debug!("{} startup config at {}", self.device_addr, path);
        Ok(path)
    }

    /// The parsed snapshot, fetched over SFTP at most once between writes.
    ///
    /// This is the saved startup file: a write sent through [`Client::run`]
    /// shows up here only after `save`. Facade reads fall back to
    /// `show config` until then.
    pub async fn get_cached_config(&self) -> Result<Arc<ParsedConfig>, RtxError> {
        if !self.sftp_enabled() {
            return Err(RtxError::InvalidConfig(
                "snapshot cache needs sftp_enabled".to_string(),
            ));
        }
        self.cache
            .get_or_fetch(|| async {
                let path = self.resolve_config_path().await?;
                let raw = self.fetcher.fetch(&path).await?;
                self.record_snapshot(&format!("sftp:{path}"), &raw);
                ParsedConfig::parse(&raw)
            })
            .await
    }

    /// Snapshot for a read: the cached one when available, else a filtered
    /// `show config` that is parsed for this read only.
    pub(crate) async fn read_config(&self, pattern: &str) -> Result<Arc<ParsedConfig>, RtxError> {
        if self.sftp_enabled() && self.cache.has_unsaved_changes() {
            debug!(
                "{} unsaved changes pending, querying running config",
                self.device_addr
            );
        } else if self.sftp_enabled() {
            match self.get_cached_config().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) => warn!(
                    "{} snapshot unavailable ({}), querying directly",
                    self.device_addr, err
                ),
            }
        }
        let command = Command::new(
            format!("show-config:{}", pattern.trim()),
            format!("show config | grep \"{pattern}\""),
        );
        let raw = self.runner.run(&command).await?;
        self.record_snapshot("show config", &raw);
        Ok(Arc::new(ParsedConfig::parse(&raw)?))
    }

    /// Runs `commands` and `save` as one batch.
    pub(crate) async fn apply(&self, key: &str, commands: Vec<String>) -> Result<(), RtxError> {
        if commands.is_empty() {
            return Err(RtxError::InvalidConfig(format!("{key}: nothing to apply")));
        }
        let mut batch: Vec<Command> = commands
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Command::new(format!("{key}#{}", i + 1), payload))
            .collect();
        batch.push(Command::new(format!("{key}#save"), "save"));
        debug!("{} {}: {} command(s)", self.device_addr, key, batch.len());
        self.runner.run_batch(&batch).await?;
        Ok(())
    }

    fn record_snapshot(&self, source: &str, raw: &str) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::SnapshotFetched {
                source: source.to_string(),
                digest: sha256_hex(raw.as_bytes()),
                bytes: raw.len(),
            });
        }
    }
}
