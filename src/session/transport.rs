use super::*;

/// A bidirectional text channel to the router shell.
///
/// Implementations deliver output in arbitrary chunks; framing is the job of
/// the prompt detector.
#[async_trait]
pub trait Transport: Send {
    /// Writes raw text to the shell. Line terminators are the caller's job.
    async fn send(&mut self, data: &str) -> Result<(), RtxError>;

    /// Next output chunk, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<String>;

    /// Drops output that has already arrived but was not read.
    fn discard_pending(&mut self) -> usize;

    fn is_connected(&self) -> bool;

    async fn close(&mut self);
}

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ClientConfig) -> Result<Box<dyn Transport>, RtxError>;
}

/// Opens an authenticated SSH client for `config`.
///
/// Password rejection and host key mismatches are authentication failures and
/// are never retried.
pub(crate) async fn open_client(config: &ClientConfig) -> Result<Client, RtxError> {
    let device_addr = config.device_addr();
    let security = ConnectionSecurityOptions::from_config(config);
    let ssh_config = Config {
        preferred: security.preferred(),
        inactivity_timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    };

    debug!("{} Connecting with {:?} security", device_addr, security.level);
    let client = Client::connect_with_config(
        (config.host.clone(), config.port),
        &config.username,
        AuthMethod::with_password(&config.password),
        security.server_check(),
        ssh_config,
    )
    .await
    .map_err(|e| match e {
        async_ssh2_tokio::Error::PasswordWrong => {
            RtxError::Authentication(format!("{device_addr}: password rejected"))
        }
        async_ssh2_tokio::Error::ServerCheckFailed => {
            RtxError::Authentication(format!("{device_addr}: host key verification failed"))
        }
        other => RtxError::from(other),
    })?;
    debug!("{} TCP connection successful", device_addr);
    Ok(client)
}

/// Opens interactive shells over SSH.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, config: &ClientConfig) -> Result<Box<dyn Transport>, RtxError> {
        Ok(Box::new(SshTransport::open(config).await?))
    }
}

/// Shell channel over SSH, bridged to the session through mpsc queues.
pub struct SshTransport {
    client: Client,
    sender: mpsc::Sender<String>,
    recv: mpsc::Receiver<String>,
    device_addr: String,
}

impl SshTransport {
    pub async fn open(config: &ClientConfig) -> Result<Self, RtxError> {
        let device_addr = config.device_addr();
        let client = open_client(config).await?;

        let mut channel = client.get_channel().await?;
        // Wide enough that the router never wraps a configuration line.
        channel
            .request_pty(false, "vt100", 512, 24, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            let mut decoder = Utf8Decoder::default();
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let text = decoder.decode(data);
                                if text.is_empty() {
                                    continue;
                                }
                                if sender_to_user.send(text).await.is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    },
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        Ok(Self {
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            device_addr,
        })
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn send(&mut self, data: &str) -> Result<(), RtxError> {
        self.sender.send(data.to_string()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<String> {
        self.recv.recv().await
    }

    fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(chunk) = self.recv.try_recv() {
            trace!("{} discarding {:?}", self.device_addr, chunk);
            dropped += 1;
        }
        dropped
    }

    fn is_connected(&self) -> bool {
        !self.client.is_closed() && !self.sender.is_closed()
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("{} disconnect failed: {:?}", self.device_addr, e);
        }
    }
}

/// Decodes shell output that may split a multibyte character across SSH
/// packets. An incomplete trailing sequence waits for the next chunk.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let mut text = String::new();
        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                }
                Err(e) => {
                    let end = start + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..end]));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = end + len;
                        }
                        None => {
                            start = end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        text
    }
}
