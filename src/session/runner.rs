use super::*;
use once_cell::sync::Lazy;
use regex::Regex;

static SAVE_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^save(?:\s|$)").expect("static regex"));

/// Mutable session data. Only reachable through the runner's gate.
struct Session {
    transport: Option<Box<dyn Transport>>,
    privilege: Privilege,
    /// Set while a command is on the wire; still set after a timeout or a
    /// dropped future, which means buffered output cannot be trusted.
    desynced: bool,
    prompt: String,
    closed: bool,
}

/// Restores the ready state when a command future is dropped mid-flight.
struct BusyGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    device_addr: &'a str,
    restore: SessionState,
    armed: bool,
}

impl<'a> BusyGuard<'a> {
    fn finish(mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "{} command interrupted, session needs resync",
                self.device_addr
            );
            transition(self.state, self.device_addr, self.restore);
        }
    }
}

fn transition(state: &watch::Sender<SessionState>, device_addr: &str, next: SessionState) -> bool {
    let mut applied = None;
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            warn!(
                "{} ignoring session transition {} -> {}",
                device_addr, current, next
            );
            return false;
        }
        applied = Some(*current);
        *current = next;
        true
    });
    if let Some(from) = applied {
        trace!("{} session {} -> {}", device_addr, from, next);
        true
    } else {
        false
    }
}

/// Serialized command execution over one router session.
///
/// All work goes through a single async mutex: concurrent callers queue on it
/// and never share the shell. Transient failures are retried with the
/// configured [`RetryPolicy`](crate::retry::RetryPolicy); everything else
/// surfaces at once.
pub struct CommandRunner {
    config: ClientConfig,
    device_addr: String,
    connector: Arc<dyn Connector>,
    detector: Arc<PromptDetector>,
    authenticator: Authenticator,
    cache: Arc<SnapshotCache>,
    session: Mutex<Session>,
    state: watch::Sender<SessionState>,
    recorder: Option<SessionRecorder>,
}

impl CommandRunner {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>, cache: Arc<SnapshotCache>) -> Self {
        let detector = Arc::new(PromptDetector::rtx());
        let authenticator = Authenticator::from_config(&config, detector.clone());
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            device_addr: config.device_addr(),
            config,
            connector,
            detector,
            authenticator,
            cache,
            session: Mutex::new(Session {
                transport: None,
                privilege: Privilege::User,
                desynced: false,
                prompt: String::new(),
                closed: false,
            }),
            state,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follows state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    /// Current privilege and prompt. Waits for any command in flight.
    pub async fn privilege(&self) -> (Privilege, String) {
        let session = self.session.lock().await;
        (session.privilege, session.prompt.clone())
    }

    fn set_state(&self, next: SessionState) {
        let from = self.state();
        if transition(&self.state, &self.device_addr, next) {
            self.record(SessionEvent::StateChanged { from, to: next });
        }
    }

    fn record(&self, event: SessionEvent) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(event);
        }
    }

    /// Connects and logs in, retrying transient failures.
    ///
    /// Authentication failures close the session and are not retried.
    pub async fn dial(&self) -> Result<(), RtxError> {
        let mut session = self.session.lock().await;
        if session.closed {
            return Err(RtxError::SessionClosed);
        }
        if session.transport.as_ref().is_some_and(|t| t.is_connected()) {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match self.connect(&mut session).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if matches!(err, RtxError::Authentication(_)) {
                        self.shutdown(&mut session, "authentication failed").await;
                        return Err(err);
                    }
                    if !self.config.retry.should_retry(attempt, err.class()) {
                        return Err(err);
                    }
                    self.backoff("dial", attempt, &err).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn backoff(&self, key: &str, attempt: u32, err: &RtxError) {
        let delay = self.config.retry.next_delay(attempt);
        warn!(
            "{} '{}' attempt {} failed: {}; retrying in {:?}",
            self.device_addr,
            key,
            attempt + 1,
            err,
            delay
        );
        self.record(SessionEvent::Retry {
            key: key.to_string(),
            attempt: attempt + 1,
            delay_ms: delay.as_millis() as u64,
            error: err.to_string(),
        });
        tokio::time::sleep(delay).await;
    }

    /// One connection attempt: open, log in, switch to ASCII, maybe escalate.
    async fn connect(&self, session: &mut Session) -> Result<(), RtxError> {
        if let Some(mut stale) = session.transport.take() {
            stale.close().await;
        }
        self.set_state(SessionState::Connecting);

        let result = tokio::time::timeout(self.config.connect_timeout(), async {
            let mut transport = self.connector.connect(&self.config).await?;
            let prompt = self.authenticator.login(transport.as_mut()).await?;
            Ok::<_, RtxError>((transport, prompt))
        })
        .await;
        let (mut transport, prompt) = match result {
            Ok(Ok(opened)) => opened,
            Ok(Err(err)) => {
                self.set_state(SessionState::Disconnected);
                return Err(err);
            }
            Err(_) => {
                self.set_state(SessionState::Disconnected);
                return Err(RtxError::Connection(format!(
                    "{}: not logged in within {:?}",
                    self.device_addr,
                    self.config.connect_timeout()
                )));
            }
        };

        let mut privilege = Privilege::from_prompt(prompt.kind);
        let mut prompt_text = prompt.text;

        let setup = async {
            let ascii = self
                .exchange(transport.as_mut(), "console character en.ascii", self.config.timeout())
                .await?;
            prompt_text = ascii.prompt.text.clone();
            if self.config.privilege == PrivilegePolicy::AtDial && privilege == Privilege::User {
                let escalated = self.authenticator.escalate(transport.as_mut()).await?;
                privilege = Privilege::from_prompt(escalated.kind);
                prompt_text = escalated.text;
            }
            Ok::<_, RtxError>(())
        };
        if let Err(err) = setup.await {
            transport.close().await;
            self.set_state(SessionState::Disconnected);
            return Err(err);
        }

        debug!(
            "{} session ready at {:?} ({:?})",
            self.device_addr, prompt_text, privilege
        );
        self.record(SessionEvent::ConnectionEstablished {
            device_addr: self.device_addr.clone(),
            prompt: prompt_text.clone(),
            privilege,
        });
        session.transport = Some(transport);
        session.privilege = privilege;
        session.prompt = prompt_text;
        session.desynced = false;
        self.set_state(privilege.ready_state());
        Ok(())
    }

    /// Sends one line and waits for the next command prompt.
    async fn exchange(
        &self,
        transport: &mut dyn Transport,
        line: &str,
        timeout: Duration,
    ) -> Result<expect::ReadOutcome, RtxError> {
        transport.discard_pending();
        transport.send(&format!("{line}\r")).await?;
        read_until(
            transport,
            &self.detector,
            timeout,
            &self.device_addr,
            PromptKind::is_command_prompt,
        )
        .await
    }

    /// Runs a command, retrying transient failures with the same payload.
    ///
    /// Returns the output between the echoed command line and the next prompt,
    /// with pagination removed and lines cleaned. Errors carry the command key
    /// and the number of attempts.
    pub async fn run(&self, command: &Command) -> Result<String, RtxError> {
        let mut session = self.session.lock().await;
        self.run_locked(&mut session, command).await
    }

    /// Runs several commands back to back without releasing the session.
    ///
    /// Stops at the first failure.
    pub async fn run_batch(&self, commands: &[Command]) -> Result<Vec<String>, RtxError> {
        let mut session = self.session.lock().await;
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            outputs.push(self.run_locked(&mut session, command).await?);
        }
        Ok(outputs)
    }

    async fn run_locked(&self, session: &mut Session, command: &Command) -> Result<String, RtxError> {
        let mut attempt = 0;
        loop {
            match self.run_once(session, command).await {
                Ok(output) => return Ok(output),
                Err(err) => {
                    if self.config.retry.should_retry(attempt, err.class()) {
                        self.backoff(&command.key, attempt, &err).await;
                        attempt += 1;
                        continue;
                    }
                    debug!(
                        "{} '{}' failed after {} attempt(s): {}",
                        self.device_addr,
                        command.key,
                        attempt + 1,
                        err
                    );
                    return Err(RtxError::Command {
                        key: command.key.clone(),
                        attempts: attempt + 1,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    async fn ensure_connected(&self, session: &mut Session) -> Result<(), RtxError> {
        if session.closed {
            return Err(RtxError::SessionClosed);
        }
        if session.transport.as_ref().is_some_and(|t| t.is_connected()) {
            return Ok(());
        }
        if session.transport.is_some() {
            warn!("{} channel lost, reconnecting", self.device_addr);
            self.drop_transport(session).await;
        }
        match self.connect(session).await {
            Err(err @ RtxError::Authentication(_)) => {
                self.shutdown(session, "authentication failed").await;
                Err(err)
            }
            other => other,
        }
    }

    async fn drop_transport(&self, session: &mut Session) {
        if let Some(mut transport) = session.transport.take() {
            transport.close().await;
        }
        session.privilege = Privilege::User;
        session.desynced = false;
        self.set_state(SessionState::Disconnected);
    }

    async fn run_once(&self, session: &mut Session, command: &Command) -> Result<String, RtxError> {
        self.ensure_connected(session).await?;

        let mut guard = BusyGuard {
            state: &self.state,
            device_addr: &self.device_addr,
            restore: session.privilege.ready_state(),
            armed: true,
        };
        self.set_state(SessionState::Busy);

        let result = self.submit(session, command, &mut guard).await;
        guard.finish();

        match result {
            Ok(output) => {
                self.set_state(session.privilege.ready_state());
                Ok(output)
            }
            Err(err @ RtxError::Authentication(_)) => {
                self.shutdown(session, "authentication failed").await;
                Err(err)
            }
            Err(err @ (RtxError::Connection(_) | RtxError::SendDataError(_))) => {
                self.drop_transport(session).await;
                Err(err)
            }
            Err(err) => {
                self.set_state(session.privilege.ready_state());
                Err(err)
            }
        }
    }

    async fn submit(
        &self,
        session: &mut Session,
        command: &Command,
        guard: &mut BusyGuard<'_>,
    ) -> Result<String, RtxError> {
        let timeout = command
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.timeout());
        let Some(transport) = session.transport.as_mut() else {
            return Err(RtxError::Connection("not connected".to_string()));
        };

        if session.desynced {
            let outcome = self.exchange(transport.as_mut(), "", timeout).await?;
            debug!("{} resynchronized at {:?}", self.device_addr, outcome.prompt.text);
            session.privilege = Privilege::from_prompt(outcome.prompt.kind);
            session.prompt = outcome.prompt.text.clone();
            session.desynced = false;
            guard.restore = session.privilege.ready_state();
            self.record(SessionEvent::Resynced {
                prompt: outcome.prompt.text,
            });
        }

        if requires_privilege(&command.payload) && session.privilege == Privilege::User {
            if !self.authenticator.has_admin_password() {
                return Err(RtxError::Permission(format!(
                    "'{}' needs administrator mode but no administrator password is configured",
                    command.key
                )));
            }
            session.desynced = true;
            let prompt = self.authenticator.escalate(transport.as_mut()).await?;
            session.desynced = false;
            session.privilege = Privilege::from_prompt(prompt.kind);
            session.prompt = prompt.text.clone();
            guard.restore = session.privilege.ready_state();
            self.record(SessionEvent::Escalated {
                prompt: prompt.text,
            });
        }

        let writes = !is_read_only(&command.payload);
        let mut outputs = Vec::new();
        let mut pages = 0;
        let mut failure = None;
        for line in command.lines() {
            let saves = SAVE_COMMAND.is_match(line.trim());
            if writes {
                self.invalidate_cache();
                if !saves && !is_read_only(line) {
                    self.cache.mark_unsaved();
                }
            }
            session.desynced = true;
            let outcome = self.exchange(transport.as_mut(), line, timeout).await;
            if writes {
                self.invalidate_cache();
            }
            let outcome = outcome?;
            session.desynced = false;
            session.privilege = Privilege::from_prompt(outcome.prompt.kind);
            session.prompt = outcome.prompt.text.clone();
            guard.restore = session.privilege.ready_state();
            pages += outcome.pages;

            let output = clean_output(strip_echo(&outcome.output, line));
            if let Some(err) = classify_output(&output) {
                failure = Some(err);
                outputs.push(output);
                break;
            }
            if saves {
                self.cache.mark_saved();
            }
            outputs.push(output);
        }

        let output = outputs.join("\n");
        // Configuration text is identified by its digest in SnapshotFetched.
        let recorded = if is_config_read(&command.payload) {
            String::new()
        } else {
            redact_secrets(&output)
        };
        self.record(SessionEvent::CommandOutput {
            key: command.key.clone(),
            command: redact_secrets(&command.payload),
            privilege: session.privilege,
            success: failure.is_none(),
            pages,
            output: recorded,
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(output),
        }
    }

    fn invalidate_cache(&self) {
        self.cache.invalidate();
        self.record(SessionEvent::CacheInvalidated {
            generation: self.cache.generation(),
        });
    }

    /// Ends the session. Safe to call more than once.
    pub async fn close(&self) -> Result<(), RtxError> {
        let mut session = self.session.lock().await;
        if !session.closed {
            self.shutdown(&mut session, "closed by caller").await;
        }
        Ok(())
    }

    async fn shutdown(&self, session: &mut Session, reason: &str) {
        if let Some(mut transport) = session.transport.take() {
            if transport.is_connected() {
                if session.privilege == Privilege::Administrator && !session.desynced {
                    if let Err(e) = self.authenticator.deescalate(transport.as_mut()).await {
                        debug!("{} leaving administrator mode failed: {}", self.device_addr, e);
                    }
                }
                let _ = transport.send("exit\r").await;
            }
            transport.close().await;
        }
        session.closed = true;
        session.privilege = Privilege::User;
        debug!("{} session closed: {}", self.device_addr, reason);
        self.record(SessionEvent::ConnectionClosed {
            reason: reason.to_string(),
        });
        self.set_state(SessionState::Closed);
    }
}

/// Strips redraw noise from every line and trailing blank lines.
fn clean_output(raw: &str) -> String {
    let lines: Vec<String> = raw
        .lines()
        .map(|line| clean_line(line).trim_end().to_string())
        .collect();
    let end = lines
        .iter()
        .rposition(|line| !line.is_empty())
        .map(|pos| pos + 1)
        .unwrap_or(0);
    lines[..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(connector: ScriptedConnector) -> (CommandRunner, Arc<ScriptedConnector>) {
        let mut config = ClientConfig::new("192.0.2.1", "admin", "login-pw")
            .with_admin_password("admin-pw");
        config.timeout_secs = 1;
        config.connect_timeout_secs = 2;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        let connector = Arc::new(connector);
        let runner = CommandRunner::new(config, connector.clone(), Arc::new(SnapshotCache::new()));
        (runner, connector)
    }

    fn escalation() -> [ScriptStep; 2] {
        [
            ScriptStep::new("administrator", ["administrator\r\nPassword: "]),
            ScriptStep::new("admin-pw", ["\r\n{prompt}"]).then_prompt("[RTX1210] # "),
        ]
    }

    #[test]
    fn clean_output_drops_noise_and_trailing_blanks() {
        assert_eq!(
            clean_output("\x1b[1mLAN1\x1b[0m up  \r\n\r  speed 1000\r\n\r\n"),
            "LAN1 up\n  speed 1000"
        );
        assert_eq!(clean_output(""), "");
    }

    #[tokio::test]
    async fn dial_sets_ascii_and_stays_in_user_mode() {
        let (runner, connector) = runner(ScriptedConnector::logged_in());
        runner.dial().await.expect("dial");
        assert_eq!(runner.state(), SessionState::Authenticated);
        assert_eq!(connector.sent(), vec!["console character en.ascii"]);
        runner.dial().await.expect("second dial is a no-op");
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn privileged_command_escalates_once() {
        let [admin, password] = escalation();
        let (runner, connector) = runner(
            ScriptedConnector::logged_in()
                .with_step(admin)
                .with_step(password)
                .with_step(ScriptStep::command("show config", "ip route default gateway pp 1\r\n").repeat()),
        );
        runner.dial().await.expect("dial");
        let out = runner
            .run(&Command::new("config", "show config"))
            .await
            .expect("run");
        assert_eq!(out, "ip route default gateway pp 1");
        assert_eq!(runner.state(), SessionState::Privileged);
        runner
            .run(&Command::new("config", "show config"))
            .await
            .expect("second run");
        assert_eq!(connector.sent_count("administrator"), 1);
    }

    #[tokio::test]
    async fn error_banner_is_not_retried() {
        let [admin, password] = escalation();
        let (runner, connector) = runner(
            ScriptedConnector::logged_in()
                .with_step(admin)
                .with_step(password)
                .with_step(
                    ScriptStep::command("ip route bogus", "Error: Invalid parameter\r\n").repeat(),
                ),
        );
        let err = match runner.run(&Command::new("route", "ip route bogus")).await {
            Ok(_) => panic!("banner must fail"),
            Err(e) => e,
        };
        assert!(matches!(err.root(), RtxError::CommandRejected(_)));
        assert!(matches!(err, RtxError::Command { attempts: 1, .. }));
        assert_eq!(connector.sent_count("ip route bogus"), 1);
        assert_eq!(runner.state(), SessionState::Privileged);
    }

    #[tokio::test]
    async fn multi_line_write_escalates_once() {
        let [admin, password] = escalation();
        let (runner, connector) = runner(
            ScriptedConnector::logged_in()
                .with_step(admin)
                .with_step(password),
        );
        runner.dial().await.expect("dial");
        runner
            .run(&Command::new(
                "route",
                "show status lan1\nip route 10.0.0.0/8 gateway 192.168.1.1",
            ))
            .await
            .expect("run");
        assert_eq!(connector.sent_count("administrator"), 1);
        let sent = connector.sent();
        let admin = sent.iter().position(|s| s == "administrator").expect("escalated");
        let route = sent
            .iter()
            .position(|s| s == "ip route 10.0.0.0/8 gateway 192.168.1.1")
            .expect("route sent");
        assert!(admin < route);
        assert_eq!(runner.state(), SessionState::Privileged);
    }

    #[tokio::test]
    async fn recorded_output_keeps_no_secrets() {
        let [admin, password] = escalation();
        let (runner, _) = runner(
            ScriptedConnector::logged_in()
                .with_step(admin)
                .with_step(password)
                .with_step(ScriptStep::command(
                    "show config",
                    "login password hunter2\r\nip route default gateway pp 1\r\n",
                ))
                .with_step(ScriptStep::command(
                    "show status lan1",
                    "LAN1 up\r\nPSK pre-shared-key s3cr3t\r\n",
                )),
        );
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        let runner = runner.with_recorder(recorder.clone());
        runner
            .run(&Command::new("config", "show config"))
            .await
            .expect("config");
        runner
            .run(&Command::new("lan1", "show status lan1"))
            .await
            .expect("status");
        runner
            .run(&Command::new("login", "login password hunter2"))
            .await
            .expect("login password");

        let jsonl = recorder.to_jsonl().expect("jsonl");
        assert!(!jsonl.contains("hunter2"), "{jsonl}");
        assert!(!jsonl.contains("s3cr3t"), "{jsonl}");
        assert!(!jsonl.contains("gateway pp 1"), "{jsonl}");
        assert!(jsonl.contains("LAN1 up"));
    }

    #[tokio::test]
    async fn save_settles_pending_writes() {
        let [admin, password] = escalation();
        let (runner, _) = runner(
            ScriptedConnector::logged_in()
                .with_step(admin)
                .with_step(password),
        );
        runner
            .run(&Command::new("route", "ip route 10.0.0.0/8 gateway 192.168.1.254"))
            .await
            .expect("write");
        assert!(runner.cache.has_unsaved_changes());
        runner
            .run(&Command::new("status", "show status lan1"))
            .await
            .expect("read");
        assert!(runner.cache.has_unsaved_changes());
        runner.run(&Command::new("save", "save")).await.expect("save");
        assert!(!runner.cache.has_unsaved_changes());
    }

    #[tokio::test]
    async fn writes_invalidate_the_cache() {
        let [admin, password] = escalation();
        let (runner, _) = runner(
            ScriptedConnector::logged_in()
                .with_step(admin)
                .with_step(password),
        );
        let before = runner.cache.generation();
        runner
            .run(&Command::new("status", "show status lan1"))
            .await
            .expect("read");
        assert_eq!(runner.cache.generation(), before);
        runner
            .run(&Command::new("route", "ip route 10.0.0.0/8 gateway 192.168.1.254"))
            .await
            .expect("write");
        assert!(runner.cache.generation() > before);
    }

    #[tokio::test]
    async fn lost_channel_reconnects() {
        let (runner, connector) = runner(
            ScriptedConnector::logged_in()
                .with_step(ScriptStep::new("show status lan1", ["show status lan1\r\n"]).then_hang_up()),
        );
        runner.dial().await.expect("dial");
        let out = runner
            .run(&Command::new("status", "show status lan1"))
            .await
            .expect("retried run");
        assert_eq!(out, "");
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(runner.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn close_leaves_admin_mode_and_is_idempotent() {
        let [admin, password] = escalation();
        let (runner, connector) = runner(
            ScriptedConnector::logged_in()
                .with_step(admin)
                .with_step(password)
                .with_step(
                    ScriptStep::new("exit", ["exit\r\nSave new configuration ? (Y/N)"])
                        .then_prompt("[RTX1210] > "),
                )
                .with_step(ScriptStep::new("N", ["N\r\n{prompt}"])),
        );
        runner
            .run(&Command::new("config", "show config"))
            .await
            .expect("run");
        runner.close().await.expect("close");
        runner.close().await.expect("close again");
        assert_eq!(runner.state(), SessionState::Closed);
        let sent = connector.sent();
        assert_eq!(&sent[sent.len() - 3..], &["exit", "N", "exit"]);

        let err = match runner.run(&Command::new("status", "show status lan1")).await {
            Ok(_) => panic!("closed session must refuse"),
            Err(e) => e,
        };
        assert!(matches!(err.root(), RtxError::SessionClosed));
    }

    #[tokio::test]
    async fn missing_admin_password_is_permission_error() {
        let mut config = ClientConfig::new("192.0.2.1", "admin", "login-pw");
        config.timeout_secs = 1;
        let runner = CommandRunner::new(
            config,
            Arc::new(ScriptedConnector::logged_in()),
            Arc::new(SnapshotCache::new()),
        );
        let err = match runner.run(&Command::new("save", "save")).await {
            Ok(_) => panic!("save needs administrator"),
            Err(e) => e,
        };
        assert!(matches!(err.root(), RtxError::Permission(_)));
        assert_eq!(runner.state(), SessionState::Authenticated);
    }
}
