use super::*;
use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_PROMPT: &str = "[RTX1210] > ";

/// One scripted exchange: when the engine sends `expect`, reply with `replies`.
///
/// Replies may contain `{prompt}`, replaced by the router's current prompt
/// after [`ScriptStep::then_prompt`] has been applied. A step is used once
/// unless marked [`ScriptStep::repeat`]. A step without replies simulates a
/// router that never answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub expect: String,
    pub replies: Vec<String>,
    pub repeat: bool,
    pub prompt: Option<String>,
    pub hang_up: bool,
}

impl ScriptStep {
    pub fn new<I, S>(expect: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expect: expect.into(),
            replies: replies.into_iter().map(Into::into).collect(),
            repeat: false,
            prompt: None,
            hang_up: false,
        }
    }

    /// A command that echoes, prints `output` and returns to the prompt.
    pub fn command(line: &str, output: &str) -> Self {
        Self::new(line, [format!("{line}\r\n{output}{{prompt}}")])
    }

    /// A command that never produces a prompt.
    pub fn silent(line: &str) -> Self {
        Self::new(line, Vec::<String>::new())
    }

    pub fn repeat(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Prompt the router shows from this step on.
    pub fn then_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Close the channel after the replies are read.
    pub fn then_hang_up(mut self) -> Self {
        self.hang_up = true;
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    steps: Vec<(ScriptStep, bool)>,
    sent: Vec<String>,
}

impl Script {
    fn take(&mut self, line: &str) -> Option<ScriptStep> {
        let (step, used) = self
            .steps
            .iter_mut()
            .find(|(step, used)| step.expect == line && (step.repeat || !*used))?;
        *used = true;
        Some(step.clone())
    }
}

/// In-memory router shell driven by a script.
///
/// Lines the script does not mention are echoed and answered with the current
/// prompt, like a router accepting a command silently.
pub struct ScriptedTransport {
    script: Arc<StdMutex<Script>>,
    queue: VecDeque<String>,
    prompt: String,
    closed: bool,
}

impl ScriptedTransport {
    /// A transport whose first output is `greeting`.
    pub fn new(greeting: &str) -> Self {
        Self::with_script(
            Arc::new(StdMutex::new(Script::default())),
            greeting,
            DEFAULT_PROMPT,
        )
    }

    fn with_script(script: Arc<StdMutex<Script>>, greeting: &str, prompt: &str) -> Self {
        let mut transport = Self {
            script,
            queue: VecDeque::new(),
            prompt: prompt.to_string(),
            closed: false,
        };
        if !greeting.is_empty() {
            let greeting = transport.render(greeting);
            transport.queue.push_back(greeting);
        }
        transport
    }

    pub fn with_step(self, step: ScriptStep) -> Self {
        lock(&self.script).steps.push((step, false));
        self
    }

    /// Queues output as if the router printed it unprompted.
    pub fn push_output(&mut self, chunk: &str) {
        let chunk = self.render(chunk);
        self.queue.push_back(chunk);
    }

    /// Closes the channel once queued output is drained.
    pub fn hang_up(&mut self) {
        self.closed = true;
    }

    /// Everything the engine sent, one entry per write.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.script).sent.clone()
    }

    fn render(&self, text: &str) -> String {
        text.replace("{prompt}", &self.prompt)
    }
}

fn lock(script: &StdMutex<Script>) -> std::sync::MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, data: &str) -> Result<(), RtxError> {
        if self.closed {
            return Err(RtxError::Connection("scripted channel closed".to_string()));
        }
        let line = data.trim_end_matches(['\r', '\n']);
        let step = {
            let mut script = lock(&self.script);
            script.sent.push(line.to_string());
            script.take(line)
        };
        match step {
            Some(step) => {
                if let Some(prompt) = step.prompt {
                    self.prompt = prompt;
                }
                for reply in &step.replies {
                    let reply = self.render(reply);
                    self.queue.push_back(reply);
                }
                if step.hang_up {
                    self.closed = true;
                }
            }
            // Pagination keys are not echoed.
            None if line == " " => {}
            None => {
                let reply = format!("{line}\r\n{}", self.prompt);
                self.queue.push_back(reply);
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<String> {
        if let Some(chunk) = self.queue.pop_front() {
            return Some(chunk);
        }
        if self.closed {
            return None;
        }
        std::future::pending().await
    }

    fn discard_pending(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    fn is_connected(&self) -> bool {
        !self.closed || !self.queue.is_empty()
    }

    async fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
    }
}

/// Hands out [`ScriptedTransport`]s that share one script and sent log.
///
/// Steps consumed on one connection stay consumed on the next, so a script can
/// describe a failure followed by a successful retry.
pub struct ScriptedConnector {
    script: Arc<StdMutex<Script>>,
    greeting: String,
    prompt: String,
    connects: AtomicUsize,
    failures: AtomicUsize,
}

impl ScriptedConnector {
    /// Connections start by printing `greeting` (which may use `{prompt}`).
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            script: Arc::new(StdMutex::new(Script::default())),
            greeting: greeting.into(),
            prompt: DEFAULT_PROMPT.to_string(),
            connects: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// A router that logs the SSH user straight into user mode.
    pub fn logged_in() -> Self {
        Self::new("\r\nRTX1210 Rev.14.01.42 (Fri Jan 12 10:00:00 2024)\r\n{prompt}")
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_step(self, step: ScriptStep) -> Self {
        lock(&self.script).steps.push((step, false));
        self
    }

    /// The next `count` connection attempts fail with a connection error.
    pub fn fail_connects(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Connection attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.script).sent.clone()
    }

    /// How often `line` was sent.
    pub fn sent_count(&self, line: &str) -> usize {
        lock(&self.script).sent.iter().filter(|s| *s == line).count()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, config: &ClientConfig) -> Result<Box<dyn Transport>, RtxError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(RtxError::Connection(format!(
                "{}: connection refused",
                config.device_addr()
            )));
        }
        Ok(Box::new(ScriptedTransport::with_script(
            self.script.clone(),
            &self.greeting,
            &self.prompt,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_lines_echo_and_prompt() {
        let mut transport = ScriptedTransport::new("{prompt}");
        assert_eq!(transport.recv().await.as_deref(), Some("[RTX1210] > "));
        transport.send("show status lan1\r").await.expect("send");
        assert_eq!(
            transport.recv().await.as_deref(),
            Some("show status lan1\r\n[RTX1210] > ")
        );
        assert_eq!(transport.sent(), vec!["show status lan1"]);
    }

    #[tokio::test]
    async fn steps_switch_prompt_and_hang_up() {
        let mut transport = ScriptedTransport::new("")
            .with_step(ScriptStep::new("secret", ["\r\n{prompt}"]).then_prompt("[RTX1210] # "))
            .with_step(ScriptStep::new("exit", ["exit\r\n"]).then_hang_up());
        transport.send("secret\r").await.expect("send");
        assert_eq!(transport.recv().await.as_deref(), Some("\r\n[RTX1210] # "));
        transport.send("exit\r").await.expect("send");
        assert_eq!(transport.recv().await.as_deref(), Some("exit\r\n"));
        assert_eq!(transport.recv().await, None);
        assert!(!transport.is_connected());
        assert!(transport.send("show\r").await.is_err());
    }

    #[tokio::test]
    async fn connector_shares_script_across_connections() {
        let connector = ScriptedConnector::logged_in()
            .fail_connects(1)
            .with_step(ScriptStep::command("show environment", "uptime\r\n"));
        let config = ClientConfig::new("192.0.2.1", "admin", "pw");

        assert!(connector.connect(&config).await.is_err());
        let mut first = connector.connect(&config).await.expect("connect");
        first.send("show environment\r").await.expect("send");
        let mut second = connector.connect(&config).await.expect("connect");
        second.discard_pending();
        second.send("show environment\r").await.expect("send");
        assert_eq!(
            second.recv().await.as_deref(),
            Some("show environment\r\n[RTX1210] > ")
        );
        assert_eq!(connector.connect_count(), 3);
        assert_eq!(connector.sent_count("show environment"), 2);
    }
}
