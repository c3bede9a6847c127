//! Interactive session with one RTX router.
//!
//! The router exposes a single prompt-driven shell. This module turns it into a
//! serialized request/response channel: a [`Transport`] carries bytes, the
//! [`Authenticator`] drives login and the `administrator` handshake, and the
//! [`CommandRunner`] submits one [`Command`] at a time, waits for the next stable
//! prompt and classifies the output.
//!
//! # Main Components
//!
//! - [`CommandRunner`] - Session gate, state machine, retry and resync
//! - [`Authenticator`] - Login and privilege escalation handshakes
//! - [`Transport`] / [`Connector`] - Byte channel and how to open one
//! - [`SshConnector`] - Production transport over an SSH shell channel
//! - [`ScriptedConnector`] - In-memory router double for tests
//! - [`SessionRecorder`] - Optional JSONL event log of a session

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace, warn};
use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};

use crate::config::{self, ClientConfig, PrivilegePolicy};
use crate::device::{
    PromptDetector, PromptKind, PromptMatch, classify_output, clean_line, is_auth_failure,
    is_config_read, is_read_only, redact_secrets, requires_privilege, strip_echo,
};
use crate::error::RtxError;
use crate::snapshot::SnapshotCache;

mod auth;
mod expect;
mod recording;
mod replay;
mod runner;
mod security;
mod transport;

pub use auth::{AuthStep, Authenticator};
pub use recording::{SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder};
pub use replay::{ScriptStep, ScriptedConnector, ScriptedTransport};
pub use runner::CommandRunner;
pub use security::{ConnectionSecurityOptions, HostKeyPolicy, SecurityLevel};
pub use transport::{Connector, SshConnector, SshTransport, Transport};

pub(crate) use expect::read_until;
pub(crate) use transport::open_client;

/// Lifecycle of a session.
///
/// Only the transitions in [`SessionState::can_transition_to`] are applied;
/// anything else is logged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Logged in, user mode.
    Authenticated,
    /// Logged in, administrator mode.
    Privileged,
    /// A command is in flight.
    Busy,
    /// Closed by the caller or after an authentication failure. Terminal.
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Authenticated | Privileged | Disconnected) => true,
            (Authenticated | Privileged, Busy | Disconnected | Connecting) => true,
            (Authenticated, Privileged) | (Privileged, Authenticated) => true,
            (Busy, Authenticated | Privileged | Disconnected | Connecting) => true,
            _ => false,
        }
    }

    /// Whether a command may be submitted in this state.
    pub fn is_ready(self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Privileged)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::Privileged => "privileged",
            SessionState::Busy => "busy",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Current command mode of the router shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    #[default]
    User,
    Administrator,
}

impl Privilege {
    fn from_prompt(kind: PromptKind) -> Self {
        match kind {
            PromptKind::Privileged => Privilege::Administrator,
            _ => Privilege::User,
        }
    }

    fn ready_state(self) -> SessionState {
        match self {
            Privilege::User => SessionState::Authenticated,
            Privilege::Administrator => SessionState::Privileged,
        }
    }
}

/// One unit of work for the router.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Command {
    /// Identifier used in logs and error context.
    pub key: String,
    /// Text submitted to the shell. Several lines are sent one at a time.
    pub payload: String,
    /// Overrides the configured per-command timeout, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Command {
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Non-empty payload lines, trimmed.
    fn lines(&self) -> Vec<&str> {
        let lines: Vec<&str> = self
            .payload
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() { vec![""] } else { lines }
    }
}
