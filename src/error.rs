//! Error types for the RTX session engine and configuration snapshots.
//!
//! Every failure the engine surfaces is an [`RtxError`]. Callers never match on
//! error text: [`RtxError::class`] is the single place where a failure is sorted
//! into transient (retry), fatal (surface immediately) or not-found (the entity is
//! absent on the router, which is not an engine failure).

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Coarse classification that drives retry and caller behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection reset, timeout or a transient "busy" banner. Safe to retry.
    Transient,
    /// Permanent rejection. Retrying would only mask a real problem.
    Fatal,
    /// The queried entity does not exist on the router.
    NotFound,
}

/// Errors that can occur while talking to an RTX router.
#[derive(Error, Debug)]
pub enum RtxError {
    /// The remote channel could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Login or administrator credentials were rejected.
    ///
    /// The session is closed when this is returned and nothing is retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// No recognized prompt arrived before the deadline.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("command timeout: {0}")]
    CommandTimeout(String),

    /// The queried entity does not exist on the router.
    #[error("not found: {0}")]
    NotFound(String),

    /// A configuration snapshot section is structurally malformed.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Privilege escalation is unavailable or the router denied the command.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The router rejected the command with an error banner.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// The router reported a transient busy condition.
    #[error("router busy: {0}")]
    Busy(String),

    /// The session was closed by the caller or after a fatal error.
    #[error("session closed")]
    SessionClosed,

    /// The client configuration is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The session recording could not be read or written.
    #[error("recording error: {0}")]
    Recording(String),

    /// A command failed; carries the command key and how often it was tried.
    #[error("command '{key}' failed after {attempts} attempt(s): {source}")]
    Command {
        key: String,
        attempts: u32,
        #[source]
        source: Box<RtxError>,
    },

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// An error occurred in the SFTP subsystem.
    #[error("sftp error: {0}")]
    SftpError(#[from] russh_sftp::client::error::Error),

    /// Local I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to send data through the shell channel.
    #[error("failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

impl RtxError {
    /// Classifies the error for retry and caller handling.
    pub fn class(&self) -> ErrorClass {
        match self {
            RtxError::Connection(_)
            | RtxError::CommandTimeout(_)
            | RtxError::Busy(_)
            | RtxError::Ssh2Error(_)
            | RtxError::RusshError(_)
            | RtxError::Io(_)
            | RtxError::SendDataError(_) => ErrorClass::Transient,
            RtxError::NotFound(_) => ErrorClass::NotFound,
            RtxError::Command { source, .. } => source.class(),
            RtxError::Authentication(_)
            | RtxError::Parse { .. }
            | RtxError::Permission(_)
            | RtxError::CommandRejected(_)
            | RtxError::SessionClosed
            | RtxError::InvalidConfig(_)
            | RtxError::Recording(_)
            | RtxError::SftpError(_) => ErrorClass::Fatal,
        }
    }

    /// Returns true when the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns true when the entity is absent on the router.
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Unwraps command context and returns the underlying error.
    pub fn root(&self) -> &RtxError {
        match self {
            RtxError::Command { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        RtxError::Parse {
            line,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes_are_retryable() {
        assert!(RtxError::Connection("reset".to_string()).is_transient());
        assert!(RtxError::CommandTimeout(String::new()).is_transient());
        assert!(RtxError::Busy("another user".to_string()).is_transient());
    }

    #[test]
    fn rejections_are_fatal() {
        assert_eq!(
            RtxError::Authentication("bad".to_string()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            RtxError::Permission("denied".to_string()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            RtxError::CommandRejected("Invalid parameter".to_string()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(RtxError::parse(3, "bad id").class(), ErrorClass::Fatal);
    }

    #[test]
    fn command_context_delegates_to_source() {
        let err = RtxError::Command {
            key: "show-config".to_string(),
            attempts: 3,
            source: Box::new(RtxError::NotFound("route".to_string())),
        };
        assert!(err.is_not_found());
        assert!(matches!(err.root(), RtxError::NotFound(_)));
        assert!(err.to_string().contains("show-config"));
        assert!(err.to_string().contains("3 attempt"));
    }
}
