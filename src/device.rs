//! RTX command-line dialect.
//!
//! This module knows how a Yamaha RTX router talks: what its prompts look like,
//! which lines are error banners, which commands need administrator mode and
//! which ones leave the configuration untouched. Everything here is pure and
//! synchronous; the session layer drives it.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::RtxError;

/// Strips the leading NULs, carriage returns and backspaces the router uses to
/// redraw a line (for example after erasing a pagination prompt).
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[\x00\r]|\x08+\s*\x08*|[ \t]+\r)+").expect("static regex"));

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b[()][A-Z0-9]").expect("static regex"));

/// Kind of prompt recognized at the end of the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// `Login:` prompt of a console-style login.
    Login,
    /// `Password:` prompt, used both at login and after `administrator`.
    Password,
    /// "Save configuration? (Y/N)" asked when leaving administrator mode.
    SaveConfirm,
    /// Pagination prompt. More output follows once a key is sent.
    More,
    /// Administrator-mode command prompt (`#`).
    Privileged,
    /// User-mode command prompt (`>`).
    User,
}

impl PromptKind {
    /// Prompts after which the router accepts a new command line.
    pub fn is_command_prompt(self) -> bool {
        matches!(self, PromptKind::User | PromptKind::Privileged)
    }

    /// Keystroke sent automatically when this prompt appears mid-command.
    pub fn auto_response(self) -> Option<&'static str> {
        match self {
            PromptKind::More => Some(" "),
            _ => None,
        }
    }
}

/// A prompt found at the tail of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMatch {
    pub kind: PromptKind,
    /// Byte offset in the buffer where the prompt line starts.
    pub start: usize,
    /// Length of the prompt line in bytes, from `start` to the end of the buffer.
    pub matched_len: usize,
    /// Router name captured from a command prompt, if any.
    pub hostname: Option<String>,
    /// The prompt text with redraw noise removed.
    pub text: String,
}

/// Ordered set of prompt matchers. The first pattern that matches wins.
pub struct PromptDetector {
    all_regex: RegexSet,
    regexes: Vec<Regex>,
    kinds: Vec<PromptKind>,
}

const DEFAULT_PROMPTS: &[(PromptKind, &str)] = &[
    (PromptKind::More, r"-{2,}\s*(?i:more|つづく)\s*-{2,}\s*$"),
    (PromptKind::SaveConfirm, r".*\(\s*Y\s*/\s*N\s*\)\s*[:?]?\s*$"),
    (PromptKind::Login, r"(?i:login|username)\s*:\s*$"),
    (PromptKind::Password, r"(?i:password)\s*:\s*$"),
    (
        PromptKind::Privileged,
        r"(?:\[(?P<host>[^\]\s]+)\]\s?|(?P<bare>[A-Za-z0-9_.\-]+)\s?)?#\s*$",
    ),
    (
        PromptKind::User,
        r"(?:\[(?P<host>[^\]\s]+)\]\s?|(?P<bare>[A-Za-z0-9_.\-]+)\s?)?>\s*$",
    ),
];

impl Default for PromptDetector {
    fn default() -> Self {
        Self::rtx()
    }
}

impl PromptDetector {
    /// Detector for stock RTX prompts such as `[RTX1210] > ` and `[RTX1210] # `.
    pub fn rtx() -> Self {
        Self::new(DEFAULT_PROMPTS.iter().map(|(k, p)| (*k, p.to_string())))
            .expect("default prompt table compiles")
    }

    /// Builds a detector from `(kind, pattern)` pairs in priority order.
    ///
    /// Patterns are anchored to the start of the last line; redraw noise in
    /// front of the prompt is tolerated.
    pub fn new<I>(patterns: I) -> Result<Self, RtxError>
    where
        I: IntoIterator<Item = (PromptKind, String)>,
    {
        let mut kinds = Vec::new();
        let mut sources = Vec::new();
        for (kind, pattern) in patterns {
            kinds.push(kind);
            sources.push(format!(
                r"^[\x00\r]*{}",
                pattern.trim_start_matches('^')
            ));
        }
        let all_regex = RegexSet::new(&sources)
            .map_err(|e| RtxError::InvalidConfig(format!("invalid prompt pattern set: {e}")))?;
        let regexes = sources
            .iter()
            .map(|s| Regex::new(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RtxError::InvalidConfig(format!("invalid prompt pattern: {e}")))?;
        Ok(Self {
            all_regex,
            regexes,
            kinds,
        })
    }

    /// Looks for a prompt on the last (unterminated) line of `buffer`.
    ///
    /// Returns `None` while output is still arriving. A complete line, such as
    /// the echo of the submitted command, is never treated as a prompt.
    pub fn detect(&self, buffer: &str) -> Option<PromptMatch> {
        let start = buffer.rfind('\n').map(|pos| pos + 1).unwrap_or(0);
        let tail = &buffer[start..];
        if tail.trim().is_empty() {
            return None;
        }
        let cleaned = clean_line(tail);
        let index = self.all_regex.matches(&cleaned).into_iter().next()?;
        let kind = *self.kinds.get(index)?;
        let hostname = self.regexes.get(index).and_then(|re| {
            re.captures(&cleaned).and_then(|caps| {
                caps.name("host")
                    .or_else(|| caps.name("bare"))
                    .map(|m| m.as_str().to_string())
            })
        });
        Some(PromptMatch {
            kind,
            start,
            matched_len: buffer.len() - start,
            hostname,
            text: cleaned.trim().to_string(),
        })
    }
}

/// Removes redraw noise and ANSI escapes from one line of router output.
pub fn clean_line(line: &str) -> String {
    let line = IGNORE_START_LINE.replace(line, "");
    ANSI_ESCAPE.replace_all(&line, "").into_owned()
}

/// Drops the echoed command line from the start of `output`.
///
/// The router echoes what was typed, possibly with a trailing `\r`. Only the
/// first non-empty line is considered. An empty payload echoes as a blank line.
pub fn strip_echo<'a>(output: &'a str, payload: &str) -> &'a str {
    let payload = payload.trim();
    let trimmed = output.trim_start_matches(['\r', '\n']);
    if payload.is_empty() {
        return trimmed;
    }
    let (first, rest) = match trimmed.find('\n') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => (trimmed, ""),
    };
    let first = clean_line(first);
    let first = first.trim_end();
    if first.ends_with(payload) {
        rest
    } else {
        output
    }
}

static ERROR_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:%\s*)?(?:error|エラー)\s*:\s*(.*)$|^\s*(command failed:.*|invalid parameter.*|permission denied.*|.*already exists.*)$",
    )
    .expect("static regex")
});

static NOT_FOUND_BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)not\s+found|見つかりません").expect("static regex"));

static PERMISSION_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)permission denied|administrator privilege|権限がありません")
        .expect("static regex")
});

static BUSY_BANNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbusy\b|another user|in use by|しばらくしてから").expect("static regex")
});

/// Inspects command output for an error banner.
///
/// Returns the classified error for the first banner line, or `None` when the
/// command succeeded.
pub fn classify_output(output: &str) -> Option<RtxError> {
    for line in output.lines() {
        let line = clean_line(line);
        let Some(caps) = ERROR_BANNER.captures(&line) else {
            continue;
        };
        let message = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim())
            .filter(|m| !m.is_empty())
            .unwrap_or(line.trim())
            .to_string();
        if NOT_FOUND_BANNER.is_match(&line) {
            return Some(RtxError::NotFound(message));
        }
        if PERMISSION_BANNER.is_match(&line) {
            return Some(RtxError::Permission(message));
        }
        if BUSY_BANNER.is_match(&line) {
            return Some(RtxError::Busy(message));
        }
        return Some(RtxError::CommandRejected(message));
    }
    None
}

/// Returns true when `output` contains an authentication failure banner.
pub fn is_auth_failure(output: &str) -> bool {
    static AUTH_FAILURE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)incorrect|failed|invalid|denied|パスワードが違います")
            .expect("static regex")
    });
    AUTH_FAILURE.is_match(output)
}

static PRIVILEGED_COMMANDS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"^show\s+config",
        r"^show\s+environment",
        r"^less\s+config",
        r"^save\b",
        r"^no\s+",
        r"^ip\s+",
        r"^ipv6\s+",
        r"^dhcp\s+",
        r"^dns\s+",
        r"^nat\s+",
        r"^ethernet\s+",
        r"^bridge\s+",
        r"^(?:tunnel|pp)\s+",
        r"^(?:ipsec|l2tp|pppoe|ppp)\s+",
        r"^(?:administrator|login)\s+",
        r"^user\s+attribute",
        r"^syslog\s+",
        r"^(?:httpd|sshd|sftpd|telnetd)\s+",
        r"^(?:timezone|console\s+prompt|description)\s+",
        r"^(?:snmp|bgp|ospf|schedule)\s+",
    ])
    .expect("static regex set")
});

static READ_ONLY_COMMANDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:show|less|ping6?|traceroute6?|console\s+(?:character|lines|columns)|help)\b|^$")
        .expect("static regex")
});

/// Whether any line of the command must run in administrator mode.
pub fn requires_privilege(payload: &str) -> bool {
    payload
        .lines()
        .any(|line| PRIVILEGED_COMMANDS.is_match(line.trim()))
}

/// Whether the command leaves the router configuration untouched.
pub fn is_read_only(payload: &str) -> bool {
    payload
        .lines()
        .all(|line| READ_ONLY_COMMANDS.is_match(line.trim()))
}

static CONFIG_READ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:show|less)\s+config\b").expect("static regex"));

static SECRET_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)password|pre-shared-key|secret|community|token|key|credential")
        .expect("static regex")
});

/// Placeholder for a line that carried a secret.
pub const REDACTED: &str = "[REDACTED]";

/// Whether the command prints (part of) the configuration.
pub fn is_config_read(payload: &str) -> bool {
    payload
        .lines()
        .any(|line| CONFIG_READ.is_match(line.trim()))
}

/// Replaces every line mentioning a password, key or community string with
/// [`REDACTED`].
pub fn redact_secrets(text: &str) -> String {
    text.lines()
        .map(|line| {
            if SECRET_WORDS.is_match(line) {
                REDACTED
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_privileged_prompts_are_classified() {
        let detector = PromptDetector::rtx();

        let m = detector.detect("\r\n[RTX1210] > ").expect("user prompt");
        assert_eq!(m.kind, PromptKind::User);
        assert_eq!(m.hostname.as_deref(), Some("RTX1210"));

        let m = detector.detect("output\r\n[RTX1210] # ").expect("admin prompt");
        assert_eq!(m.kind, PromptKind::Privileged);
        assert_eq!(m.text, "[RTX1210] #");
    }

    #[test]
    fn hostname_is_structural() {
        let detector = PromptDetector::rtx();
        for (buffer, kind) in [
            ("> ", PromptKind::User),
            ("# ", PromptKind::Privileged),
            ("[branch-office.01] # ", PromptKind::Privileged),
            ("rtx830> ", PromptKind::User),
            ("[RTX] >", PromptKind::User),
        ] {
            let m = detector.detect(buffer).expect(buffer);
            assert_eq!(m.kind, kind, "{buffer:?}");
        }
    }

    #[test]
    fn echoed_command_is_not_a_prompt() {
        let detector = PromptDetector::rtx();
        assert!(detector.detect("show config\r\n").is_none());
        assert!(detector.detect("show config").is_none());
        assert!(detector.detect("ip filter 1 pass * * tcp > ").is_none());
        assert!(detector.detect("[RTX1210] # show ip route\r\n").is_none());
        assert!(detector.detect("[RTX1210] # show ip route").is_none());
    }

    #[test]
    fn mid_output_lines_are_not_prompts() {
        let detector = PromptDetector::rtx();
        assert!(detector.detect("ip lan1 address 192.168.1.1/24\r\n").is_none());
        assert!(detector.detect("partial line with # inside").is_none());
        assert!(detector.detect("").is_none());
        assert!(detector.detect("\r\n").is_none());
    }

    #[test]
    fn pagination_is_distinct_from_end_of_output() {
        let detector = PromptDetector::rtx();
        let m = detector.detect("line 1\r\nline 2\r\n---More---").expect("more");
        assert_eq!(m.kind, PromptKind::More);
        assert_eq!(m.kind.auto_response(), Some(" "));
        assert!(!m.kind.is_command_prompt());
        assert_eq!(m.matched_len, "---More---".len());

        let m = detector.detect("--- つづく ---").expect("ja more");
        assert_eq!(m.kind, PromptKind::More);
    }

    #[test]
    fn login_password_and_save_prompts() {
        let detector = PromptDetector::rtx();
        assert_eq!(
            detector.detect("\r\nLogin: ").map(|m| m.kind),
            Some(PromptKind::Login)
        );
        assert_eq!(
            detector.detect("administrator\r\nPassword: ").map(|m| m.kind),
            Some(PromptKind::Password)
        );
        assert_eq!(
            detector
                .detect("Save new configuration ? (Y/N)")
                .map(|m| m.kind),
            Some(PromptKind::SaveConfirm)
        );
    }

    #[test]
    fn redraw_noise_before_prompt_is_ignored() {
        let detector = PromptDetector::rtx();
        let m = detector
            .detect("\r\x08\x08\x08   \x08\x08\x08[RTX1210] # ")
            .expect("prompt after redraw");
        assert_eq!(m.kind, PromptKind::Privileged);
    }

    #[test]
    fn custom_patterns_are_supported() {
        let detector =
            PromptDetector::new([(PromptKind::User, r"lab-rtx\$\s*$".to_string())]).expect("build");
        assert_eq!(
            detector.detect("lab-rtx$ ").map(|m| m.kind),
            Some(PromptKind::User)
        );
        assert!(PromptDetector::new([(PromptKind::User, "(".to_string())]).is_err());
    }

    #[test]
    fn strip_echo_removes_only_the_command_line() {
        assert_eq!(
            strip_echo("show ip route\r\nroute table\r\n", "show ip route"),
            "route table\r\n"
        );
        assert_eq!(strip_echo("unrelated\r\n", "show ip route"), "unrelated\r\n");
        assert_eq!(strip_echo("\r\n[RTX] # ", ""), "[RTX] # ");
    }

    #[test]
    fn error_banners_are_classified() {
        assert!(classify_output("ip route 10.0.0.0/8 gateway 192.168.1.1\r\n").is_none());
        assert!(matches!(
            classify_output("Error: Invalid command name\r\n"),
            Some(RtxError::CommandRejected(_))
        ));
        assert!(matches!(
            classify_output("Error: Entry not found\r\n"),
            Some(RtxError::NotFound(_))
        ));
        assert!(matches!(
            classify_output("Permission denied\r\n"),
            Some(RtxError::Permission(_))
        ));
        assert!(matches!(
            classify_output("Error: Another user is changing configuration\r\n"),
            Some(RtxError::Busy(_))
        ));
        assert!(matches!(
            classify_output("% Error: Invalid parameter\r\n"),
            Some(RtxError::CommandRejected(_))
        ));
    }

    #[test]
    fn privilege_and_read_only_tables() {
        assert!(requires_privilege("show config"));
        assert!(requires_privilege("ip route default gateway pp 1"));
        assert!(requires_privilege("no dhcp scope bind 1 192.168.1.10"));
        assert!(!requires_privilege("show status lan1"));
        assert!(!requires_privilege("console character en.ascii"));

        assert!(is_read_only("show config"));
        assert!(is_read_only("console character en.ascii"));
        assert!(is_read_only(""));
        assert!(!is_read_only("ip route default gateway pp 1"));
        assert!(!is_read_only("show config\nsave"));
    }

    #[test]
    fn any_privileged_line_needs_administrator_mode() {
        let payload = "show status lan1\nip route 10.0.0.0/8 gateway 192.168.1.1";
        assert!(requires_privilege(payload));
        assert!(!is_read_only(payload));
        assert!(!requires_privilege("show status lan1\n  show status lan2"));
    }

    #[test]
    fn secrets_are_redacted_line_by_line() {
        let raw = "ip lan1 address 192.168.100.1/24\n\
                   login password hunter2\n\
                   administrator password admin-pw\n\
                   ipsec ike pre-shared-key 1 text s3cr3t\n\
                   dns server 8.8.8.8";
        let redacted = redact_secrets(raw);
        assert_eq!(
            redacted,
            "ip lan1 address 192.168.100.1/24\n[REDACTED]\n[REDACTED]\n[REDACTED]\ndns server 8.8.8.8"
        );
        assert!(!redacted.contains("hunter2"));
        assert_eq!(redact_secrets("show status lan1"), "show status lan1");
    }

    #[test]
    fn config_reads_are_recognized() {
        assert!(is_config_read("show config"));
        assert!(is_config_read("show config | grep \"dns \""));
        assert!(is_config_read("less config"));
        assert!(!is_config_read("show configuration-status"));
        assert!(!is_config_read("show status lan1"));
    }
}
