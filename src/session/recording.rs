use super::*;
use std::sync::Mutex as StdMutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record events but drop command output text.
    KeyEventsOnly,
    /// Record events with command output.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
        prompt: String,
        privilege: Privilege,
    },
    ConnectionClosed {
        reason: String,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Retry {
        key: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// Lines mentioning a secret are redacted and configuration reads keep
    /// no output.
    CommandOutput {
        key: String,
        command: String,
        privilege: Privilege,
        success: bool,
        #[serde(default)]
        pages: usize,
        #[serde(default)]
        output: String,
    },
    Escalated {
        prompt: String,
    },
    Resynced {
        prompt: String,
    },
    /// Snapshot text is never recorded, only its size and digest.
    SnapshotFetched {
        source: String,
        digest: String,
        bytes: usize,
    },
    CacheInvalidated {
        generation: u64,
    },
}

/// In-memory session recorder.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<StdMutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record an event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), RtxError> {
        let event = match (self.level, event) {
            (SessionRecordLevel::Off, _) => return Ok(()),
            (SessionRecordLevel::KeyEventsOnly, SessionEvent::CommandOutput {
                key,
                command,
                privilege,
                success,
                pages,
                ..
            }) => SessionEvent::CommandOutput {
                key,
                command,
                privilege,
                success,
                pages,
                output: String::new(),
            },
            (_, event) => event,
        };
        self.lock()?.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, RtxError> {
        Ok(self.lock()?.clone())
    }

    /// Recorded events without timestamps, in order.
    pub fn events(&self) -> Result<Vec<SessionEvent>, RtxError> {
        Ok(self.entries()?.into_iter().map(|e| e.event).collect())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), RtxError> {
        self.lock()?.clear();
        Ok(())
    }

    /// One JSON object per line, oldest first.
    pub fn to_jsonl(&self) -> Result<String, RtxError> {
        let lines = self
            .lock()?
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RtxError::Recording(format!("cannot encode entry: {e}")))?;
        Ok(lines.join("\n"))
    }

    /// Loads a recording written by [`SessionRecorder::to_jsonl`]. Blank lines
    /// are ignored.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, RtxError> {
        let entries = jsonl
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str::<SessionRecordEntry>(line).map_err(|e| {
                    RtxError::Recording(format!("line {}: cannot decode entry: {e}", index + 1))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(StdMutex::new(entries)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<SessionRecordEntry>>, RtxError> {
        self.entries
            .lock()
            .map_err(|e| RtxError::Recording(format!("recorder poisoned: {e}")))
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{"ts_ms":1,"event":{"kind":"connection_established","device_addr":"admin@192.0.2.1:22","prompt":"[RTX1210] >","privilege":"user"}}
{"ts_ms":2,"event":{"kind":"state_changed","from":"authenticated","to":"busy"}}
{"ts_ms":3,"event":{"kind":"command_output","key":"status","command":"show status lan1","privilege":"user","success":true,"output":"LAN1 up"}}
"#;

    fn output_event(output: &str) -> SessionEvent {
        SessionEvent::CommandOutput {
            key: "route".to_string(),
            command: "show ip route".to_string(),
            privilege: Privilege::User,
            success: true,
            pages: 2,
            output: output.to_string(),
        }
    }

    #[test]
    fn recorder_jsonl_roundtrip() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::CacheInvalidated { generation: 3 })
            .expect("record invalidation");

        let jsonl = recorder.to_jsonl().expect("encode jsonl");
        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode jsonl");
        assert_eq!(
            restored.events().expect("events"),
            vec![SessionEvent::CacheInvalidated { generation: 3 }]
        );
    }

    #[test]
    fn fixture_decodes_with_defaults() {
        let recorder = SessionRecorder::from_jsonl(FIXTURE).expect("decode fixture");
        let events = recorder.events().expect("events");
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[2],
            SessionEvent::CommandOutput { pages: 0, output, .. } if output == "LAN1 up"
        ));
    }

    #[test]
    fn key_events_only_drops_output_text() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder
            .record_event(output_event("default via pp1"))
            .expect("record output");

        let events = recorder.events().expect("events");
        assert_eq!(events, vec![output_event("")]);
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);
        recorder
            .record_event(SessionEvent::StateChanged {
                from: SessionState::Disconnected,
                to: SessionState::Connecting,
            })
            .expect("record state");
        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn from_jsonl_accepts_empty_input() {
        let restored = SessionRecorder::from_jsonl("").expect("decode empty jsonl");
        assert!(restored.entries().expect("entries").is_empty());
    }

    #[test]
    fn from_jsonl_rejects_garbage() {
        let err = match SessionRecorder::from_jsonl("{not json}") {
            Ok(_) => panic!("garbage must not decode"),
            Err(e) => e,
        };
        assert!(matches!(err, RtxError::Recording(_)));
    }

    #[test]
    fn recorder_clear_removes_all_entries() {
        let recorder = SessionRecorder::default();
        recorder
            .record_event(SessionEvent::ConnectionClosed {
                reason: "close".to_string(),
            })
            .expect("record close");
        recorder.clear().expect("clear");
        assert!(recorder.entries().expect("entries").is_empty());
    }
}
