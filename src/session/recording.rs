use super::*;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record lifecycle and RPC events only.
    KeyEventsOnly,
    /// Also record every decoded frame.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw frame events.
    pub keep_raw_frames: bool,
    /// Keep lifecycle state changes.
    pub keep_state_changed: bool,
    /// Keep notifications.
    pub keep_notifications: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_frames: false,
            keep_state_changed: true,
            keep_notifications: true,
        }
    }
}

/// Recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionOpened {
        session_id: Option<u64>,
        framing: FramingMode,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    RpcSent {
        message_id: u64,
        body: String,
    },
    ReplyReceived {
        message_id: u64,
        ok: bool,
        xml: String,
    },
    UnmatchedReply {
        #[serde(default)]
        message_id: Option<String>,
    },
    RequestTimedOut {
        message_id: u64,
    },
    NotificationReceived {
        xml: String,
    },
    SessionClosed {
        reason: String,
    },
    RawFrame {
        data: String,
    },
}

/// In-memory session recorder. Clones share the same log.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

fn lock_error<E: std::fmt::Display>(err: E) -> NetconfError {
    NetconfError::InternalServerError(format!("record lock error: {err}"))
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), NetconfError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self.entries.lock().map_err(lock_error)?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record one decoded frame when the level is [`SessionRecordLevel::Full`].
    pub fn record_raw_frame(&self, data: String) -> Result<(), NetconfError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawFrame { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, NetconfError> {
        let guard = self.entries.lock().map_err(lock_error)?;
        Ok(guard.clone())
    }

    pub fn clear(&self) -> Result<(), NetconfError> {
        self.entries.lock().map_err(lock_error)?.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, NetconfError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(|e| {
                NetconfError::InternalServerError(format!("record encode error: {e}"))
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines. Blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, NetconfError> {
        let mut parsed = Vec::new();
        for (idx, line) in jsonl.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                NetconfError::InternalServerError(format!(
                    "record decode error on line {}: {e}",
                    idx + 1
                ))
            })?;
            parsed.push(entry);
        }

        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize a JSONL recording into a stable fixture.
    ///
    /// Events are ordered by timestamp (ties keep recording order) and noisy
    /// event kinds are dropped according to `options`.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, NetconfError> {
        let mut indexed = Self::from_jsonl(jsonl)?
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::RawFrame { .. } if !options.keep_raw_frames => None,
                SessionEvent::StateChanged { .. } if !options.keep_state_changed => None,
                SessionEvent::NotificationReceived { .. } if !options.keep_notifications => None,
                _ => Some(entry),
            })
            .collect::<Vec<_>>();

        SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        }
        .to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Answers RPCs offline from a recording.
///
/// Each [`SessionReplayer::replay_rpc`] call consumes the next recorded
/// `rpc_sent` with an identical body and returns the reply recorded for its
/// message-id.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl SessionReplayer {
    pub fn from_recorder(recorder: &SessionRecorder) -> Result<Self, NetconfError> {
        let entries = recorder.entries()?;
        Ok(Self { entries, cursor: 0 })
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, NetconfError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Self::from_recorder(&recorder)
    }

    /// Session id and peer capabilities of the recorded session, if present.
    pub fn opened(&self) -> Option<(Option<u64>, FramingMode, &[String])> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::SessionOpened {
                session_id,
                framing,
                capabilities,
            } => Some((*session_id, *framing, capabilities.as_slice())),
            _ => None,
        })
    }

    /// Notifications in recording order.
    pub fn notifications(&self) -> Vec<Notification> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::NotificationReceived { xml } => match Message::parse(xml.as_bytes()) {
                    Ok(Message::Notification(notification)) => Some(notification),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// Replays the reply to the next recorded RPC whose body equals `body`.
    pub fn replay_rpc(&mut self, body: &str) -> Result<Reply, NetconfError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;

            let SessionEvent::RpcSent {
                message_id,
                body: recorded,
            } = &entry.event
            else {
                continue;
            };
            if recorded.trim() != body.trim() {
                continue;
            }
            return self.reply_for(*message_id);
        }

        Err(NetconfError::ReplayMismatchError(format!(
            "no recorded rpc matches body '{body}'"
        )))
    }

    /// Replays a sequence of RPC bodies in order.
    pub fn replay_script<S: AsRef<str>>(&mut self, bodies: &[S]) -> Result<Vec<Reply>, NetconfError> {
        bodies
            .iter()
            .map(|body| self.replay_rpc(body.as_ref()))
            .collect()
    }

    fn reply_for(&self, message_id: u64) -> Result<Reply, NetconfError> {
        let xml = self.entries[self.cursor..]
            .iter()
            .find_map(|entry| match &entry.event {
                SessionEvent::ReplyReceived {
                    message_id: id,
                    xml,
                    ..
                } if *id == message_id => Some(xml),
                _ => None,
            });
        let Some(xml) = xml else {
            let timed_out = self.entries[self.cursor..].iter().any(|entry| {
                matches!(entry.event, SessionEvent::RequestTimedOut { message_id: id } if id == message_id)
            });
            if timed_out {
                return Err(NetconfError::Timeout { message_id });
            }
            return Err(NetconfError::ReplayMismatchError(format!(
                "rpc {message_id} has no recorded reply"
            )));
        };
        match Message::parse(xml.as_bytes())? {
            Message::Reply(reply) => Ok(reply),
            _ => Err(NetconfError::ReplayMismatchError(format!(
                "recorded reply for rpc {message_id} is not an rpc-reply"
            ))),
        }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
