// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The event protocol spoken between the orchestrator and its agents.
//!
//! Every agent process writes newline-delimited JSON events to stdout;
//! the orchestrator sends prompts and control events the same way. An
//! [`Event`] is immutable once emitted and carries a kind, a UTC
//! timestamp, the originating agent id (empty when the orchestrator is
//! the source), a per-source sequence number starting at 1, and an
//! opaque JSON payload typed by kind.
//!
//! Payloads stay raw [`serde_json::Value`]s on the event itself so that
//! fields added by newer agents survive a decode/encode round trip;
//! typed views decode on demand and ignore unknown fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// The kind of a protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Initial task prompt (orchestrator to agent).
    Prompt,
    /// Request to cancel work (orchestrator to agent).
    Cancel,
    /// Resource limit warning (orchestrator to agent).
    Watchdog,
    /// Agent is thinking or planning.
    Thinking,
    /// Agent performed an action.
    Action,
    /// Agent completed the task.
    Complete,
    /// Agent encountered an error.
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Prompt => "prompt",
            Self::Cancel => "cancel",
            Self::Watchdog => "watchdog",
            Self::Thinking => "thinking",
            Self::Action => "action",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// A single event in the communication stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
    /// Which agent generated this event; empty if from the orchestrator.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    /// Monotonically increasing per source, starting at 1.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sequence_num: u64,
    /// Event-specific data, typed by kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Event {
    /// Creates a new event stamped with the current UTC time.
    pub fn new(kind: EventKind, agent_id: impl Into<String>, sequence_num: u64) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            sequence_num,
            payload: None,
        }
    }

    /// Attaches a serialized payload to the event.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, ProtocolError> {
        let value =
            serde_json::to_value(payload).map_err(|e| ProtocolError::Payload(e.to_string()))?;
        self.payload = Some(value);
        Ok(self)
    }

    /// Decodes the payload into a typed view, ignoring unknown fields.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        let value = self.payload.as_ref().ok_or(ProtocolError::MissingPayload)?;
        serde_json::from_value(value.clone()).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    fn typed_payload<T: for<'de> Deserialize<'de>>(
        &self,
        expected: EventKind,
    ) -> Result<T, ProtocolError> {
        if self.kind != expected {
            return Err(ProtocolError::WrongKind {
                expected: expected.to_string(),
                actual: self.kind.to_string(),
            });
        }
        self.payload_as()
    }

    /// Decodes the payload of a `prompt` event.
    pub fn prompt_payload(&self) -> Result<PromptPayload, ProtocolError> {
        self.typed_payload(EventKind::Prompt)
    }

    /// Decodes the payload of a `thinking` event.
    pub fn thinking_payload(&self) -> Result<ThinkingPayload, ProtocolError> {
        self.typed_payload(EventKind::Thinking)
    }

    /// Decodes the payload of an `action` event.
    pub fn action_payload(&self) -> Result<ActionPayload, ProtocolError> {
        self.typed_payload(EventKind::Action)
    }

    /// Decodes the payload of an `error` event.
    pub fn error_payload(&self) -> Result<ErrorPayload, ProtocolError> {
        self.typed_payload(EventKind::Error)
    }

    /// Decodes the payload of a `watchdog` event.
    pub fn watchdog_payload(&self) -> Result<WatchdogPayload, ProtocolError> {
        self.typed_payload(EventKind::Watchdog)
    }
}

/// Payload for a `prompt` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptPayload {
    /// The task description.
    pub prompt: String,
    /// Optional files relevant to the task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_files: Vec<String>,
}

/// Payload for a `thinking` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingPayload {
    /// The thinking or planning text.
    pub content: String,
}

/// Payload for an `action` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// What kind of action was performed, e.g. `file_edit`.
    pub action_type: String,
    /// Path of the file being modified, if applicable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    /// Content being added or modified, if applicable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Unified diff of the change, if applicable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff: String,
}

/// Payload for an `error` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
    /// Short machine-readable code, e.g. `parse_error`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
}

/// Payload for a `watchdog` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchdogPayload {
    /// The agent the warning is about.
    pub agent_id: String,
    /// Why the watchdog fired.
    pub reason: String,
    /// Input tokens consumed so far.
    pub input_tokens: u64,
    /// Output tokens consumed so far.
    pub output_tokens: u64,
    /// Elapsed wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

/// Encodes a single event as one JSON line (no trailing newline).
pub fn encode_line(event: &Event) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a single JSON line into an event.
///
/// Unknown top-level fields are ignored so that protocol drift from
/// external agents does not abort the stream.
pub fn decode_line(line: &str) -> Result<Event, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Writes events in newline-delimited JSON form.
pub fn write_ndjson(events: &[Event]) -> Result<String, ProtocolError> {
    let mut out = String::new();
    for event in events {
        out.push_str(&encode_line(event)?);
        out.push('\n');
    }
    Ok(out)
}

/// Reads events from a newline-delimited JSON buffer.
///
/// Blank lines are skipped; a line that does not decode fails the whole
/// read. Streaming consumers that need per-line recovery should use
/// [`decode_line`] directly.
pub fn read_ndjson(data: &str) -> Result<Vec<Event>, ProtocolError> {
    let mut events = Vec::new();
    for line in data.lines() {
        if line.trim().is_empty() {
            continue;
        }
        events.push(decode_line(line)?);
    }
    Ok(events)
}
