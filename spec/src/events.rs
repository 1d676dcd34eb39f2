//! Event model: the six observation kinds an agent run records, their
//! default visibility, and the canonical hashing of a sealed event.
//!
//! An event is a shared header (id, sequence number, timestamp, visibility)
//! plus a tagged payload. The kind discriminator and the visibility are both
//! part of the canonical form, so two events of different kinds can never
//! share a hash and visibility cannot be relabeled after sealing without
//! breaking the rolling-hash chain.

use crate::canonical::{canonicalize, CanonError};
use crate::error::TraceError;
use crate::hash::{hash_domain, EVENT_DOMAIN};
use crate::Visibility;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Output stream an [`EventPayload::Output`] was captured from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
    /// Interleaved stdout and stderr.
    Combined,
}

/// Kind-specific payload of an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "kind",
    content = "data",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum EventPayload {
    /// A command the agent executed.
    Command {
        /// Executable or shell command line.
        command: String,
        /// Arguments passed alongside the command.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Working directory at execution time.
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        /// Environment variables visible to the command.
        #[serde(skip_serializing_if = "Option::is_none")]
        env: Option<BTreeMap<String, String>>,
        /// Exit code once the command completed.
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
    },
    /// Captured output from a command or tool.
    Output {
        /// Which stream the content came from.
        stream: OutputStream,
        /// The captured content.
        content: String,
        /// Set when the content was cut to fit a capture budget.
        #[serde(skip_serializing_if = "Option::is_none")]
        truncated: Option<bool>,
        /// Byte length of the original content before truncation.
        #[serde(skip_serializing_if = "Option::is_none")]
        original_bytes: Option<u64>,
    },
    /// A decision the agent took.
    Decision {
        /// The decision itself.
        decision: String,
        /// Reasoning behind the decision.
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        /// Alternatives that were considered and rejected.
        #[serde(skip_serializing_if = "Option::is_none")]
        alternatives: Option<Vec<String>>,
        /// Confidence as an integer percentage (0-100).
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<u8>,
    },
    /// Something the agent observed about its environment.
    Observation {
        /// The observation text.
        observation: String,
        /// Free-form category label.
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        /// Structured data backing the observation.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// An error the agent encountered.
    Error {
        /// Error message.
        message: String,
        /// Machine-readable error code.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Stack trace or equivalent diagnostic.
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
        /// Whether the agent considered the error recoverable.
        #[serde(skip_serializing_if = "Option::is_none")]
        recoverable: Option<bool>,
    },
    /// Caller-defined event (safety signals, domain markers).
    Custom {
        /// Discriminator naming the custom event type.
        event_type: String,
        /// Free-form payload.
        data: Value,
    },
}

impl EventPayload {
    /// Stable kind discriminator, matching the serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Command { .. } => "command",
            EventPayload::Output { .. } => "output",
            EventPayload::Decision { .. } => "decision",
            EventPayload::Observation { .. } => "observation",
            EventPayload::Error { .. } => "error",
            EventPayload::Custom { .. } => "custom",
        }
    }

    /// Visibility applied when the caller does not pick one.
    ///
    /// Commands and observations describe what the agent did and are public
    /// by default; outputs, decisions, errors, and custom payloads carry the
    /// interesting content and default to private.
    pub fn default_visibility(&self) -> Visibility {
        match self {
            EventPayload::Command { .. } | EventPayload::Observation { .. } => Visibility::Public,
            EventPayload::Output { .. }
            | EventPayload::Decision { .. }
            | EventPayload::Error { .. }
            | EventPayload::Custom { .. } => Visibility::Private,
        }
    }

    /// Reject payloads whose required fields are missing or empty.
    pub fn validate(&self) -> Result<(), TraceError> {
        let missing = |what: &str| Err(TraceError::InvalidArgument(format!("{what} is empty")));
        match self {
            EventPayload::Command { command, .. } if command.is_empty() => {
                missing("command event command")
            }
            EventPayload::Decision {
                decision,
                confidence,
                ..
            } => {
                if decision.is_empty() {
                    return missing("decision event decision");
                }
                if let Some(pct) = confidence {
                    if *pct > 100 {
                        return Err(TraceError::InvalidArgument(format!(
                            "decision confidence {pct} exceeds 100"
                        )));
                    }
                }
                Ok(())
            }
            EventPayload::Observation { observation, .. } if observation.is_empty() => {
                missing("observation event text")
            }
            EventPayload::Error { message, .. } if message.is_empty() => {
                missing("error event message")
            }
            EventPayload::Custom { event_type, .. } if event_type.is_empty() => {
                missing("custom event type")
            }
            _ => Ok(()),
        }
    }
}

/// A sealed observation in the run's event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier.
    pub event_id: String,
    /// Monotonic sequence number, unique across the run.
    pub seq: u64,
    /// Wall-clock time at acceptance. Informational only; ordering authority
    /// is `seq`.
    pub timestamp: DateTime<Utc>,
    /// Disclosure level of this event.
    pub visibility: Visibility,
    /// Kind discriminator plus kind-specific data.
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Canonical hash of the event (everything above, kind tag included).
    pub hash: String,
}

impl Event {
    /// Seal a new event: the hash is computed at construction and never
    /// changes afterwards.
    pub fn new(
        event_id: String,
        seq: u64,
        timestamp: DateTime<Utc>,
        visibility: Visibility,
        payload: EventPayload,
    ) -> Result<Self, CanonError> {
        let mut event = Self {
            event_id,
            seq,
            timestamp,
            visibility,
            payload,
            hash: String::new(),
        };
        event.hash = event.compute_hash()?;
        Ok(event)
    }

    /// The canonical value of this event, excluding the hash field itself.
    pub fn canonical_value(&self) -> Result<Value, CanonError> {
        let mut value = serde_json::to_value(self)
            .map_err(|err| CanonError::Unrepresentable(err.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("hash");
        }
        Ok(value)
    }

    /// Recompute the event hash from the canonical value.
    pub fn compute_hash(&self) -> Result<String, CanonError> {
        let bytes = canonicalize(&self.canonical_value()?)?;
        Ok(hash_domain(EVENT_DOMAIN, &[bytes.as_slice()]))
    }
}
