//! Trace-commitment schema and hashing primitives.
//!
//! This crate defines the run/span/event data model, the canonical byte
//! encoding, the hash domains, and the rolling-hash chain. The engine that
//! drives mutation, Merkle proofs, and disclosure lives in `poi-trace-core`.
#![deny(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Deterministic byte encoding used wherever hashing consumes a value.
pub mod canonical;
/// Error taxonomy shared across crates.
pub mod error;
/// Event kinds, default visibility, and event hashing.
pub mod events;
/// SHA-256 hashing and the fixed domain prefixes.
pub mod hash;
/// Incremental hash chain over the event stream.
pub mod rolling;

pub use canonical::{canonicalize, canonicalize_with, CanonError, NullPolicy};
pub use error::TraceError;
pub use events::{Event, EventPayload, OutputStream};
pub use hash::{hash_bytes, hash_canonical, hash_domain};
pub use rolling::RollingHash;

use hash::{hash_domain as domain_hash, ROOT_DOMAIN, SPAN_DOMAIN};

/// Schema version stamped into every run and bundle produced by this
/// implementation.
pub const SCHEMA_VERSION: u32 = 1;

/// Sentinel Merkle root for a bundle with zero spans. Deliberately not a
/// valid digest so verifiers must treat the empty tree as a first-class
/// case rather than a hash that happens to match something.
pub const EMPTY_MERKLE_ROOT: &str = "";

/// Disclosure level attached to every event and span.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Included in the public view.
    Public,
    /// Withheld from the public view; disclosable on request.
    Private,
    /// Withheld from the public view; intended to stay undisclosed.
    Secret,
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Accepting spans and events.
    Running,
    /// Finalized normally.
    Completed,
    /// Finalized after a fault.
    Failed,
    /// Finalized after cancellation.
    Cancelled,
}

impl RunStatus {
    /// Whether the status ends the run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Lifecycle status of a span.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// Accepting events.
    Running,
    /// Closed normally.
    Completed,
    /// Closed after a fault.
    Failed,
    /// Closed after cancellation.
    Cancelled,
}

impl SpanStatus {
    /// Whether the status ends the span.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SpanStatus::Running)
    }
}

/// A named, nestable unit of work grouping an ordered subset of the run's
/// events.
///
/// Spans reference their parent and children by id only, with no owning
/// pointers between spans, so the graph stays acyclic by construction and
/// serializable without cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Unique span identifier.
    pub span_id: String,
    /// Monotonic creation index across the run; sole Merkle leaf order.
    pub span_seq: u64,
    /// Enclosing span, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// Human-readable span name.
    pub name: String,
    /// Lifecycle status.
    pub status: SpanStatus,
    /// Disclosure level; gates every member event in the public view.
    pub visibility: Visibility,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Close time, set when the span leaves `running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Close time minus start time, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Member event ids in append order (seq order within the span).
    #[serde(default)]
    pub event_ids: Vec<String>,
    /// Child span ids in creation order.
    #[serde(default)]
    pub child_span_ids: Vec<String>,
    /// Free-form metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Canonical span hash, fixed at close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Span {
    /// The span's identifying header as a canonical value: everything except
    /// the member list, the child list, and the hash itself.
    pub fn header_value(&self) -> Result<Value, CanonError> {
        let mut value = serde_json::to_value(self)
            .map_err(|err| CanonError::Unrepresentable(err.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("eventIds");
            map.remove("childSpanIds");
            map.remove("hash");
        }
        Ok(value)
    }

    /// Compute the span hash from the header plus the member event hashes in
    /// their append order. A span with no events hashes the header followed
    /// by the bare separator.
    pub fn compute_hash(&self, member_event_hashes: &[String]) -> Result<String, CanonError> {
        let header = canonicalize(&self.header_value()?)?;
        let members = member_event_hashes.concat();
        Ok(domain_hash(
            SPAN_DOMAIN,
            &[header.as_slice(), b"|", members.as_bytes()],
        ))
    }
}

/// The whole trace in flight: an ordered event stream, a span collection,
/// and the commitments accumulated so far.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// 128-bit unique run identifier.
    pub run_id: String,
    /// Schema version of the producing implementation.
    pub schema_version: u32,
    /// Identity of the agent being traced.
    pub agent_id: String,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run end time, set at finalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// End minus start, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Free-form metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Event stream in seq order.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Spans in creation (`span_seq`) order.
    #[serde(default)]
    pub spans: Vec<Span>,
    /// Head of the rolling-hash chain over the event stream.
    pub rolling_hash: String,
    /// Next event sequence number to assign.
    pub next_seq: u64,
    /// Next span sequence number to assign.
    pub next_span_seq: u64,
    /// Root hash binding both commitments, set at finalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_hash: Option<String>,
}

impl Run {
    /// Look up a span by id.
    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    /// Look up an event by id.
    pub fn event(&self, event_id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    /// Member events of a span, in seq order.
    pub fn events_of(&self, span: &Span) -> Vec<&Event> {
        span.event_ids
            .iter()
            .filter_map(|id| self.event(id))
            .collect()
    }
}

/// Derive the root hash binding the rolling hash, the Merkle root, and the
/// run identity. This is the single digest suitable for external anchoring.
pub fn derive_root_hash(
    rolling_hash: &str,
    merkle_root: &str,
    run_id: &str,
    schema_version: u32,
) -> Result<String, CanonError> {
    let value = serde_json::json!({
        "rollingHash": rolling_hash,
        "merkleRoot": merkle_root,
        "runId": run_id,
        "schemaVersion": schema_version,
    });
    let bytes = canonicalize(&value)?;
    Ok(domain_hash(ROOT_DOMAIN, &[bytes.as_slice()]))
}

/// Fresh 128-bit identifier with a short role prefix.
pub fn fresh_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}
