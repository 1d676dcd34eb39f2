//! Single-writer state machine over a run: span lifecycle, event appends,
//! and the hand-off into finalization.
//!
//! All mutation goes through `&mut self`, so exclusive ownership of the run
//! is enforced by the borrow checker rather than a lock. Every operation
//! either fully applies or fully rejects: a failed append never advances a
//! counter, never touches the rolling hash, and never appears in any later
//! commitment.

use crate::bundle::{finalize_run, TraceBundle};
use chrono::Utc;
use poi_trace_spec::{
    fresh_id, Event, EventPayload, RollingHash, Run, RunStatus, Span, SpanStatus, TraceError,
    Visibility, SCHEMA_VERSION,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Optional knobs for span creation.
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    /// Id of the enclosing span. Must exist and still be running.
    pub parent: Option<String>,
    /// Disclosure level; spans default to private.
    pub visibility: Option<Visibility>,
    /// Free-form metadata recorded in the span header.
    pub metadata: Option<Value>,
}

/// Builder driving a run from creation to finalization.
#[derive(Debug)]
pub struct TraceBuilder {
    run: Run,
    chain: RollingHash,
    span_index: HashMap<String, usize>,
    event_index: HashMap<String, usize>,
}

impl TraceBuilder {
    /// Create a new run for `agent_id` in the running state.
    pub fn new(agent_id: &str) -> Result<Self, TraceError> {
        if agent_id.trim().is_empty() {
            return Err(TraceError::InvalidArgument("agent id is empty".into()));
        }
        let chain = RollingHash::new();
        let run = Run {
            run_id: fresh_id("run"),
            schema_version: SCHEMA_VERSION,
            agent_id: agent_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            metadata: None,
            events: Vec::new(),
            spans: Vec::new(),
            rolling_hash: chain.current().to_string(),
            next_seq: 0,
            next_span_seq: 0,
            root_hash: None,
        };
        debug!(run_id = %run.run_id, agent_id, "run created");
        Ok(Self {
            run,
            chain,
            span_index: HashMap::new(),
            event_index: HashMap::new(),
        })
    }

    /// Attach run-level metadata.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.run.metadata = Some(metadata);
        self
    }

    /// Read access to the run as built so far.
    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Create a new span and return its id.
    pub fn add_span(&mut self, name: &str, opts: SpanOptions) -> Result<String, TraceError> {
        if name.trim().is_empty() {
            return Err(TraceError::InvalidArgument("span name is empty".into()));
        }
        let parent_idx = match &opts.parent {
            Some(parent_id) => {
                let idx = *self.span_index.get(parent_id).ok_or_else(|| {
                    TraceError::NotFound(format!("parent span {parent_id} does not exist"))
                })?;
                if self.run.spans[idx].status.is_terminal() {
                    return Err(TraceError::IllegalState(format!(
                        "parent span {parent_id} is not running"
                    )));
                }
                Some(idx)
            }
            None => None,
        };

        let span_id = fresh_id("span");
        let span = Span {
            span_id: span_id.clone(),
            span_seq: self.run.next_span_seq,
            parent_span_id: opts.parent.clone(),
            name: name.to_string(),
            status: SpanStatus::Running,
            visibility: opts.visibility.unwrap_or(Visibility::Private),
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            event_ids: Vec::new(),
            child_span_ids: Vec::new(),
            metadata: opts.metadata,
            hash: None,
        };
        if let Some(idx) = parent_idx {
            self.run.spans[idx].child_span_ids.push(span_id.clone());
        }
        self.span_index.insert(span_id.clone(), self.run.spans.len());
        self.run.spans.push(span);
        self.run.next_span_seq += 1;
        debug!(run_id = %self.run.run_id, span_id = %span_id, name, "span opened");
        Ok(span_id)
    }

    /// Append an event to a running span with the kind's default visibility.
    pub fn add_event(
        &mut self,
        span_id: &str,
        payload: EventPayload,
    ) -> Result<String, TraceError> {
        self.append_event(span_id, payload, None)
    }

    /// Append an event with an explicit visibility.
    pub fn add_event_with_visibility(
        &mut self,
        span_id: &str,
        payload: EventPayload,
        visibility: Visibility,
    ) -> Result<String, TraceError> {
        self.append_event(span_id, payload, Some(visibility))
    }

    fn append_event(
        &mut self,
        span_id: &str,
        payload: EventPayload,
        visibility: Option<Visibility>,
    ) -> Result<String, TraceError> {
        let span_idx = *self
            .span_index
            .get(span_id)
            .ok_or_else(|| TraceError::NotFound(format!("span {span_id} does not exist")))?;
        if self.run.spans[span_idx].status.is_terminal() {
            return Err(TraceError::IllegalState(format!(
                "span {span_id} is closed"
            )));
        }
        payload.validate()?;

        let visibility = visibility.unwrap_or_else(|| payload.default_visibility());
        // Sealing the event is the last fallible step; nothing below it can
        // leave the run half-updated.
        let event = Event::new(
            fresh_id("evt"),
            self.run.next_seq,
            Utc::now(),
            visibility,
            payload,
        )?;
        let event_id = event.event_id.clone();

        self.chain.update(&event.hash);
        self.run.rolling_hash = self.chain.current().to_string();
        self.run.next_seq += 1;
        self.run.spans[span_idx].event_ids.push(event_id.clone());
        self.event_index
            .insert(event_id.clone(), self.run.events.len());
        debug!(
            run_id = %self.run.run_id,
            span_id,
            seq = event.seq,
            kind = event.payload.kind(),
            "event appended"
        );
        self.run.events.push(event);
        Ok(event_id)
    }

    /// Close a running span, fixing its member list and span hash.
    ///
    /// Returns the span hash. The default terminal status is `completed`.
    pub fn close_span(
        &mut self,
        span_id: &str,
        status: Option<SpanStatus>,
    ) -> Result<String, TraceError> {
        let status = status.unwrap_or(SpanStatus::Completed);
        if !status.is_terminal() {
            return Err(TraceError::InvalidArgument(
                "span close status must be terminal".into(),
            ));
        }
        let span_idx = *self
            .span_index
            .get(span_id)
            .ok_or_else(|| TraceError::NotFound(format!("span {span_id} does not exist")))?;
        if self.run.spans[span_idx].status.is_terminal() {
            return Err(TraceError::IllegalState(format!(
                "span {span_id} is already closed"
            )));
        }

        let member_hashes = self.member_hashes(span_idx);
        let ended_at = Utc::now();
        let mut closed = self.run.spans[span_idx].clone();
        closed.status = status;
        closed.ended_at = Some(ended_at);
        closed.duration_ms =
            Some((ended_at - closed.started_at).num_milliseconds().max(0) as u64);
        let hash = closed.compute_hash(&member_hashes)?;
        closed.hash = Some(hash.clone());
        self.run.spans[span_idx] = closed;
        debug!(run_id = %self.run.run_id, span_id, ?status, "span closed");
        Ok(hash)
    }

    /// Finalize the run as `completed`, consuming the builder.
    ///
    /// Any spans still running are force-closed as `completed`. Consuming
    /// `self` is what transfers exclusive ownership of the run to the
    /// bundle: there is no builder left to mutate through, so a second
    /// finalize is unrepresentable.
    pub fn finalize(self) -> Result<TraceBundle, TraceError> {
        self.finalize_with_status(RunStatus::Completed)
    }

    /// Finalize the run with an explicit terminal status (fault paths).
    pub fn finalize_with_status(self, status: RunStatus) -> Result<TraceBundle, TraceError> {
        if !status.is_terminal() {
            return Err(TraceError::InvalidArgument(
                "finalize status must be terminal".into(),
            ));
        }
        finalize_run(self.run, status)
    }

    fn member_hashes(&self, span_idx: usize) -> Vec<String> {
        self.run.spans[span_idx]
            .event_ids
            .iter()
            .filter_map(|id| self.event_index.get(id))
            .map(|&idx| self.run.events[idx].hash.clone())
            .collect()
    }
}
