//! Projection of a finalized run into its shareable form.
//!
//! The span is the gating unit: a public span exposes only its public
//! events, and a non-public span exposes nothing but its id and hash. Every
//! span hash is disclosed either way, so a verifier can always rebuild the
//! Merkle root from the union of the two lists. Omission under that
//! hash-binding discipline is the only information-hiding mechanism here.

use chrono::{DateTime, Utc};
use poi_trace_spec::{Event, Run, Span, TraceError, Visibility};
use serde::{Deserialize, Serialize};

/// A public span together with its public member events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedSpan {
    /// The span with all header fields and its hash.
    pub span: Span,
    /// Public member events, in seq order.
    pub events: Vec<Event>,
}

/// Hash-only stand-in for a span withheld from the public view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedactedSpan {
    /// Id of the withheld span.
    pub span_id: String,
    /// Its span hash, so the Merkle root stays recomputable.
    pub span_hash: String,
}

/// The externally shareable projection of a finalized run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicView {
    /// Run identifier.
    pub run_id: String,
    /// Agent identity.
    pub agent_id: String,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run end time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Run duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Span count of the full run, not the projection.
    pub total_spans: u64,
    /// Event count of the full run, not the projection.
    pub total_events: u64,
    /// Root hash, copied verbatim from the bundle.
    pub root_hash: String,
    /// Merkle root, copied verbatim from the bundle.
    pub merkle_root: String,
    /// Public spans in `span_seq` order, each with only its public events.
    pub public_spans: Vec<AnnotatedSpan>,
    /// Every non-public span as `{spanId, spanHash}`, sorted by span id.
    pub redacted_span_hashes: Vec<RedactedSpan>,
}

/// Build the public view of a finalized run.
///
/// Fails with an integrity error if any span is missing its hash, which can
/// only happen when the run was not actually finalized.
pub fn build_public_view(
    run: &Run,
    merkle_root: &str,
    root_hash: &str,
) -> Result<PublicView, TraceError> {
    let mut public_spans = Vec::new();
    let mut redacted = Vec::new();
    for span in &run.spans {
        let span_hash = span.hash.clone().ok_or_else(|| {
            TraceError::Integrity(format!(
                "span {} has no hash; run is not finalized",
                span.span_id
            ))
        })?;
        if span.visibility == Visibility::Public {
            let events = run
                .events_of(span)
                .into_iter()
                .filter(|e| e.visibility == Visibility::Public)
                .cloned()
                .collect();
            public_spans.push(AnnotatedSpan {
                span: span.clone(),
                events,
            });
        } else {
            redacted.push(RedactedSpan {
                span_id: span.span_id.clone(),
                span_hash,
            });
        }
    }
    redacted.sort_by(|a, b| a.span_id.cmp(&b.span_id));

    Ok(PublicView {
        run_id: run.run_id.clone(),
        agent_id: run.agent_id.clone(),
        started_at: run.started_at,
        ended_at: run.ended_at,
        duration_ms: run.duration_ms,
        total_spans: run.spans.len() as u64,
        total_events: run.events.len() as u64,
        root_hash: root_hash.to_string(),
        merkle_root: merkle_root.to_string(),
        public_spans,
        redacted_span_hashes: redacted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SpanOptions, TraceBuilder};
    use poi_trace_spec::{EventPayload, OutputStream};

    fn command(cmd: &str) -> EventPayload {
        EventPayload::Command {
            command: cmd.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
            exit_code: None,
        }
    }

    fn output(text: &str) -> EventPayload {
        EventPayload::Output {
            stream: OutputStream::Stdout,
            content: text.into(),
            truncated: None,
            original_bytes: None,
        }
    }

    fn public_span() -> SpanOptions {
        SpanOptions {
            visibility: Some(Visibility::Public),
            ..Default::default()
        }
    }

    #[test]
    fn span_gates_its_events() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        let open = builder.add_span("open", public_span()).unwrap();
        let hidden = builder.add_span("hidden", SpanOptions::default()).unwrap();
        builder.add_event(&open, command("visible")).unwrap();
        builder.add_event(&open, output("filtered")).unwrap();
        // A public event inside a private span stays hidden.
        builder.add_event(&hidden, command("still-hidden")).unwrap();
        let bundle = builder.finalize().unwrap();

        let view = &bundle.public_view;
        assert_eq!(view.public_spans.len(), 1);
        assert_eq!(view.public_spans[0].span.span_id, open);
        assert_eq!(view.public_spans[0].events.len(), 1);
        assert_eq!(view.redacted_span_hashes.len(), 1);
        assert_eq!(view.redacted_span_hashes[0].span_id, hidden);
    }

    #[test]
    fn counts_reflect_full_run() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        let open = builder.add_span("open", public_span()).unwrap();
        let hidden = builder.add_span("hidden", SpanOptions::default()).unwrap();
        builder.add_event(&open, output("a")).unwrap();
        builder.add_event(&hidden, output("b")).unwrap();
        let bundle = builder.finalize().unwrap();

        let view = &bundle.public_view;
        assert_eq!(view.total_spans, 2);
        assert_eq!(view.total_events, 2);
        assert!(view.public_spans[0].events.is_empty());
    }

    #[test]
    fn redacted_list_is_sorted_by_span_id() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        for name in ["one", "two", "three", "four"] {
            builder.add_span(name, SpanOptions::default()).unwrap();
        }
        let bundle = builder.finalize().unwrap();
        let ids: Vec<&str> = bundle
            .public_view
            .redacted_span_hashes
            .iter()
            .map(|r| r.span_id.as_str())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn partition_covers_every_span() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        builder.add_span("a", public_span()).unwrap();
        builder.add_span("b", SpanOptions::default()).unwrap();
        builder
            .add_span(
                "c",
                SpanOptions {
                    visibility: Some(Visibility::Secret),
                    ..Default::default()
                },
            )
            .unwrap();
        let bundle = builder.finalize().unwrap();
        let view = &bundle.public_view;
        assert_eq!(
            view.public_spans.len() + view.redacted_span_hashes.len(),
            bundle.private_run.spans.len()
        );
    }

    #[test]
    fn secret_and_private_are_both_redacted() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        builder.add_span("private", SpanOptions::default()).unwrap();
        builder
            .add_span(
                "secret",
                SpanOptions {
                    visibility: Some(Visibility::Secret),
                    ..Default::default()
                },
            )
            .unwrap();
        let bundle = builder.finalize().unwrap();
        assert!(bundle.public_view.public_spans.is_empty());
        assert_eq!(bundle.public_view.redacted_span_hashes.len(), 2);
    }
}
