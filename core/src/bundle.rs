//! Finalized bundle: the frozen run, its dual commitments, and the
//! canonical serialized form.
//!
//! Finalization is the single terminal transition. It force-closes any
//! still-running spans, freezes the run, builds the span Merkle tree,
//! derives the root hash binding both commitments, and projects the public
//! view. The bundle owns the run outright afterwards; the builder was
//! consumed to get here.

use crate::merkle::MerkleTree;
use crate::view::{build_public_view, PublicView};
use chrono::Utc;
use poi_trace_spec::{
    canonicalize, derive_root_hash, CanonError, Run, RunStatus, SpanStatus, TraceError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info_span;

/// A finalized, immutable trace bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TraceBundle {
    /// Format version of the serialized document (the schema version).
    pub format_version: u32,
    /// Shareable projection of the run.
    pub public_view: PublicView,
    /// The full private run.
    pub private_run: Run,
    /// Merkle root over the span hashes.
    pub merkle_root: String,
    /// Root hash binding the rolling hash, Merkle root, and run identity.
    pub root_hash: String,
    /// Hash of the chunk manifest, once one has been produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,
    /// Identity of the signer, when the bundle has been signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,
    /// Hex-encoded signature over the bundle payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Freeze a run into a bundle. Called exactly once per run, by the builder's
/// consuming `finalize`.
pub(crate) fn finalize_run(mut run: Run, terminal: RunStatus) -> Result<TraceBundle, TraceError> {
    let span = info_span!(
        "finalize_run",
        run_id = %run.run_id,
        spans = run.spans.len(),
        events = run.events.len()
    );
    let _guard = span.enter();

    let ended_at = Utc::now();
    run.status = terminal;
    run.ended_at = Some(ended_at);
    run.duration_ms = Some((ended_at - run.started_at).num_milliseconds().max(0) as u64);

    // Force-close whatever the caller left running, stamped with the run's
    // own end time.
    let event_hash_by_id: HashMap<String, String> = run
        .events
        .iter()
        .map(|e| (e.event_id.clone(), e.hash.clone()))
        .collect();
    for span in &mut run.spans {
        if span.status.is_terminal() {
            continue;
        }
        span.status = SpanStatus::Completed;
        span.ended_at = Some(ended_at);
        span.duration_ms = Some((ended_at - span.started_at).num_milliseconds().max(0) as u64);
        let member_hashes: Vec<String> = span
            .event_ids
            .iter()
            .filter_map(|id| event_hash_by_id.get(id).cloned())
            .collect();
        span.hash = Some(span.compute_hash(&member_hashes)?);
    }

    let span_hashes: Vec<String> = run
        .spans
        .iter()
        .map(|s| {
            s.hash.clone().ok_or_else(|| {
                TraceError::Integrity(format!("span {} has no hash after close", s.span_id))
            })
        })
        .collect::<Result<_, _>>()?;
    let merkle_root = MerkleTree::from_span_hashes(&span_hashes).root();
    let root_hash = derive_root_hash(
        &run.rolling_hash,
        &merkle_root,
        &run.run_id,
        run.schema_version,
    )?;
    run.root_hash = Some(root_hash.clone());

    let public_view = build_public_view(&run, &merkle_root, &root_hash)?;
    tracing::debug!(%merkle_root, %root_hash, "run finalized");

    Ok(TraceBundle {
        format_version: run.schema_version,
        public_view,
        private_run: run,
        merkle_root,
        root_hash,
        manifest_hash: None,
        signer_id: None,
        signature: None,
    })
}

/// Serialize a bundle to its canonical JSON document. Equal bundles produce
/// bitwise-identical bytes on every machine.
pub fn serialize_bundle(bundle: &TraceBundle) -> Result<Vec<u8>, TraceError> {
    let value = serde_json::to_value(bundle)
        .map_err(|err| CanonError::Unrepresentable(err.to_string()))?;
    Ok(canonicalize(&value)?)
}

/// Restore a bundle from its serialized document.
pub fn deserialize_bundle(bytes: &[u8]) -> Result<TraceBundle, TraceError> {
    serde_json::from_slice(bytes)
        .map_err(|err| TraceError::InvalidArgument(format!("bundle decode failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SpanOptions, TraceBuilder};
    use poi_trace_spec::{EventPayload, RollingHash, EMPTY_MERKLE_ROOT, SCHEMA_VERSION};

    fn command(cmd: &str) -> EventPayload {
        EventPayload::Command {
            command: cmd.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
            exit_code: None,
        }
    }

    #[test]
    fn empty_run_finalizes_with_sentinel_root() {
        let bundle = TraceBuilder::new("agent").unwrap().finalize().unwrap();
        assert_eq!(bundle.merkle_root, EMPTY_MERKLE_ROOT);
        assert_eq!(bundle.format_version, SCHEMA_VERSION);
        assert_eq!(bundle.private_run.status, RunStatus::Completed);
        assert!(bundle.public_view.public_spans.is_empty());
        assert_eq!(bundle.public_view.total_events, 0);

        // The root is fixed by the genesis chain head, the sentinel, and the
        // run identity, nothing else.
        let expected = derive_root_hash(
            &bundle.private_run.rolling_hash,
            EMPTY_MERKLE_ROOT,
            &bundle.private_run.run_id,
            SCHEMA_VERSION,
        )
        .unwrap();
        assert_eq!(bundle.root_hash, expected);
        assert_eq!(
            bundle.private_run.rolling_hash,
            poi_trace_spec::rolling::genesis_hash()
        );
    }

    #[test]
    fn finalize_force_closes_open_spans() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        let open = builder.add_span("left-open", SpanOptions::default()).unwrap();
        builder.add_event(&open, command("x")).unwrap();
        let bundle = builder.finalize().unwrap();

        let span = bundle.private_run.span(&open).unwrap();
        assert_eq!(span.status, SpanStatus::Completed);
        assert_eq!(span.ended_at, bundle.private_run.ended_at);
        assert!(span.hash.is_some());
    }

    #[test]
    fn finalize_with_failed_status_keeps_commitments() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        let span = builder.add_span("work", SpanOptions::default()).unwrap();
        builder.add_event(&span, command("x")).unwrap();
        let bundle = builder.finalize_with_status(RunStatus::Failed).unwrap();
        assert_eq!(bundle.private_run.status, RunStatus::Failed);
        assert!(RollingHash::verify(
            bundle.private_run.events.iter().map(|e| e.hash.as_str()),
            &bundle.private_run.rolling_hash
        ));
    }

    #[test]
    fn merkle_root_matches_span_hashes() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        for name in ["a", "b", "c"] {
            let id = builder.add_span(name, SpanOptions::default()).unwrap();
            builder.add_event(&id, command(name)).unwrap();
            builder.close_span(&id, None).unwrap();
        }
        let bundle = builder.finalize().unwrap();
        let hashes: Vec<String> = bundle
            .private_run
            .spans
            .iter()
            .map(|s| s.hash.clone().unwrap())
            .collect();
        assert_eq!(
            MerkleTree::from_span_hashes(&hashes).root(),
            bundle.merkle_root
        );
    }

    #[test]
    fn serialization_round_trips_field_for_field() {
        let mut builder = TraceBuilder::new("agent").unwrap();
        let span = builder
            .add_span(
                "work",
                SpanOptions {
                    visibility: Some(poi_trace_spec::Visibility::Public),
                    metadata: Some(serde_json::json!({"phase": 1})),
                    ..Default::default()
                },
            )
            .unwrap();
        builder.add_event(&span, command("x")).unwrap();
        let bundle = builder.finalize().unwrap();

        let bytes = serialize_bundle(&bundle).unwrap();
        let restored = deserialize_bundle(&bytes).unwrap();
        assert_eq!(bundle, restored);
        // Canonical serialization is stable across the round trip.
        assert_eq!(bytes, serialize_bundle(&restored).unwrap());
    }

    #[test]
    fn deserialize_rejects_garbage() {
        assert!(matches!(
            deserialize_bundle(b"not json"),
            Err(TraceError::InvalidArgument(_))
        ));
    }
}
