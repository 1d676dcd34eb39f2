//! Selective disclosure of individual spans against a finalized bundle.
//!
//! Membership mode proves a span exists at a specific leaf of the span tree
//! without revealing anything about it. Full mode additionally discloses the
//! span and its events, and the verifier recomputes the whole commitment
//! path (event hashes, span hash, leaf hash) before checking the Merkle
//! proof. Verification accumulates every defect rather than stopping at the
//! first.

use crate::bundle::TraceBundle;
use crate::merkle::{leaf_hash, verify_proof, MerkleProof, MerkleTree};
use crate::verify::VerificationReport;
use poi_trace_spec::{Event, Span, TraceError};
use serde::{Deserialize, Serialize};

/// How much a disclosure reveals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DisclosureMode {
    /// Inclusion proof only; no span or event contents.
    Membership,
    /// Inclusion proof plus the span and its events.
    Full,
}

/// One disclosed span within a disclosure envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisclosedSpan {
    /// Id of the disclosed span.
    pub span_id: String,
    /// Inclusion proof for the span's leaf.
    pub proof: MerkleProof,
    /// The span itself, in full mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    /// The span's member events in seq order, in full mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Event>>,
}

/// Disclosure envelope handed to a verifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisclosureResult {
    /// Mode the envelope was generated under.
    pub mode: DisclosureMode,
    /// Root hash of the source bundle.
    pub root_hash: String,
    /// Merkle root of the source bundle.
    pub merkle_root: String,
    /// The disclosed spans.
    pub disclosed_spans: Vec<DisclosedSpan>,
}

/// Serializable request for a disclosure, suitable for transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisclosureRequest {
    /// Run the request targets.
    pub run_id: String,
    /// Requested mode.
    pub mode: DisclosureMode,
    /// Span ids to disclose.
    pub span_ids: Vec<String>,
}

/// Whether `span_id` exists in the bundle and can be disclosed.
pub fn can_disclose(bundle: &TraceBundle, span_id: &str) -> bool {
    bundle.private_run.span(span_id).is_some()
}

/// Position of a span in `span_seq` order (its Merkle leaf index).
pub fn span_index(bundle: &TraceBundle, span_id: &str) -> Option<usize> {
    bundle
        .private_run
        .spans
        .iter()
        .position(|s| s.span_id == span_id)
}

/// Build a transportable disclosure request, validating span existence.
pub fn create_disclosure_request(
    bundle: &TraceBundle,
    span_ids: &[&str],
    mode: DisclosureMode,
) -> Result<DisclosureRequest, TraceError> {
    for span_id in span_ids {
        if !can_disclose(bundle, span_id) {
            return Err(TraceError::DisclosurePolicy(format!(
                "span {span_id} does not exist in run {}",
                bundle.private_run.run_id
            )));
        }
    }
    Ok(DisclosureRequest {
        run_id: bundle.private_run.run_id.clone(),
        mode,
        span_ids: span_ids.iter().map(|s| s.to_string()).collect(),
    })
}

/// Generate a disclosure envelope for the given spans.
pub fn create_disclosure(
    bundle: &TraceBundle,
    span_ids: &[&str],
    mode: DisclosureMode,
) -> Result<DisclosureResult, TraceError> {
    let run = &bundle.private_run;
    let span_hashes: Vec<String> = run
        .spans
        .iter()
        .map(|s| {
            s.hash.clone().ok_or_else(|| {
                TraceError::DisclosurePolicy(format!(
                    "span {} has no hash; bundle is not disclosable",
                    s.span_id
                ))
            })
        })
        .collect::<Result<_, _>>()?;
    let tree = MerkleTree::from_span_hashes(&span_hashes);

    let mut disclosed = Vec::with_capacity(span_ids.len());
    for span_id in span_ids {
        let index = span_index(bundle, span_id).ok_or_else(|| {
            TraceError::DisclosurePolicy(format!(
                "span {span_id} does not exist in run {}",
                run.run_id
            ))
        })?;
        let proof = tree.proof(index)?;
        let (span, events) = match mode {
            DisclosureMode::Membership => (None, None),
            DisclosureMode::Full => {
                let span = run.spans[index].clone();
                let mut events = Vec::with_capacity(span.event_ids.len());
                for event_id in &span.event_ids {
                    let event = run.event(event_id).ok_or_else(|| {
                        TraceError::Integrity(format!(
                            "span {span_id}: member event {event_id} is not in the run"
                        ))
                    })?;
                    events.push(event.clone());
                }
                (Some(span), Some(events))
            }
        };
        disclosed.push(DisclosedSpan {
            span_id: span_id.to_string(),
            proof,
            span,
            events,
        });
    }

    Ok(DisclosureResult {
        mode,
        root_hash: bundle.root_hash.clone(),
        merkle_root: bundle.merkle_root.clone(),
        disclosed_spans: disclosed,
    })
}

/// Verify a disclosure envelope against independently known anchor values.
///
/// Valid iff the anchors match the envelope, every proof resolves to the
/// expected Merkle root, every proof verifies, and, in full mode, every
/// recomputed leaf hash matches its proof.
pub fn verify_disclosure(
    result: &DisclosureResult,
    expected_root_hash: &str,
    expected_merkle_root: &str,
) -> VerificationReport {
    let mut errors = Vec::new();
    let mut checks = 2u64;

    if result.root_hash != expected_root_hash {
        errors.push("envelope root hash does not match the expected anchor".into());
    }
    if result.merkle_root != expected_merkle_root {
        errors.push("envelope merkle root does not match the expected anchor".into());
    }

    for disclosed in &result.disclosed_spans {
        let span_id = &disclosed.span_id;
        checks += 2;
        if disclosed.proof.root_hash != expected_merkle_root {
            errors.push(format!(
                "span {span_id}: proof resolves to a different merkle root"
            ));
        }
        if !verify_proof(&disclosed.proof) {
            errors.push(format!("span {span_id}: merkle proof does not verify"));
        }

        if result.mode == DisclosureMode::Full {
            checks += 1;
            match (&disclosed.span, &disclosed.events) {
                (Some(span), Some(events)) => {
                    verify_full_contents(span, events, disclosed, &mut errors);
                }
                _ => errors.push(format!(
                    "span {span_id}: full-mode disclosure is missing span or events"
                )),
            }
        }
    }

    VerificationReport {
        valid: errors.is_empty(),
        checks,
        errors,
    }
}

fn verify_full_contents(
    span: &Span,
    events: &[Event],
    disclosed: &DisclosedSpan,
    errors: &mut Vec<String>,
) {
    let span_id = &disclosed.span_id;
    if span.span_id != *span_id {
        errors.push(format!(
            "span {span_id}: disclosed span body carries id {}",
            span.span_id
        ));
    }
    let disclosed_ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
    let member_ids: Vec<&str> = span.event_ids.iter().map(String::as_str).collect();
    if disclosed_ids != member_ids {
        errors.push(format!(
            "span {span_id}: disclosed events do not match the span member list"
        ));
    }

    // Recompute the whole path from content: event hashes, span hash, leaf.
    let mut member_hashes = Vec::with_capacity(events.len());
    for event in events {
        match event.compute_hash() {
            Ok(recomputed) => {
                if recomputed != event.hash {
                    errors.push(format!(
                        "span {span_id}: event {} content does not match its hash",
                        event.event_id
                    ));
                }
                member_hashes.push(recomputed);
            }
            Err(err) => errors.push(format!(
                "span {span_id}: event {} canonicalization failed: {err}",
                event.event_id
            )),
        }
    }
    match span.compute_hash(&member_hashes) {
        Ok(span_hash) => {
            if leaf_hash(&span_hash) != disclosed.proof.leaf_hash {
                errors.push(format!(
                    "span {span_id}: recomputed leaf hash does not match the proof"
                ));
            }
        }
        Err(err) => errors.push(format!(
            "span {span_id}: span canonicalization failed: {err}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SpanOptions, TraceBuilder};
    use poi_trace_spec::{EventPayload, Visibility};

    fn command(cmd: &str) -> EventPayload {
        EventPayload::Command {
            command: cmd.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
            exit_code: None,
        }
    }

    fn sample_bundle() -> (TraceBundle, Vec<String>) {
        let mut builder = TraceBuilder::new("agent").unwrap();
        let mut ids = Vec::new();
        for (name, visibility) in [
            ("setup", Visibility::Public),
            ("build", Visibility::Private),
            ("test", Visibility::Public),
        ] {
            let id = builder
                .add_span(
                    name,
                    SpanOptions {
                        visibility: Some(visibility),
                        ..Default::default()
                    },
                )
                .unwrap();
            builder.add_event(&id, command(name)).unwrap();
            ids.push(id);
        }
        (builder.finalize().unwrap(), ids)
    }

    #[test]
    fn membership_disclosure_carries_no_contents() {
        let (bundle, ids) = sample_bundle();
        let result =
            create_disclosure(&bundle, &[ids[1].as_str()], DisclosureMode::Membership).unwrap();
        assert_eq!(result.disclosed_spans.len(), 1);
        let disclosed = &result.disclosed_spans[0];
        assert!(disclosed.span.is_none());
        assert!(disclosed.events.is_none());

        let report = verify_disclosure(&result, &bundle.root_hash, &bundle.merkle_root);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn full_disclosure_round_trips() {
        let (bundle, ids) = sample_bundle();
        let result = create_disclosure(&bundle, &[ids[0].as_str()], DisclosureMode::Full).unwrap();
        let disclosed = &result.disclosed_spans[0];
        assert!(disclosed.span.is_some());
        assert_eq!(disclosed.events.as_ref().unwrap().len(), 1);

        let report = verify_disclosure(&result, &bundle.root_hash, &bundle.merkle_root);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn disclosure_of_multiple_spans_verifies() {
        let (bundle, ids) = sample_bundle();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let result = create_disclosure(&bundle, &id_refs, DisclosureMode::Full).unwrap();
        let report = verify_disclosure(&result, &bundle.root_hash, &bundle.merkle_root);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn unknown_span_is_a_policy_error() {
        let (bundle, _) = sample_bundle();
        let err =
            create_disclosure(&bundle, &["span-nope"], DisclosureMode::Membership).unwrap_err();
        assert!(matches!(err, TraceError::DisclosurePolicy(_)));
    }

    #[test]
    fn wrong_anchors_accumulate_both_errors() {
        let (bundle, ids) = sample_bundle();
        let result =
            create_disclosure(&bundle, &[ids[0].as_str()], DisclosureMode::Membership).unwrap();
        let report = verify_disclosure(&result, "bad-root", "bad-merkle");
        assert!(!report.valid);
        // Both anchor checks and the per-span root comparison fire.
        assert!(report.errors.len() >= 3, "errors: {:?}", report.errors);
    }

    #[test]
    fn tampered_disclosed_event_is_caught() {
        let (bundle, ids) = sample_bundle();
        let mut result =
            create_disclosure(&bundle, &[ids[0].as_str()], DisclosureMode::Full).unwrap();
        if let Some(events) = &mut result.disclosed_spans[0].events {
            if let EventPayload::Command { command, .. } = &mut events[0].payload {
                *command = "forged".into();
            }
        }
        let report = verify_disclosure(&result, &bundle.root_hash, &bundle.merkle_root);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("content does not match its hash")));
    }

    #[test]
    fn full_mode_without_contents_is_invalid() {
        let (bundle, ids) = sample_bundle();
        let mut result =
            create_disclosure(&bundle, &[ids[0].as_str()], DisclosureMode::Full).unwrap();
        result.disclosed_spans[0].span = None;
        let report = verify_disclosure(&result, &bundle.root_hash, &bundle.merkle_root);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("missing span or events")));
    }

    #[test]
    fn helper_queries_report_existence_and_position() {
        let (bundle, ids) = sample_bundle();
        assert!(can_disclose(&bundle, &ids[2]));
        assert!(!can_disclose(&bundle, "span-nope"));
        assert_eq!(span_index(&bundle, &ids[0]), Some(0));
        assert_eq!(span_index(&bundle, &ids[2]), Some(2));
        assert_eq!(span_index(&bundle, "span-nope"), None);
    }

    #[test]
    fn request_validates_span_existence() {
        let (bundle, ids) = sample_bundle();
        let request =
            create_disclosure_request(&bundle, &[ids[0].as_str()], DisclosureMode::Full).unwrap();
        assert_eq!(request.run_id, bundle.private_run.run_id);
        assert_eq!(request.span_ids, vec![ids[0].clone()]);
        assert!(matches!(
            create_disclosure_request(&bundle, &["span-nope"], DisclosureMode::Full),
            Err(TraceError::DisclosurePolicy(_))
        ));
    }

    #[test]
    fn disclosure_envelope_serializes_and_restores() {
        let (bundle, ids) = sample_bundle();
        let result = create_disclosure(&bundle, &[ids[1].as_str()], DisclosureMode::Full).unwrap();
        let encoded = serde_json::to_vec(&result).unwrap();
        let decoded: DisclosureResult = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(result, decoded);
    }
}
