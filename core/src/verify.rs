//! Full re-verification of a finalized bundle.
//!
//! Replays every commitment from the raw data: event hashes, the
//! rolling-hash chain, span hashes, the Merkle root, the root hash, and the
//! public/redacted partition. Defects are accumulated, never short-circuited,
//! so a caller inspecting a tampered bundle sees the complete diagnostic in
//! one pass.

use crate::bundle::TraceBundle;
use crate::merkle::MerkleTree;
use poi_trace_spec::{derive_root_hash, RollingHash, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Outcome of re-verifying a bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// True when no check failed.
    pub valid: bool,
    /// Number of checks performed.
    pub checks: u64,
    /// One entry per failed check.
    pub errors: Vec<String>,
}

/// Re-verify every commitment in `bundle`.
pub fn verify_bundle(bundle: &TraceBundle) -> VerificationReport {
    let mut errors = Vec::new();
    let mut checks = 0u64;
    let run = &bundle.private_run;

    // Event stream: contiguous seq values and sealed hashes.
    for (i, event) in run.events.iter().enumerate() {
        checks += 2;
        if event.seq != i as u64 {
            errors.push(format!(
                "event {}: seq {} does not match stream position {i}",
                event.event_id, event.seq
            ));
        }
        match event.compute_hash() {
            Ok(recomputed) if recomputed == event.hash => {}
            Ok(_) => errors.push(format!(
                "event {} (seq {}): stored hash does not match recomputed content",
                event.event_id, event.seq
            )),
            Err(err) => errors.push(format!(
                "event {} (seq {}): canonicalization failed: {err}",
                event.event_id, event.seq
            )),
        }
    }

    // Rolling hash over the stored event hashes.
    checks += 1;
    if !RollingHash::verify(
        run.events.iter().map(|e| e.hash.as_str()),
        &run.rolling_hash,
    ) {
        errors.push("rolling hash chain does not reproduce the stored head".into());
    }

    // Spans: contiguous span_seq, member links, and span hashes.
    let event_hash_by_id: HashMap<&str, &str> = run
        .events
        .iter()
        .map(|e| (e.event_id.as_str(), e.hash.as_str()))
        .collect();
    let mut span_hashes = Vec::with_capacity(run.spans.len());
    for (j, span) in run.spans.iter().enumerate() {
        checks += 2;
        if span.span_seq != j as u64 {
            errors.push(format!(
                "span {}: span_seq {} does not match creation position {j}",
                span.span_id, span.span_seq
            ));
        }
        let mut members = Vec::with_capacity(span.event_ids.len());
        for event_id in &span.event_ids {
            match event_hash_by_id.get(event_id.as_str()) {
                Some(hash) => members.push((*hash).to_string()),
                None => errors.push(format!(
                    "span {}: member event {event_id} is not in the run",
                    span.span_id
                )),
            }
        }
        match &span.hash {
            None => {
                errors.push(format!("span {}: no span hash recorded", span.span_id));
                span_hashes.push(String::new());
            }
            Some(stored) => {
                match span.compute_hash(&members) {
                    Ok(recomputed) if &recomputed == stored => {}
                    Ok(_) => errors.push(format!(
                        "span {}: stored hash does not match recomputed header and members",
                        span.span_id
                    )),
                    Err(err) => errors.push(format!(
                        "span {}: canonicalization failed: {err}",
                        span.span_id
                    )),
                }
                span_hashes.push(stored.clone());
            }
        }
    }

    // Merkle root over the stored span hashes.
    checks += 1;
    if MerkleTree::from_span_hashes(&span_hashes).root() != bundle.merkle_root {
        errors.push("merkle root does not reproduce from the span hashes".into());
    }

    // Root hash binding both commitments to the run identity.
    checks += 1;
    match derive_root_hash(
        &run.rolling_hash,
        &bundle.merkle_root,
        &run.run_id,
        run.schema_version,
    ) {
        Ok(derived) => {
            if derived != bundle.root_hash {
                errors.push("root hash does not bind the stored commitments".into());
            }
            if run.root_hash.as_deref() != Some(bundle.root_hash.as_str()) {
                errors.push("run root hash disagrees with the bundle root hash".into());
            }
        }
        Err(err) => errors.push(format!("root hash derivation failed: {err}")),
    }

    // Public view: verbatim roots, full-run counts, and the partition of the
    // span set into public and redacted.
    let view = &bundle.public_view;
    checks += 3;
    if view.root_hash != bundle.root_hash || view.merkle_root != bundle.merkle_root {
        errors.push("public view roots are not verbatim copies".into());
    }
    if view.total_spans != run.spans.len() as u64 || view.total_events != run.events.len() as u64 {
        errors.push("public view counts do not reflect the full run".into());
    }
    let all_ids: HashSet<&str> = run.spans.iter().map(|s| s.span_id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut partition_ok = view.public_spans.len() + view.redacted_span_hashes.len()
        == run.spans.len();
    for annotated in &view.public_spans {
        let id = annotated.span.span_id.as_str();
        partition_ok &= all_ids.contains(id) && seen.insert(id);
        partition_ok &= annotated.span.visibility == Visibility::Public;
        partition_ok &= annotated
            .events
            .iter()
            .all(|e| e.visibility == Visibility::Public);
    }
    for redacted in &view.redacted_span_hashes {
        let id = redacted.span_id.as_str();
        partition_ok &= all_ids.contains(id) && seen.insert(id);
        partition_ok &= run
            .span(id)
            .map(|s| s.visibility != Visibility::Public && s.hash.as_deref() == Some(redacted.span_hash.as_str()))
            .unwrap_or(false);
    }
    if !partition_ok {
        errors.push("public and redacted spans do not partition the span set".into());
    }

    VerificationReport {
        valid: errors.is_empty(),
        checks,
        errors,
    }
}
