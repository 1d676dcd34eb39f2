//! Chunked storage form of a finalized bundle.
//!
//! The private run is partitioned into content-addressed chunks, each
//! covering a contiguous range of spans (a span is never split). The
//! manifest indexes the chunks and carries only public-view data plus chunk
//! hashes, so it is safe to hand to the storage layer as-is. On disk the
//! layout is `manifest.json` at the storage root and `chunks/<hash>` for
//! each chunk; the core itself only ever emits in-memory buffers.

use crate::bundle::TraceBundle;
use crate::verify::VerificationReport;
use crate::view::PublicView;
use chrono::{DateTime, Utc};
use poi_trace_spec::hash::{hash_domain, MANIFEST_DOMAIN};
use poi_trace_spec::{canonicalize, hash_bytes, CanonError, TraceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Default chunk byte target.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Chunking knobs.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Soft byte target per chunk. A single span larger than the target
    /// still gets its own chunk.
    pub target_chunk_bytes: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

/// Index entry for one chunk, as listed in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    /// Position of the chunk in storage order.
    pub index: u64,
    /// Hash of the chunk content bytes.
    pub hash: String,
    /// Ids of the spans the chunk covers, in `span_seq` order.
    pub span_ids: Vec<String>,
    /// Content size in bytes.
    pub size: u64,
}

/// A materialized chunk: its index entry plus the content bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The manifest entry describing this chunk.
    pub entry: ChunkEntry,
    /// Canonical content bytes.
    pub bytes: Vec<u8>,
}

impl Chunk {
    /// Storage path relative to the manifest root.
    pub fn storage_name(&self) -> String {
        format!("chunks/{}", self.entry.hash)
    }
}

/// Public-safe index over the chunked storage of a bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Run identifier.
    pub run_id: String,
    /// Agent identity.
    pub agent_id: String,
    /// Root hash of the source bundle.
    pub root_hash: String,
    /// Merkle root of the source bundle.
    pub merkle_root: String,
    /// Span count of the full run.
    pub total_spans: u64,
    /// Event count of the full run.
    pub total_events: u64,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run end time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// The shareable projection of the run.
    pub public_view: PublicView,
    /// Chunk index in storage order.
    pub chunks: Vec<ChunkEntry>,
    /// Hash of this manifest (excluding this field).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,
}

impl Manifest {
    /// File name of the manifest at the storage root.
    pub const STORAGE_NAME: &'static str = "manifest.json";

    /// Hash of the manifest with the hash field itself excluded.
    pub fn compute_hash(&self) -> Result<String, CanonError> {
        let mut value = serde_json::to_value(self)
            .map_err(|err| CanonError::Unrepresentable(err.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.remove("manifestHash");
        }
        let bytes = canonicalize(&value)?;
        Ok(hash_domain(MANIFEST_DOMAIN, &[bytes.as_slice()]))
    }
}

/// The manifest plus its materialized chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSet {
    /// The public-safe index.
    pub manifest: Manifest,
    /// The content-addressed chunks in storage order.
    pub chunks: Vec<Chunk>,
}

/// Split a finalized bundle into chunks and build its manifest. The manifest
/// hash is written back into the bundle.
pub fn chunk_bundle(
    bundle: &mut TraceBundle,
    config: &ChunkerConfig,
) -> Result<ChunkSet, TraceError> {
    let run = &bundle.private_run;
    let target = config.target_chunk_bytes.max(1);

    // Encode each span (with its events) once, then group contiguous spans
    // until the running size would pass the target.
    let mut groups: Vec<(Vec<String>, Vec<Value>)> = Vec::new();
    let mut current_ids: Vec<String> = Vec::new();
    let mut current_docs: Vec<Value> = Vec::new();
    let mut current_size = 0usize;
    for span in &run.spans {
        let events: Vec<_> = run.events_of(span).into_iter().cloned().collect();
        let mut doc = serde_json::Map::new();
        doc.insert(
            "span".into(),
            serde_json::to_value(span).map_err(|err| CanonError::Unrepresentable(err.to_string()))?,
        );
        doc.insert(
            "events".into(),
            serde_json::to_value(&events)
                .map_err(|err| CanonError::Unrepresentable(err.to_string()))?,
        );
        let doc = Value::Object(doc);
        let doc_size = canonicalize(&doc)?.len();
        if !current_ids.is_empty() && current_size + doc_size > target {
            groups.push((
                std::mem::take(&mut current_ids),
                std::mem::take(&mut current_docs),
            ));
            current_size = 0;
        }
        current_ids.push(span.span_id.clone());
        current_docs.push(doc);
        current_size += doc_size;
    }
    if !current_ids.is_empty() {
        groups.push((current_ids, current_docs));
    }

    let mut chunks = Vec::with_capacity(groups.len());
    let mut entries = Vec::with_capacity(groups.len());
    for (index, (span_ids, docs)) in groups.into_iter().enumerate() {
        let bytes = canonicalize(&Value::Array(docs))?;
        let entry = ChunkEntry {
            index: index as u64,
            hash: hash_bytes(&bytes),
            span_ids,
            size: bytes.len() as u64,
        };
        entries.push(entry.clone());
        chunks.push(Chunk { entry, bytes });
    }

    let mut manifest = Manifest {
        run_id: run.run_id.clone(),
        agent_id: run.agent_id.clone(),
        root_hash: bundle.root_hash.clone(),
        merkle_root: bundle.merkle_root.clone(),
        total_spans: run.spans.len() as u64,
        total_events: run.events.len() as u64,
        started_at: run.started_at,
        ended_at: run.ended_at,
        public_view: bundle.public_view.clone(),
        chunks: entries,
        manifest_hash: None,
    };
    let manifest_hash = manifest.compute_hash()?;
    manifest.manifest_hash = Some(manifest_hash.clone());
    bundle.manifest_hash = Some(manifest_hash);
    debug!(
        run_id = %manifest.run_id,
        chunks = chunks.len(),
        "bundle chunked"
    );

    Ok(ChunkSet { manifest, chunks })
}

/// Re-verify a chunk set: chunk hashes and sizes against the index, the
/// span coverage, and the manifest hash. Defects accumulate.
pub fn verify_chunk_set(manifest: &Manifest, chunks: &[Chunk]) -> VerificationReport {
    let mut errors = Vec::new();
    let mut checks = 1u64;

    if manifest.chunks.len() != chunks.len() {
        errors.push(format!(
            "manifest lists {} chunks but {} were provided",
            manifest.chunks.len(),
            chunks.len()
        ));
    }
    for (entry, chunk) in manifest.chunks.iter().zip(chunks) {
        checks += 2;
        if hash_bytes(&chunk.bytes) != entry.hash || chunk.entry.hash != entry.hash {
            errors.push(format!("chunk {}: content does not match its hash", entry.index));
        }
        if chunk.bytes.len() as u64 != entry.size {
            errors.push(format!("chunk {}: size does not match the index", entry.index));
        }
    }

    checks += 1;
    match manifest.compute_hash() {
        Ok(recomputed) => {
            if manifest.manifest_hash.as_deref() != Some(recomputed.as_str()) {
                errors.push("manifest hash does not match recomputation".into());
            }
        }
        Err(err) => errors.push(format!("manifest canonicalization failed: {err}")),
    }

    VerificationReport {
        valid: errors.is_empty(),
        checks,
        errors,
    }
}
