//! Trace-commitment engine: run building, span Merkle proofs, public-view
//! projection, selective disclosure, chunked storage, and bundle signing.
//!
//! The flow is linear: a [`TraceBuilder`] drives a run (spans, events,
//! rolling hash), `finalize` freezes it into a [`TraceBundle`] carrying a
//! Merkle root over the span hashes and a root hash binding both
//! commitments, and everything downstream ([`verify_bundle`], disclosure,
//! the chunker) reads the frozen bundle only.
#![deny(missing_docs)]

/// Run builder and span lifecycle.
pub mod builder;
/// Finalized bundle, serialization, and the finalizer.
pub mod bundle;
/// Selective disclosure generation and verification.
pub mod disclosure;
/// Chunked storage form and its manifest.
pub mod manifest;
/// Span Merkle tree and inclusion proofs.
pub mod merkle;
/// Signature capability and the Ed25519 adapter.
pub mod signing;
/// Full bundle re-verification.
pub mod verify;
/// Public-view projection.
pub mod view;

pub use builder::{SpanOptions, TraceBuilder};
pub use bundle::{deserialize_bundle, serialize_bundle, TraceBundle};
pub use disclosure::{
    can_disclose, create_disclosure, create_disclosure_request, span_index, verify_disclosure,
    DisclosedSpan, DisclosureMode, DisclosureRequest, DisclosureResult,
};
pub use manifest::{
    chunk_bundle, verify_chunk_set, Chunk, ChunkEntry, ChunkSet, ChunkerConfig, Manifest,
};
pub use merkle::{leaf_hash, verify_proof, MerkleProof, MerkleTree, ProofNode, ProofSide};
pub use signing::{
    sign_bundle, signature_payload, verify_bundle_signature, Ed25519Provider, SignatureProvider,
};
pub use verify::{verify_bundle, VerificationReport};
pub use view::{AnnotatedSpan, PublicView, RedactedSpan};
