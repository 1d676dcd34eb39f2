//! Error taxonomy shared across the trace-commitment crates.

use crate::canonical::CanonError;
use thiserror::Error;

/// Failures surfaced by builders, verifiers, disclosure, and signing.
///
/// Builder paths reject eagerly and leave no partial state behind; a failed
/// append never advances a sequence counter or the rolling hash.
/// Verification paths do not return this type directly; they accumulate
/// every defect into a report so callers see the complete diagnostic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    /// A required field was missing or empty, or a payload was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A referenced span or event does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// An operation arrived in a state that forbids it (finalized run,
    /// closed span, non-running parent).
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// Canonical encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonError),
    /// A recomputed hash, root, or proof disagreed with its commitment.
    #[error("integrity failure: {0}")]
    Integrity(String),
    /// A disclosure was requested for data that cannot be disclosed.
    #[error("disclosure policy violation: {0}")]
    DisclosurePolicy(String),
    /// The signature provider failed or refused the payload.
    #[error("signature failure: {0}")]
    Signature(String),
}
