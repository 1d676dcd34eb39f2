//! Signature capability binding an external signer to a bundle.
//!
//! Signatures are opt-in attribution: an unsigned bundle is already fully
//! verifiable against its internal commitments. The core only defines the
//! payload (a domain-separated canonical encoding of the bundle anchors) and
//! consumes a [`SignatureProvider`]; the algorithm lives behind the trait.
//! An Ed25519 provider is included so the path is exercised end-to-end.

use crate::bundle::TraceBundle;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use poi_trace_spec::hash::SIG_DOMAIN;
use poi_trace_spec::{canonicalize, TraceError};
use serde_json::json;

/// Externally supplied signing capability.
pub trait SignatureProvider {
    /// Opaque identity of the signer.
    fn signer_id(&self) -> &str;
    /// Sign a payload, returning raw signature bytes.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, TraceError>;
    /// Verify a signature over a payload for the given signer identity.
    fn verify(&self, payload: &[u8], signature: &[u8], signer_id: &str)
        -> Result<bool, TraceError>;
}

/// The bytes a bundle signature covers: the signature domain prefix followed
/// by the canonical encoding of the bundle anchors.
pub fn signature_payload(bundle: &TraceBundle) -> Result<Vec<u8>, TraceError> {
    let mut value = json!({
        "runId": bundle.private_run.run_id,
        "rootHash": bundle.root_hash,
        "merkleRoot": bundle.merkle_root,
    });
    if let Some(manifest_hash) = &bundle.manifest_hash {
        value["manifestHash"] = json!(manifest_hash);
    }
    let mut payload = SIG_DOMAIN.to_vec();
    payload.extend_from_slice(&canonicalize(&value)?);
    Ok(payload)
}

/// Sign a bundle, populating its signer id and hex-encoded signature.
pub fn sign_bundle(
    mut bundle: TraceBundle,
    provider: &dyn SignatureProvider,
) -> Result<TraceBundle, TraceError> {
    let payload = signature_payload(&bundle)?;
    let signature = provider.sign(&payload)?;
    bundle.signer_id = Some(provider.signer_id().to_string());
    bundle.signature = Some(hex::encode(signature));
    Ok(bundle)
}

/// Verify a signed bundle against a provider.
pub fn verify_bundle_signature(
    bundle: &TraceBundle,
    provider: &dyn SignatureProvider,
) -> Result<bool, TraceError> {
    let signer_id = bundle
        .signer_id
        .as_deref()
        .ok_or_else(|| TraceError::Signature("bundle carries no signer id".into()))?;
    let signature_hex = bundle
        .signature
        .as_deref()
        .ok_or_else(|| TraceError::Signature("bundle carries no signature".into()))?;
    let signature = hex::decode(signature_hex)
        .map_err(|err| TraceError::Signature(format!("signature is not valid hex: {err}")))?;
    let payload = signature_payload(bundle)?;
    provider.verify(&payload, &signature, signer_id)
}

/// Ed25519 signature provider. The signer id is the hex-encoded public key,
/// so any holder of the id can verify without extra key distribution.
pub struct Ed25519Provider {
    key: SigningKey,
    signer_id: String,
}

impl Ed25519Provider {
    /// Wrap a signing key.
    pub fn new(key: SigningKey) -> Self {
        let signer_id = hex::encode(key.verifying_key().to_bytes());
        Self { key, signer_id }
    }
}

impl SignatureProvider for Ed25519Provider {
    fn signer_id(&self) -> &str {
        &self.signer_id
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, TraceError> {
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        signer_id: &str,
    ) -> Result<bool, TraceError> {
        let key_bytes: [u8; 32] = hex::decode(signer_id)
            .map_err(|err| TraceError::Signature(format!("signer id is not valid hex: {err}")))?
            .try_into()
            .map_err(|_| TraceError::Signature("signer id is not an ed25519 public key".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|err| TraceError::Signature(format!("bad verifying key: {err}")))?;
        let signature: Signature = {
            let bytes: [u8; 64] = signature
                .try_into()
                .map_err(|_| TraceError::Signature("malformed signature bytes".into()))?;
            Signature::from_bytes(&bytes)
        };
        Ok(verifying_key.verify_strict(payload, &signature).is_ok())
    }
}

// The provider never exposes the secret key, but keep Debug from leaking it
// either.
impl std::fmt::Debug for Ed25519Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Provider")
            .field("signer_id", &self.signer_id)
            .finish_non_exhaustive()
    }
}
