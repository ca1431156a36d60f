//! Request signing.
//!
//! `SHA256withRSA` over the canonical string, PKCS#1 v1.5 padding, standard
//! base64 output.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::canonical::{
    canonicalize, to_compact_json, CanonicalString, SignatureRequest, SIGN_FIELD,
};
use crate::crypto::{public_key_from_base64, KeyMaterial};
use crate::error::{Error, Result};
use crate::time::GatewayTimestamp;

/// Envelope field carrying the application identifier
pub const APP_KEY_FIELD: &str = "appKey";

/// Envelope field carrying the request timestamp
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A parameter set with `appKey`, `timestamp` and `sign` attached.
///
/// Serializes as the flat JSON object the gateway expects. Built once per
/// outbound call; the timestamp makes it stale soon after.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SignedEnvelope {
    params: SignatureRequest,
    #[serde(skip)]
    canonical: CanonicalString,
}

impl SignedEnvelope {
    /// Base64 signature
    pub fn sign(&self) -> &str {
        self.str_field(SIGN_FIELD)
    }

    /// Application identifier
    pub fn app_key(&self) -> &str {
        self.str_field(APP_KEY_FIELD)
    }

    /// Request timestamp
    pub fn timestamp(&self) -> &str {
        self.str_field(TIMESTAMP_FIELD)
    }

    /// The string that was hashed and signed
    pub fn canonical(&self) -> &CanonicalString {
        &self.canonical
    }

    /// All parameters, including the three added fields
    pub fn params(&self) -> &SignatureRequest {
        &self.params
    }

    /// Consume into the parameter set
    pub fn into_params(self) -> SignatureRequest {
        self.params
    }

    /// Request body for the gateway
    ///
    /// Values are encoded exactly as they were when signed: integral floats
    /// lose their fraction and `<`, `>`, `&` are escaped.
    pub fn to_wire_json(&self) -> Result<String> {
        let object = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        to_compact_json(&Value::Object(object))
    }

    fn str_field(&self, key: &str) -> &str {
        self.params.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

/// Signs outbound gateway requests.
///
/// Holds no mutable state; clone it or share it freely across tasks.
///
/// ## Example
///
/// ```ignore
/// let keys = KeyMaterial::load(&private_key_b64, "123456")?;
/// let signer = RequestSigner::new(keys);
///
/// let params = SignatureRequest::new().with("idempotentId", "202212050001");
/// let envelope = signer.sign(params, &GatewayTimestamp::now())?;
/// ```
#[derive(Debug, Clone)]
pub struct RequestSigner {
    keys: Arc<KeyMaterial>,
}

impl RequestSigner {
    /// Create a signer owning its key material
    pub fn new(keys: KeyMaterial) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// Create a signer over shared key material
    pub fn from_shared(keys: Arc<KeyMaterial>) -> Self {
        Self { keys }
    }

    /// The key material in use
    pub fn key_material(&self) -> &KeyMaterial {
        &self.keys
    }

    /// Sign an already canonicalized string, returning base64
    ///
    /// ## Errors
    ///
    /// `Error::Signing` if the RSA primitive fails.
    pub fn sign_canonical(&self, canonical: &CanonicalString) -> Result<String> {
        let digest = Sha256::digest(canonical.as_bytes());

        // The RNG only blinds the private-key operation; v1.5 output is deterministic
        let signature = self
            .keys
            .private_key()
            .sign_with_rng(&mut OsRng, Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| Error::Signing(e.to_string()))?;

        Ok(STANDARD.encode(signature))
    }

    /// Canonicalize and sign a parameter set as-is, returning base64
    pub fn sign_params(&self, request: &SignatureRequest) -> Result<String> {
        self.sign_canonical(&canonicalize(request)?)
    }

    /// Build the signed envelope for one call
    ///
    /// `appKey` and `timestamp` are added before signing, so both are covered
    /// by the signature. Any `sign` already present is discarded.
    ///
    /// ## Errors
    ///
    /// `Error::Serialization` or `Error::Signing`; never a partially signed
    /// envelope.
    pub fn sign(
        &self,
        mut request: SignatureRequest,
        timestamp: &GatewayTimestamp,
    ) -> Result<SignedEnvelope> {
        request.remove(SIGN_FIELD);
        request.insert(APP_KEY_FIELD, self.keys.app_key());
        request.insert(TIMESTAMP_FIELD, timestamp.as_str());

        let canonical = canonicalize(&request)?;
        let signature = self.sign_canonical(&canonical)?;

        tracing::debug!(
            params = request.len(),
            canonical_len = canonical.as_str().len(),
            timestamp = %timestamp,
            "Signed gateway request"
        );

        request.insert(SIGN_FIELD, signature);
        Ok(SignedEnvelope {
            params: request,
            canonical,
        })
    }

    /// [`sign`](Self::sign) with the current gateway time
    pub fn sign_now(&self, request: SignatureRequest) -> Result<SignedEnvelope> {
        self.sign(request, &GatewayTimestamp::now())
    }
}

/// Verify a base64 signature over `request` against a base64 SPKI public key
///
/// `request` may be a full envelope; its `sign` field is ignored when the
/// canonical string is re-derived.
///
/// ## Errors
///
/// `Error::InvalidKey` for an unparseable key, `Error::VerificationFailed`
/// for a malformed or non-matching signature.
pub fn verify_signature(
    public_key_base64: &str,
    request: &SignatureRequest,
    signature_base64: &str,
) -> Result<()> {
    let public_key = public_key_from_base64(public_key_base64)?;
    verify_with_key(&public_key, request, signature_base64)
}

/// Verify a base64 signature over `request` with a parsed public key
pub fn verify_with_key(
    public_key: &RsaPublicKey,
    request: &SignatureRequest,
    signature_base64: &str,
) -> Result<()> {
    let signature = STANDARD
        .decode(signature_base64.trim())
        .map_err(|_| Error::VerificationFailed)?;
    let canonical = canonicalize(request)?;
    let digest = Sha256::digest(canonical.as_bytes());

    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|_| Error::VerificationFailed)
}

// ============================================================================
// TESTS
// ============================================================================
