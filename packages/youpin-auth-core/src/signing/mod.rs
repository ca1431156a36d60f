//! # Request Signing
//!
//! Deterministic signing of open-platform gateway calls.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SIGNING PIPELINE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  SignatureRequest ──+ appKey, timestamp──► canonicalize()              │
//! │                                                 │                       │
//! │                                                 ▼                       │
//! │                                          CanonicalString                │
//! │                                                 │                       │
//! │                                     SHA-256 + RSA PKCS#1 v1.5           │
//! │                                                 │                       │
//! │                                                 ▼                       │
//! │  SignedEnvelope = params + appKey + timestamp + sign (base64)          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Signing failures are always surfaced. A wrongly signed request looks
//! plausible to the caller and is rejected by the gateway.

pub mod canonical;
mod signer;

pub use canonical::{
    canonicalize, to_compact_json, CanonicalString, ReferenceFormatter, SignatureRequest,
    SIGN_FIELD,
};
pub use signer::{
    verify_signature, verify_with_key, RequestSigner, SignedEnvelope, APP_KEY_FIELD,
    TIMESTAMP_FIELD,
};
