//! # Youpin Auth Core
//!
//! Authenticated access to the Youpin open-platform gateway: deterministic
//! request signing and the device-verification handshake that mints the
//! "UK" token sent alongside ordinary requests.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        YOUPIN AUTH CORE MODULES                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────┐   ┌──────────────────────────────┐   │
//! │  │          Signing             │   │          Handshake           │   │
//! │  │                              │   │                              │   │
//! │  │ - SignatureRequest           │   │ - FingerprintBuilder         │   │
//! │  │ - canonicalize()             │   │ - HandshakeTransport         │   │
//! │  │ - RequestSigner              │   │ - ResponseClassifier         │   │
//! │  │ - verify_signature()         │   │ - FallbackDeriver            │   │
//! │  └──────────────┬───────────────┘   └──────────────┬───────────────┘   │
//! │                 │                                  │                   │
//! │                 └────────────────┬─────────────────┘                   │
//! │                                  │                                     │
//! │  ┌─────────────┐  ┌──────────────┴──┐  ┌─────────────┐  ┌───────────┐  │
//! │  │   Crypto    │  │    Gateway      │  │   Config    │  │   Token   │  │
//! │  │             │  │                 │  │             │  │           │  │
//! │  │ - RSA keys  │  │ - signed POST   │  │ - secrets   │  │ - UK      │  │
//! │  │ - AES-ECB   │  │ - uk header     │  │ - endpoints │  │ - policy  │  │
//! │  │ - key wrap  │  │                 │  │ - timeouts  │  │           │  │
//! │  └─────────────┘  └─────────────────┘  └─────────────┘  └───────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Signing and handshake configuration, secret sources
//! - [`time`] - Gateway civil time (UTC+08:00)
//! - [`crypto`] - RSA key material, the legacy handshake cipher, key wrapping
//! - [`signing`] - Canonical serialization and request signatures
//! - [`handshake`] - Device fingerprint exchange and token minting
//! - [`token`] - Verification tokens and their provenance
//! - [`gateway`] - Signed HTTP client for gateway endpoints
//!
//! ## Example
//!
//! ```ignore
//! use youpin_auth_core::{AuthConfig, GatewayClient, SignatureRequest};
//!
//! let config = AuthConfig::from_env()?;
//! let client = GatewayClient::from_config(&config)?;
//! let reply = client
//!     .call("/open/v1/api/goodsQuery", SignatureRequest::new().with("templateId", 553370))
//!     .await?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod handshake;
pub mod signing;
pub mod time;
pub mod token;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{AuthConfig, EnvSecret, FileSecret, HandshakeConfig, InlineSecret, SecretSource};
pub use crypto::{KeyEncapsulator, KeyMaterial, KeyPair, SymmetricKey};
pub use error::{Error, Result};
pub use gateway::GatewayClient;
pub use handshake::{
    DeviceProfile, FingerprintConfig, HandshakeClient, HandshakeOutcome, HandshakeState,
};
pub use signing::{verify_signature, RequestSigner, SignatureRequest, SignedEnvelope};
pub use time::GatewayTimestamp;
pub use token::{Provenance, TokenPolicy, VerificationToken};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Youpin Auth Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
