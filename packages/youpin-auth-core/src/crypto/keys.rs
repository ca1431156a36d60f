//! # Key Material
//!
//! Loading and provisioning of the RSA key pair that signs gateway requests.
//!
//! ## Formats
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY FORMATS                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Private key (what the operator pastes into config)                    │
//! │  ─────────────────────────────────────────────────                     │
//! │  base64( PKCS#8 PrivateKeyInfo DER )                                   │
//! │  • RSA, 2048 bits                                                      │
//! │  • Whitespace and line breaks are ignored                              │
//! │  • Held in memory only, zeroized on drop                               │
//! │                                                                         │
//! │  Public key (what the vendor console expects)                          │
//! │  ────────────────────────────────────────────                          │
//! │  base64( X.509 SubjectPublicKeyInfo DER )                              │
//! │                                                                         │
//! │  Load pipeline                                                         │
//! │  ─────────────                                                         │
//! │                                                                         │
//! │  text ──strip ws──► base64 ──decode──► DER ──parse──► PrivateKeyInfo   │
//! │                       │                   │                 │          │
//! │                       ▼                   ▼                 ▼          │
//! │              MalformedEncoding   MalformedStructure   WrongKeyType     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey, PrivateKeyInfo};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, KeyParseError, Result};

/// Modulus size of provisioned keys
pub const KEY_BITS: usize = 2048;

/// A freshly generated key pair in the encoded form accepted by
/// [`KeyMaterial::load`].
///
/// ## Security
///
/// The private half is held in a [`Zeroizing`] buffer. Persisting it is the
/// caller's concern.
pub struct KeyPair {
    /// base64 PKCS#8 DER private key
    pub private_key: Zeroizing<String>,
    /// base64 SPKI DER public key
    pub public_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh 2048-bit RSA pair
    ///
    /// Round-tripping the result through [`KeyMaterial::load`] always succeeds.
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_der = private_key
            .to_pkcs8_der()
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let public_der = public_key
            .to_public_key_der()
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;

        tracing::info!(bits = KEY_BITS, "Generated RSA key pair");

        Ok(Self {
            private_key: Zeroizing::new(STANDARD.encode(private_der.as_bytes())),
            public_key: STANDARD.encode(public_der.as_bytes()),
        })
    }
}

/// The signing identity of the calling application: its vendor-issued app key
/// and the RSA private key registered for it.
///
/// Read-only after [`KeyMaterial::load`]; share it behind an `Arc` to sign
/// from any number of tasks.
#[derive(Clone)]
pub struct KeyMaterial {
    app_key: String,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("app_key", &self.app_key)
            .field("private_key", &"[REDACTED]")
            .field("modulus_bits", &(self.public_key.size() * 8))
            .finish()
    }
}

impl KeyMaterial {
    /// Load an encoded private key for `app_key`
    ///
    /// ## Parameters
    ///
    /// - `encoded_private_key`: base64 PKCS#8 DER, incidental whitespace allowed
    /// - `app_key`: the application identifier the key is registered under
    ///
    /// ## Errors
    ///
    /// One [`KeyParseError`] kind per failure stage, each carrying the length
    /// of the stripped input. A key that cannot be parsed is never replaced
    /// by a placeholder.
    pub fn load(encoded_private_key: &str, app_key: impl Into<String>) -> Result<Self> {
        let stripped: Zeroizing<String> = Zeroizing::new(
            encoded_private_key
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect(),
        );
        let input_len = stripped.len();

        let der = Zeroizing::new(STANDARD.decode(stripped.as_bytes()).map_err(|e| {
            KeyParseError::MalformedEncoding {
                input_len,
                reason: e.to_string(),
            }
        })?);

        let info = PrivateKeyInfo::try_from(der.as_slice()).map_err(|e| {
            KeyParseError::MalformedStructure {
                input_len,
                reason: e.to_string(),
            }
        })?;

        if info.algorithm.oid != rsa::pkcs1::ALGORITHM_OID {
            return Err(KeyParseError::WrongKeyType {
                input_len,
                algorithm: info.algorithm.oid.to_string(),
            }
            .into());
        }

        let private_key = RsaPrivateKey::try_from(info).map_err(|e| {
            KeyParseError::MalformedStructure {
                input_len,
                reason: e.to_string(),
            }
        })?;
        private_key
            .validate()
            .map_err(|e| KeyParseError::MalformedStructure {
                input_len,
                reason: e.to_string(),
            })?;

        let public_key = RsaPublicKey::from(&private_key);
        let material = Self {
            app_key: app_key.into(),
            private_key,
            public_key,
        };

        tracing::info!(
            app_key = %material.app_key,
            modulus_bits = material.public_key.size() * 8,
            fingerprint = %material.fingerprint(),
            "Loaded signing key"
        );

        Ok(material)
    }

    /// The vendor-issued application identifier
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// The private key (crate-internal, used by the signer)
    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// The public half
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Export the public half as base64 SPKI DER
    pub fn public_key_base64(&self) -> Result<String> {
        let der = self
            .public_key
            .to_public_key_der()
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    /// Short hex digest of the public key, safe to log
    pub fn fingerprint(&self) -> String {
        match self.public_key.to_public_key_der() {
            Ok(der) => hex::encode(&Sha256::digest(der.as_bytes())[..8]),
            Err(_) => String::from("unknown"),
        }
    }
}

/// Parse a base64 SPKI DER public key (whitespace allowed)
pub fn public_key_from_base64(encoded: &str) -> Result<RsaPublicKey> {
    let stripped: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(stripped.as_bytes())
        .map_err(|e| Error::InvalidKey(format!("public key is not valid base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| Error::InvalidKey(format!("public key is not valid SPKI DER: {e}")))
}

// ============================================================================
// TESTS
// ============================================================================
