//! # Cryptography Module
//!
//! All cryptographic primitives used by the signer and the device handshake.
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 REQUEST SIGNING                                 │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  KeyMaterial (RSA-2048, PKCS#8, app key)                       │   │
//! │  │                                                                 │   │
//! │  │  canonical string ──SHA-256──► digest                          │   │
//! │  │  digest ──RSASSA-PKCS1-v1_5──► signature ──base64──► "sign"    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 DEVICE HANDSHAKE (hybrid)                       │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  SymmetricKey (16 random bytes)                                │   │
//! │  │       │                                                         │   │
//! │  │       ├──► LegacyHandshakeCipher (AES-128-ECB/PKCS#7)          │   │
//! │  │       │       fingerprint JSON ──► encryptedData                │   │
//! │  │       │                                                         │   │
//! │  │       └──► KeyEncapsulator (RSAES-PKCS1-v1_5, server key)      │   │
//! │  │               key bytes ──► encryptedAesKey                     │   │
//! │  │                                                                 │   │
//! │  │  The same SymmetricKey later decrypts the server's reply.      │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Notes
//!
//! - Private keys and symmetric keys are zeroized on drop and never logged
//! - The ECB cipher exists only for wire compatibility with the verification
//!   server and sits behind the [`SymmetricCipher`] seam

mod encapsulation;
mod keys;
mod legacy_cipher;

pub use encapsulation::{
    parse_public_key_pem, KeyEncapsulator, WrappedKey, DEFAULT_SERVER_PUBLIC_KEY_PEM,
    DEGRADED_WRAPPED_KEY_LEN,
};
pub use keys::{public_key_from_base64, KeyMaterial, KeyPair, KEY_BITS};
pub use legacy_cipher::{
    LegacyHandshakeCipher, SymmetricCipher, SymmetricKey, BLOCK_SIZE, SYMMETRIC_KEY_SIZE,
};
