//! # Error Handling
//!
//! Error types for the signing and handshake subsystem.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Config Errors (100)                                               │
//! │  │   ├── MissingConfig         - Required setting absent               │
//! │  │   ├── SecretUnavailable     - Secret source could not be read       │
//! │  │   └── InvalidConfig         - Setting present but unusable          │
//! │  │                                                                      │
//! │  ├── Key Errors (200)                                                  │
//! │  │   ├── KeyParse              - KeyParseError (encoding/structure/type)│
//! │  │   ├── KeyGeneration         - Fresh key pair could not be produced  │
//! │  │   └── InvalidKey            - Public key / key length problems      │
//! │  │                                                                      │
//! │  ├── Signing Errors (300)      ── ALWAYS SURFACED ──                   │
//! │  │   ├── Serialization         - Parameter value not canonicalizable   │
//! │  │   ├── Signing               - RSA primitive failure                 │
//! │  │   ├── VerificationFailed    - Signature does not verify             │
//! │  │   └── InvalidTimestamp      - Timestamp not in gateway format       │
//! │  │                                                                      │
//! │  ├── Handshake Errors (400)    ── DOWNGRADED TO FALLBACK TOKEN ──      │
//! │  │   ├── Encryption            - Fingerprint could not be encrypted    │
//! │  │   ├── Decryption            - DecryptionError (length/padding/...)  │
//! │  │   ├── Transport             - Network / status failure              │
//! │  │   ├── Timeout               - Exchange exceeded its deadline        │
//! │  │   ├── UnrecognizedResponse  - No parser strategy matched            │
//! │  │   ├── ServerRejected        - Server replied with an error code     │
//! │  │   └── TokenNotFound         - Decrypted reply carries no token      │
//! │  │                                                                      │
//! │  └── Gateway Errors (500)                                              │
//! │      ├── Gateway               - Non-2xx reply from the API gateway    │
//! │      └── DegradedToken         - Fallback token refused by policy      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Signing failures propagate to the caller: a wrongly signed request looks
//! plausible, gets rejected, and may trip anti-abuse detection on the gateway.
//! Handshake failures never escape [`crate::handshake::HandshakeClient::mint`];
//! they are recorded on the outcome and replaced by a marked fallback token.

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Config Errors (100-199)
    // ========================================================================
    /// A required configuration value is absent
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// A secret source could not produce its value
    #[error("Secret unavailable from {source_name}: {reason}")]
    SecretUnavailable {
        /// Human-readable description of the source (never the secret)
        source_name: String,
        /// Why the read failed
        reason: String,
    },

    /// A configuration value is present but unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Key Errors (200-299)
    // ========================================================================
    /// The encoded private key could not be loaded
    #[error(transparent)]
    KeyParse(#[from] KeyParseError),

    /// Key pair generation or export failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Invalid public key or key length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Signing Errors (300-399)
    // ========================================================================
    /// A parameter value cannot be canonicalized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The RSA signing primitive failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Signature verification failed
    #[error("Signature verification failed")]
    VerificationFailed,

    /// A timestamp is not in `YYYY-MM-DD HH:mm:ss` form
    #[error("Invalid gateway timestamp {0:?}: expected YYYY-MM-DD HH:mm:ss")]
    InvalidTimestamp(String),

    // ========================================================================
    // Handshake Errors (400-499)
    // ========================================================================
    /// The fingerprint could not be encrypted
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// A handshake ciphertext could not be decrypted
    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    /// Network, TLS or HTTP status failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The exchange exceeded its deadline
    #[error("Handshake timed out after {0} seconds")]
    Timeout(u64),

    /// No response strategy recognised the server reply
    #[error("Unrecognized handshake response: {0}")]
    UnrecognizedResponse(String),

    /// The server replied with an explicit error
    #[error("Handshake rejected by server (code {code}): {message}")]
    ServerRejected {
        /// Server-side error code
        code: i64,
        /// Server-side message
        message: String,
    },

    /// A reply decrypted cleanly but carries no token
    #[error("No verification token in handshake reply")]
    TokenNotFound,

    // ========================================================================
    // Gateway Errors (500-599)
    // ========================================================================
    /// The API gateway answered with a non-success status
    #[error("Gateway returned HTTP {status}: {body}")]
    Gateway {
        /// HTTP status code
        status: u16,
        /// Response body (as text)
        body: String,
    },

    /// A locally derived token was offered where policy demands a server token
    #[error("Refusing to use a local-fallback verification token")]
    DegradedToken,
}

/// Failure to load an encoded private key.
///
/// Every variant reports the length of the (whitespace-stripped) input so
/// operators can spot truncated pastes without the key itself being echoed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// The input is not valid standard base-64
    #[error("Private key is not valid base64 ({input_len} chars): {reason}")]
    MalformedEncoding {
        /// Length of the stripped input
        input_len: usize,
        /// Decoder message
        reason: String,
    },

    /// Decodes, but is not a parseable PKCS#8 RSA private key container
    #[error("Private key is not a valid PKCS#8 container ({input_len} chars): {reason}")]
    MalformedStructure {
        /// Length of the stripped input
        input_len: usize,
        /// Parser message
        reason: String,
    },

    /// Parses as PKCS#8, but the algorithm is not RSA
    #[error("Private key is not an RSA key ({input_len} chars, algorithm {algorithm})")]
    WrongKeyType {
        /// Length of the stripped input
        input_len: usize,
        /// Algorithm OID found in the container
        algorithm: String,
    },
}

impl KeyParseError {
    /// Length of the input that failed to load
    pub fn input_len(&self) -> usize {
        match self {
            KeyParseError::MalformedEncoding { input_len, .. }
            | KeyParseError::MalformedStructure { input_len, .. }
            | KeyParseError::WrongKeyType { input_len, .. } => *input_len,
        }
    }
}

/// Failure to decrypt a legacy-cipher payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    /// The transport encoding is not valid base-64
    #[error("Ciphertext is not valid base64: {0}")]
    InvalidBase64(String),

    /// Ciphertext length is zero or not a multiple of the block size
    #[error("Ciphertext length {0} is not a nonzero multiple of 16")]
    BadLength(usize),

    /// Trailing PKCS#7 padding is malformed
    #[error("Invalid PKCS#7 padding")]
    BadPadding,

    /// Plaintext is not UTF-8 / structured data
    #[error("Decrypted payload is not valid JSON: {0}")]
    InvalidPlaintext(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Codes are organized by category:
    /// - 100-199: Configuration
    /// - 200-299: Keys
    /// - 300-399: Signing
    /// - 400-499: Handshake
    /// - 500-599: Gateway
    pub fn code(&self) -> i32 {
        match self {
            Error::MissingConfig(_) => 100,
            Error::SecretUnavailable { .. } => 101,
            Error::InvalidConfig(_) => 102,

            Error::KeyParse(KeyParseError::MalformedEncoding { .. }) => 200,
            Error::KeyParse(KeyParseError::MalformedStructure { .. }) => 201,
            Error::KeyParse(KeyParseError::WrongKeyType { .. }) => 202,
            Error::KeyGeneration(_) => 203,
            Error::InvalidKey(_) => 204,

            Error::Serialization(_) => 300,
            Error::Signing(_) => 301,
            Error::VerificationFailed => 302,
            Error::InvalidTimestamp(_) => 303,

            Error::Encryption(_) => 400,
            Error::Decryption(_) => 401,
            Error::Transport(_) => 402,
            Error::Timeout(_) => 403,
            Error::UnrecognizedResponse(_) => 404,
            Error::ServerRejected { .. } => 405,
            Error::TokenNotFound => 406,

            Error::Gateway { .. } => 500,
            Error::DegradedToken => 501,
        }
    }

    /// Check if this error is recovered locally by the handshake fallback
    ///
    /// Handshake-category failures never halt the caller; everything else
    /// (keys, signing, gateway) is surfaced.
    pub fn is_recoverable(&self) -> bool {
        (400..500).contains(&self.code())
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report the configured deadline
            Error::Timeout(0)
        } else {
            Error::Transport(err.to_string())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
