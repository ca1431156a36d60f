//! # Device Handshake
//!
//! Mints the device verification token (the "UK") by sending an encrypted
//! browser-style fingerprint to the verification server.
//!
//! ## Protocol
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        HANDSHAKE STATE MACHINE                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Built ──► Encrypted ──► KeyWrapped ──► Sent ──┬──► PlainAccepted      │
//! │    │           │              │                │                        │
//! │    │           │              │                ├──► EncryptedAccepted   │
//! │    │           │              │                │         │              │
//! │    │           │              │                │         ▼              │
//! │    │           │              │                │      Decrypted         │
//! │    │           │              │                │                        │
//! │    └───────────┴──────────────┴────────────────┴──► Rejected            │
//! │                                                          │              │
//! │                                                          ▼              │
//! │                                              FallbackDeriver            │
//! │                                              (local-fallback token)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! 1. [`FingerprintBuilder`] assembles the fingerprint record
//! 2. A fresh [`SymmetricKey`] encrypts its JSON (`encryptedData`)
//! 3. [`KeyEncapsulator`] wraps the key for the server (`encryptedAesKey`)
//! 4. [`HandshakeTransport`] performs the single exchange
//! 5. [`ResponseClassifier`] recognises the reply, [`ResponseDecryptor`]
//!    reverses encrypted ones with the same key
//!
//! Any failure after step 1 ends in `Rejected` and a token from
//! [`FallbackDeriver`]. [`HandshakeClient::mint`] therefore never fails; the
//! token's provenance tells callers what they got.

pub mod fallback;
pub mod fingerprint;
pub mod response;
pub mod transport;

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

pub use fallback::{FallbackDeriver, FingerprintPrefix};
pub use fingerprint::{DeviceFingerprint, FingerprintBuilder, FingerprintConfig};
pub use response::{
    extract_token, HandshakeResponse, RawReply, ResponseClassifier, ResponseDecryptor,
    ResponseStrategy,
};
pub use transport::{HandshakeRequestBody, HandshakeTransport, HttpTransport};

use crate::config::HandshakeConfig;
use crate::crypto::{KeyEncapsulator, LegacyHandshakeCipher, SymmetricCipher, SymmetricKey};
use crate::error::{Error, Result};
use crate::token::VerificationToken;

/// Where a handshake attempt got to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakeState {
    Built,
    Encrypted,
    KeyWrapped,
    Sent,
    PlainAccepted,
    EncryptedAccepted,
    Decrypted,
    Rejected,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeState::Built => "built",
            HandshakeState::Encrypted => "encrypted",
            HandshakeState::KeyWrapped => "key-wrapped",
            HandshakeState::Sent => "sent",
            HandshakeState::PlainAccepted => "plain-accepted",
            HandshakeState::EncryptedAccepted => "encrypted-accepted",
            HandshakeState::Decrypted => "decrypted",
            HandshakeState::Rejected => "rejected",
        }
    }

    /// States that end with a server-issued token
    pub fn is_success(&self) -> bool {
        matches!(self, HandshakeState::PlainAccepted | HandshakeState::Decrypted)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied inputs for one handshake
#[derive(Debug, Clone, Default)]
pub struct DeviceProfile {
    pub config: FingerprintConfig,
    /// Previously issued UK to present again
    pub existing_uk: Option<String>,
    pub user_id: Option<String>,
    /// Fixed handshake key; a fresh random one is generated when absent
    pub symmetric_key: Option<SymmetricKey>,
}

impl DeviceProfile {
    pub fn new(config: FingerprintConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_existing_uk(mut self, uk: impl Into<String>) -> Self {
        self.existing_uk = Some(uk.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_symmetric_key(mut self, key: SymmetricKey) -> Self {
        self.symmetric_key = Some(key);
        self
    }
}

/// Result of [`HandshakeClient::mint`]
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub token: VerificationToken,
    pub final_state: HandshakeState,
    /// Every state visited, in order
    pub trace: Vec<HandshakeState>,
    /// What sent the attempt to the fallback, if anything did
    pub failure: Option<Error>,
}

impl HandshakeOutcome {
    pub fn is_server_issued(&self) -> bool {
        self.token.is_server_issued()
    }
}

/// Runs the device handshake over a [`HandshakeTransport`]
pub struct HandshakeClient<T = HttpTransport, C = LegacyHandshakeCipher> {
    transport: T,
    cipher: C,
    decryptor: ResponseDecryptor<C>,
    encapsulator: KeyEncapsulator,
    classifier: ResponseClassifier,
    fallback: FallbackDeriver,
    timeout: Duration,
}

impl HandshakeClient<HttpTransport, LegacyHandshakeCipher> {
    /// Client over HTTP for the given configuration
    pub fn new(config: &HandshakeConfig) -> Result<Self> {
        Ok(Self::with_transport(HttpTransport::new(config)?, config))
    }
}

impl<T: HandshakeTransport> HandshakeClient<T, LegacyHandshakeCipher> {
    /// Client over an arbitrary transport
    ///
    /// Takes the server key and exchange deadline from `config`; the
    /// endpoint is the transport's concern.
    pub fn with_transport(transport: T, config: &HandshakeConfig) -> Self {
        Self {
            transport,
            cipher: LegacyHandshakeCipher,
            decryptor: ResponseDecryptor::new(LegacyHandshakeCipher),
            encapsulator: KeyEncapsulator::from_pem(&config.server_public_key_pem),
            classifier: ResponseClassifier::default(),
            fallback: FallbackDeriver,
            timeout: config.timeout,
        }
    }
}

impl<T, C> HandshakeClient<T, C>
where
    T: HandshakeTransport,
    C: SymmetricCipher + Clone + Send + Sync,
{
    /// Swap the symmetric cipher used for both directions
    pub fn with_cipher<C2: SymmetricCipher + Clone>(self, cipher: C2) -> HandshakeClient<T, C2> {
        HandshakeClient {
            transport: self.transport,
            decryptor: ResponseDecryptor::new(cipher.clone()),
            cipher,
            encapsulator: self.encapsulator,
            classifier: self.classifier,
            fallback: self.fallback,
            timeout: self.timeout,
        }
    }

    pub fn with_encapsulator(mut self, encapsulator: KeyEncapsulator) -> Self {
        self.encapsulator = encapsulator;
        self
    }

    pub fn with_classifier(mut self, classifier: ResponseClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mint a verification token for `profile`
    ///
    /// Never fails: if the server does not issue a token the outcome carries
    /// a local-fallback token and the triggering error in `failure`.
    pub async fn mint(&self, profile: &DeviceProfile) -> HandshakeOutcome {
        let fingerprint = FingerprintBuilder::new().build(
            &profile.config,
            profile.existing_uk.as_deref(),
            profile.user_id.as_deref(),
        );
        let key = profile.symmetric_key.clone().unwrap_or_else(SymmetricKey::generate);

        let mut trace = Vec::with_capacity(6);
        let mut encrypted_data = String::new();
        advance(&mut trace, HandshakeState::Built);

        match self.attempt(&fingerprint, &key, &mut trace, &mut encrypted_data).await {
            Ok(token) => {
                let final_state = trace.last().copied().unwrap_or(HandshakeState::Built);
                tracing::info!(
                    state = %final_state,
                    token = %token.redacted(),
                    "Device verification token issued by server"
                );
                HandshakeOutcome {
                    token,
                    final_state,
                    trace,
                    failure: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    code = e.code(),
                    reason = %e,
                    "Handshake rejected, deriving local fallback token"
                );
                advance(&mut trace, HandshakeState::Rejected);
                let prefix = FingerprintPrefix::new(&encrypted_data, &fingerprint);
                HandshakeOutcome {
                    token: self.fallback.derive(&prefix),
                    final_state: HandshakeState::Rejected,
                    trace,
                    failure: Some(e),
                }
            }
        }
    }

    async fn attempt(
        &self,
        fingerprint: &DeviceFingerprint,
        key: &SymmetricKey,
        trace: &mut Vec<HandshakeState>,
        encrypted_data: &mut String,
    ) -> Result<VerificationToken> {
        let plaintext = fingerprint.to_json()?;
        *encrypted_data = STANDARD.encode(self.cipher.encrypt(plaintext.as_bytes(), key));
        advance(trace, HandshakeState::Encrypted);

        let wrapped = self.encapsulator.wrap(key)?;
        advance(trace, HandshakeState::KeyWrapped);

        let body = HandshakeRequestBody {
            encrypted_data: encrypted_data.clone(),
            encrypted_aes_key: wrapped.to_base64(),
        };

        let reply = match tokio::time::timeout(self.timeout, self.transport.exchange(&body)).await {
            Ok(reply) => reply?,
            Err(_) => return Err(Error::Timeout(self.timeout.as_secs())),
        };
        advance(trace, HandshakeState::Sent);

        match self.classifier.classify(&reply) {
            HandshakeResponse::PlainSuccess { uk } => {
                advance(trace, HandshakeState::PlainAccepted);
                Ok(VerificationToken::server_issued(uk))
            }
            HandshakeResponse::EncryptedSuccess { cipher_field, device_uk } => {
                advance(trace, HandshakeState::EncryptedAccepted);
                let value = self.decryptor.decrypt(&cipher_field, key)?;
                let uk = extract_token(&value).ok_or(Error::TokenNotFound)?;
                if let Some(marker) = device_uk.as_deref() {
                    tracing::debug!(device_uk_len = marker.len(), "Reply carried deviceUk marker");
                }
                advance(trace, HandshakeState::Decrypted);
                Ok(VerificationToken::server_issued(uk))
            }
            HandshakeResponse::Error { code, message } => {
                Err(Error::ServerRejected { code, message })
            }
            HandshakeResponse::Unrecognized { raw_bytes, reason } => {
                Err(Error::UnrecognizedResponse(format!(
                    "{reason} ({} bytes)",
                    raw_bytes.len()
                )))
            }
        }
    }
}

impl<T, C> fmt::Debug for HandshakeClient<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeClient")
            .field("encapsulator", &self.encapsulator)
            .field("classifier", &self.classifier)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn advance(trace: &mut Vec<HandshakeState>, state: HandshakeState) {
    tracing::debug!(state = %state, "Handshake state");
    trace.push(state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SYMMETRIC_KEY_SIZE;
    use crate::error::DecryptionError;
    use crate::token::Provenance;
    use async_trait::async_trait;
    use rand::{rngs::StdRng, SeedableRng};
    use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};

    use HandshakeState::*;

    fn server_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let mut rng = StdRng::seed_from_u64(0x5eed);
            RsaPrivateKey::new(&mut rng, 1024).unwrap()
        })
    }

    fn config(timeout: Duration) -> HandshakeConfig {
        HandshakeConfig {
            timeout,
            ..HandshakeConfig::default()
        }
    }

    /// Replies with a fixed body
    struct Canned(RawReply);

    #[async_trait]
    impl HandshakeTransport for Canned {
        async fn exchange(&self, _body: &HandshakeRequestBody) -> Result<RawReply> {
            Ok(self.0.clone())
        }
    }

    /// Never answers in time
    struct Stalled;

    #[async_trait]
    impl HandshakeTransport for Stalled {
        async fn exchange(&self, _body: &HandshakeRequestBody) -> Result<RawReply> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RawReply::new(200, b"{}".to_vec()))
        }
    }

    /// Plays the server: unwraps the key, reads the fingerprint and answers
    /// with an encrypted token
    #[derive(Default)]
    struct FakeServer {
        seen: Mutex<Option<Value>>,
    }

    #[async_trait]
    impl HandshakeTransport for FakeServer {
        async fn exchange(&self, body: &HandshakeRequestBody) -> Result<RawReply> {
            let wrapped = STANDARD.decode(&body.encrypted_aes_key).unwrap();
            let raw_key = server_key().decrypt(Pkcs1v15Encrypt, &wrapped).unwrap();
            let key_bytes: [u8; SYMMETRIC_KEY_SIZE] = raw_key.try_into().unwrap();
            let key = SymmetricKey::from_bytes(key_bytes);

            let ciphertext = STANDARD.decode(&body.encrypted_data).unwrap();
            let plaintext = LegacyHandshakeCipher.decrypt(&ciphertext, &key).unwrap();
            *self.seen.lock().unwrap() = Some(serde_json::from_slice(&plaintext).unwrap());

            let reply = json!({"uk": "server-minted-uk"}).to_string();
            let u = STANDARD.encode(LegacyHandshakeCipher.encrypt(reply.as_bytes(), &key));
            let body = json!({"u": u, "deviceUk": "x"}).to_string();
            Ok(RawReply::new(200, body.into_bytes()))
        }
    }

    #[derive(Clone, Default)]
    struct CountingCipher {
        decrypts: Arc<AtomicUsize>,
    }

    impl SymmetricCipher for CountingCipher {
        fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Vec<u8> {
            LegacyHandshakeCipher.encrypt(plaintext, key)
        }

        fn decrypt(
            &self,
            ciphertext: &[u8],
            key: &SymmetricKey,
        ) -> std::result::Result<Vec<u8>, DecryptionError> {
            self.decrypts.fetch_add(1, Ordering::SeqCst);
            LegacyHandshakeCipher.decrypt(ciphertext, key)
        }
    }

    fn fake_server_encapsulator() -> KeyEncapsulator {
        KeyEncapsulator::from_public_key(RsaPublicKey::from(server_key()))
    }

    #[tokio::test]
    async fn test_plain_reply_skips_decryption() {
        let cipher = CountingCipher::default();
        let counter = cipher.decrypts.clone();
        let reply = RawReply::new(200, br#"{"code":0,"data":{"uk":"abc123"}}"#.to_vec());
        let client = HandshakeClient::with_transport(Canned(reply), &config(Duration::from_secs(5)))
            .with_encapsulator(fake_server_encapsulator())
            .with_cipher(cipher);

        let outcome = client.mint(&DeviceProfile::default()).await;

        assert_eq!(outcome.token, VerificationToken::server_issued("abc123"));
        assert_eq!(outcome.final_state, PlainAccepted);
        assert_eq!(outcome.trace, vec![Built, Encrypted, KeyWrapped, Sent, PlainAccepted]);
        assert!(outcome.failure.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_encrypted_reply_round_trip_through_fake_server() {
        let server = FakeServer::default();
        let client = HandshakeClient::with_transport(server, &config(Duration::from_secs(5)))
            .with_encapsulator(fake_server_encapsulator());

        let profile = DeviceProfile::default()
            .with_user_id("10086")
            .with_existing_uk("old-uk");
        let outcome = client.mint(&profile).await;

        assert!(outcome.is_server_issued());
        assert_eq!(outcome.token.expose(), "server-minted-uk");
        assert_eq!(outcome.final_state, Decrypted);
        assert_eq!(
            outcome.trace,
            vec![Built, Encrypted, KeyWrapped, Sent, EncryptedAccepted, Decrypted]
        );

        let seen = client.transport().seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen["userId"], "10086");
        assert_eq!(seen["uk"], "old-uk");
        assert_eq!(seen.as_object().unwrap().len(), 38);
    }

    #[tokio::test]
    async fn test_timeout_yields_local_fallback() {
        let client = HandshakeClient::with_transport(Stalled, &config(Duration::from_millis(50)))
            .with_encapsulator(fake_server_encapsulator());

        let outcome = client.mint(&DeviceProfile::default()).await;

        assert_eq!(outcome.token.provenance(), Provenance::LocalFallback);
        assert_eq!(outcome.token.expose().len(), 64);
        assert_eq!(outcome.final_state, Rejected);
        assert_eq!(outcome.trace, vec![Built, Encrypted, KeyWrapped, Rejected]);
        assert!(matches!(outcome.failure, Some(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_server_error_reply_falls_back() {
        let reply = RawReply::new(200, br#"{"code":1001,"msg":"device banned"}"#.to_vec());
        let client = HandshakeClient::with_transport(Canned(reply), &config(Duration::from_secs(5)))
            .with_encapsulator(fake_server_encapsulator());

        let outcome = client.mint(&DeviceProfile::default()).await;

        assert!(!outcome.is_server_issued());
        assert_eq!(outcome.trace, vec![Built, Encrypted, KeyWrapped, Sent, Rejected]);
        match outcome.failure {
            Some(Error::ServerRejected { code, message }) => {
                assert_eq!(code, 1001);
                assert_eq!(message, "device banned");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecryptable_reply_falls_back() {
        let reply = RawReply::new(200, br#"{"u":"AAAA","deviceUk":""}"#.to_vec());
        let client = HandshakeClient::with_transport(Canned(reply), &config(Duration::from_secs(5)))
            .with_encapsulator(fake_server_encapsulator());

        let outcome = client.mint(&DeviceProfile::default()).await;

        assert_eq!(outcome.token.provenance(), Provenance::LocalFallback);
        assert_eq!(
            outcome.trace,
            vec![Built, Encrypted, KeyWrapped, Sent, EncryptedAccepted, Rejected]
        );
        assert!(matches!(
            outcome.failure,
            Some(Error::Decryption(DecryptionError::BadLength(3)))
        ));
    }

    /// Fails before any reply arrives
    struct Refused;

    #[async_trait]
    impl HandshakeTransport for Refused {
        async fn exchange(&self, _body: &HandshakeRequestBody) -> Result<RawReply> {
            Err(Error::Transport("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_its_error() {
        let client = HandshakeClient::with_transport(Refused, &config(Duration::from_secs(5)))
            .with_encapsulator(fake_server_encapsulator());

        let outcome = client.mint(&DeviceProfile::default()).await;

        assert_eq!(outcome.token.provenance(), Provenance::LocalFallback);
        assert_eq!(outcome.trace, vec![Built, Encrypted, KeyWrapped, Rejected]);
        match outcome.failure {
            Some(Error::Transport(reason)) => assert!(reason.contains("connection refused")),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_html_reply_falls_back() {
        let reply = RawReply::new(200, b"<html><body>busy</body></html>".to_vec());
        let client = HandshakeClient::with_transport(Canned(reply), &config(Duration::from_secs(5)))
            .with_encapsulator(fake_server_encapsulator());

        let outcome = client.mint(&DeviceProfile::default()).await;

        assert!(!outcome.is_server_issued());
        assert!(matches!(outcome.failure, Some(Error::UnrecognizedResponse(_))));
    }

    #[tokio::test]
    async fn test_supplied_symmetric_key_is_used() {
        let key = SymmetricKey::from_bytes(*b"fixed-key-16byte");
        let reply = json!({"uk": "from-bare"}).to_string();
        let bare = STANDARD.encode(LegacyHandshakeCipher.encrypt(reply.as_bytes(), &key));
        let client = HandshakeClient::with_transport(
            Canned(RawReply::new(200, bare.into_bytes())),
            &config(Duration::from_secs(5)),
        )
        .with_encapsulator(fake_server_encapsulator());

        let outcome = client
            .mint(&DeviceProfile::default().with_symmetric_key(key))
            .await;

        assert_eq!(outcome.token, VerificationToken::server_issued("from-bare"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(KeyWrapped.to_string(), "key-wrapped");
        assert_eq!(serde_json::to_string(&EncryptedAccepted).unwrap(), "\"encrypted-accepted\"");
        assert!(Decrypted.is_success());
        assert!(!Rejected.is_success());
    }
}
