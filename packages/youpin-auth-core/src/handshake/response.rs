//! # Handshake Replies
//!
//! The verification server answers in several shapes. Each shape is
//! recognised by one named [`ResponseStrategy`]; a [`ResponseClassifier`]
//! tries them in a fixed order and the first match wins.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     RESPONSE CLASSIFICATION                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  status != 200 ─────────────────────────────────────► Unrecognized     │
//! │                                                                         │
//! │  1. plain-token       {"code":0,"data":{"uk":"..."}}  ► PlainSuccess   │
//! │  2. encrypted-field   {"u":"<b64>","deviceUk":...}    ► EncryptedSuccess│
//! │  3. server-error      {"code":5001,"msg":"..."}       ► Error          │
//! │  4. bare-ciphertext   <b64>  or  "<b64>"              ► EncryptedSuccess│
//! │                                                                         │
//! │  nothing matched (HTML page, empty body, ...) ──────► Unrecognized     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Encrypted replies are reversed by [`ResponseDecryptor`] with the same
//! symmetric key that encrypted the request.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;

use crate::crypto::{LegacyHandshakeCipher, SymmetricCipher, SymmetricKey, BLOCK_SIZE};
use crate::error::DecryptionError;

/// Raw HTTP reply from the verification endpoint (already decompressed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A classified handshake reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResponse {
    /// The token arrived in clear text
    PlainSuccess { uk: String },
    /// The token is inside a ciphertext that needs the request's key
    EncryptedSuccess {
        cipher_field: String,
        device_uk: Option<String>,
    },
    /// The server reported an error
    Error { code: i64, message: String },
    /// Nothing recognisable; carries the body for diagnosis
    Unrecognized { raw_bytes: Vec<u8>, reason: String },
}

impl HandshakeResponse {
    /// Short variant name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeResponse::PlainSuccess { .. } => "plain-success",
            HandshakeResponse::EncryptedSuccess { .. } => "encrypted-success",
            HandshakeResponse::Error { .. } => "error",
            HandshakeResponse::Unrecognized { .. } => "unrecognized",
        }
    }

    pub(crate) fn unrecognized(raw_bytes: Vec<u8>, reason: impl Into<String>) -> Self {
        HandshakeResponse::Unrecognized {
            raw_bytes,
            reason: reason.into(),
        }
    }
}

/// A reply body parsed once and shared by every strategy
#[derive(Debug)]
pub struct ParsedReply<'a> {
    pub raw: &'a [u8],
    pub json: Option<Value>,
}

impl<'a> ParsedReply<'a> {
    pub fn new(raw: &'a [u8]) -> Self {
        Self {
            raw,
            json: serde_json::from_slice(raw).ok(),
        }
    }

    fn object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.json.as_ref().and_then(Value::as_object)
    }
}

/// Recognises one reply shape
pub trait ResponseStrategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// `Some` if this strategy owns the reply
    fn classify(&self, reply: &ParsedReply<'_>) -> Option<HandshakeResponse>;
}

// ── Strategies ─────────────────────────────────────────────────────────────

/// `{"code": 0, "data": {"uk": "..."}}`, whatever the code
#[derive(Debug, Default)]
pub struct PlainTokenStrategy;

impl ResponseStrategy for PlainTokenStrategy {
    fn name(&self) -> &'static str {
        "plain-token"
    }

    fn classify(&self, reply: &ParsedReply<'_>) -> Option<HandshakeResponse> {
        let uk = reply.object()?.get("data")?.get("uk")?.as_str()?;
        if uk.is_empty() {
            return None;
        }
        Some(HandshakeResponse::PlainSuccess { uk: uk.to_string() })
    }
}

/// `{"u": "<base64>", "deviceUk": ...}`
#[derive(Debug, Default)]
pub struct EncryptedFieldStrategy;

impl ResponseStrategy for EncryptedFieldStrategy {
    fn name(&self) -> &'static str {
        "encrypted-field"
    }

    fn classify(&self, reply: &ParsedReply<'_>) -> Option<HandshakeResponse> {
        let obj = reply.object()?;
        let cipher_field = obj.get("u")?.as_str()?;
        let marker = obj.get("deviceUk")?;
        if cipher_field.is_empty() {
            return None;
        }
        Some(HandshakeResponse::EncryptedSuccess {
            cipher_field: cipher_field.to_string(),
            device_uk: marker.as_str().map(str::to_string),
        })
    }
}

/// A numeric `code` other than `0`/`200`, with no token
#[derive(Debug, Default)]
pub struct ServerErrorStrategy;

impl ResponseStrategy for ServerErrorStrategy {
    fn name(&self) -> &'static str {
        "server-error"
    }

    fn classify(&self, reply: &ParsedReply<'_>) -> Option<HandshakeResponse> {
        let obj = reply.object()?;
        let code = obj.get("code")?.as_i64()?;
        if code == 0 || code == 200 {
            return None;
        }
        let message = ["msg", "message", "error"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        Some(HandshakeResponse::Error { code, message })
    }
}

/// The whole body (or a JSON string body) is the ciphertext
#[derive(Debug, Default)]
pub struct BareCiphertextStrategy;

impl ResponseStrategy for BareCiphertextStrategy {
    fn name(&self) -> &'static str {
        "bare-ciphertext"
    }

    fn classify(&self, reply: &ParsedReply<'_>) -> Option<HandshakeResponse> {
        let source = match &reply.json {
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return None,
            None => std::str::from_utf8(reply.raw).ok()?,
        };
        if source.trim_start().starts_with('<') {
            return None;
        }
        // Servers may wrap long base64 bodies across lines
        let text: String = source.chars().filter(|c| !c.is_whitespace()).collect();
        if text.is_empty() {
            return None;
        }
        let decoded = STANDARD.decode(text.as_bytes()).ok()?;
        if decoded.is_empty() || decoded.len() % BLOCK_SIZE != 0 {
            return None;
        }
        Some(HandshakeResponse::EncryptedSuccess {
            cipher_field: text,
            device_uk: None,
        })
    }
}

// ── Classifier ─────────────────────────────────────────────────────────────

/// Ordered list of strategies
pub struct ResponseClassifier {
    strategies: Vec<Box<dyn ResponseStrategy>>,
}

impl ResponseClassifier {
    /// Classifier over an explicit strategy order
    pub fn new(strategies: Vec<Box<dyn ResponseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names in priority order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Classify a raw reply
    pub fn classify(&self, reply: &RawReply) -> HandshakeResponse {
        if reply.status != 200 {
            tracing::debug!(status = reply.status, "Handshake reply has non-200 status");
            return HandshakeResponse::unrecognized(
                reply.body.clone(),
                format!("HTTP status {}", reply.status),
            );
        }

        let parsed = ParsedReply::new(&reply.body);
        for strategy in &self.strategies {
            if let Some(response) = strategy.classify(&parsed) {
                tracing::debug!(
                    strategy = strategy.name(),
                    kind = response.kind(),
                    "Classified handshake reply"
                );
                return response;
            }
        }

        HandshakeResponse::unrecognized(reply.body.clone(), "no response strategy matched")
    }
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new(vec![
            Box::new(PlainTokenStrategy),
            Box::new(EncryptedFieldStrategy),
            Box::new(ServerErrorStrategy),
            Box::new(BareCiphertextStrategy),
        ])
    }
}

impl std::fmt::Debug for ResponseClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseClassifier")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

// ── Decryption ─────────────────────────────────────────────────────────────

/// Reverses the handshake cipher on an encrypted reply
#[derive(Debug, Clone)]
pub struct ResponseDecryptor<C = LegacyHandshakeCipher> {
    cipher: C,
}

impl Default for ResponseDecryptor<LegacyHandshakeCipher> {
    fn default() -> Self {
        Self::new(LegacyHandshakeCipher)
    }
}

impl<C: SymmetricCipher> ResponseDecryptor<C> {
    pub fn new(cipher: C) -> Self {
        Self { cipher }
    }

    /// Decode, decrypt and parse a cipher field
    ///
    /// ## Errors
    ///
    /// `InvalidBase64`, `BadLength`, `BadPadding` or `InvalidPlaintext`;
    /// never a token.
    pub fn decrypt(
        &self,
        cipher_field: &str,
        key: &SymmetricKey,
    ) -> std::result::Result<Value, DecryptionError> {
        let cleaned: String = cipher_field.chars().filter(|c| !c.is_whitespace()).collect();
        let ciphertext = STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| DecryptionError::InvalidBase64(e.to_string()))?;

        let plaintext = self.cipher.decrypt(&ciphertext, key)?;

        serde_json::from_slice(&plaintext).map_err(|e| DecryptionError::InvalidPlaintext(e.to_string()))
    }
}

/// Find the token in a decrypted reply: top-level `uk`, else inside `data`
pub fn extract_token(reply: &Value) -> Option<String> {
    let obj = reply.as_object()?;
    match obj.get("uk").and_then(Value::as_str) {
        Some(uk) if !uk.is_empty() => Some(uk.to_string()),
        _ => obj.get("data").and_then(extract_token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> SymmetricKey {
        SymmetricKey::from_bytes(*b"0123456789abcdef")
    }

    fn encrypt_b64(value: &Value) -> String {
        let plaintext = serde_json::to_vec(value).unwrap();
        STANDARD.encode(LegacyHandshakeCipher.encrypt(&plaintext, &key()))
    }

    fn classify(status: u16, body: &str) -> HandshakeResponse {
        ResponseClassifier::default().classify(&RawReply::new(status, body))
    }

    #[test]
    fn test_plain_token_reply() {
        assert_eq!(
            classify(200, r#"{"code":0,"data":{"uk":"abc123"}}"#),
            HandshakeResponse::PlainSuccess { uk: "abc123".into() }
        );
    }

    #[test]
    fn test_plain_token_wins_regardless_of_code() {
        assert_eq!(
            classify(200, r#"{"code":1,"msg":"warn","data":{"uk":"abc123"}}"#).kind(),
            "plain-success"
        );
    }

    #[test]
    fn test_encrypted_field_reply() {
        let body = json!({"u": encrypt_b64(&json!({"uk": "x"})), "deviceUk": "x"}).to_string();
        match classify(200, &body) {
            HandshakeResponse::EncryptedSuccess { device_uk, .. } => {
                assert_eq!(device_uk.as_deref(), Some("x"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cipher_field_without_marker_is_not_encrypted_field() {
        let body = json!({"u": encrypt_b64(&json!({"uk": "x"}))}).to_string();
        assert_eq!(classify(200, &body).kind(), "unrecognized");
    }

    #[test]
    fn test_server_error_reply() {
        assert_eq!(
            classify(200, r#"{"code":5001,"msg":"device blocked"}"#),
            HandshakeResponse::Error {
                code: 5001,
                message: "device blocked".into()
            }
        );
        assert_eq!(classify(200, r#"{"code":0}"#).kind(), "unrecognized");
    }

    #[test]
    fn test_bare_ciphertext_reply() {
        let ct = encrypt_b64(&json!({"data": {"uk": "nested"}}));
        for body in [ct.clone(), format!("  {ct}\n"), format!("\"{ct}\"")] {
            assert_eq!(
                classify(200, &body),
                HandshakeResponse::EncryptedSuccess {
                    cipher_field: ct.clone(),
                    device_uk: None
                }
            );
        }
    }

    #[test]
    fn test_line_wrapped_bare_ciphertext() {
        let ct = encrypt_b64(&json!({"data": {"uk": "w".repeat(64)}}));
        assert!(ct.len() > 64);
        let wrapped = ct
            .as_bytes()
            .chunks(64)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");

        match classify(200, &format!("{wrapped}\r\n")) {
            HandshakeResponse::EncryptedSuccess { cipher_field, device_uk } => {
                assert_eq!(cipher_field, ct);
                assert!(device_uk.is_none());
                let value = ResponseDecryptor::new(LegacyHandshakeCipher)
                    .decrypt(&cipher_field, &key())
                    .unwrap();
                assert_eq!(extract_token(&value), Some("w".repeat(64)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_html_error_page_is_unrecognized() {
        let response = classify(200, "<html><body>502 Bad Gateway</body></html>");
        match response {
            HandshakeResponse::Unrecognized { raw_bytes, .. } => {
                assert!(raw_bytes.starts_with(b"<html>"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_non_200_is_unrecognized_even_with_token() {
        let response = classify(500, r#"{"code":0,"data":{"uk":"abc123"}}"#);
        assert!(matches!(
            response,
            HandshakeResponse::Unrecognized { ref reason, .. } if reason.contains("500")
        ));
    }

    #[test]
    fn test_base64_with_wrong_block_length_is_unrecognized() {
        // "hello" is valid base64 of 5 bytes, not a ciphertext
        assert_eq!(classify(200, "aGVsbG8=").kind(), "unrecognized");
        assert_eq!(classify(200, "").kind(), "unrecognized");
    }

    #[test]
    fn test_default_strategy_order() {
        assert_eq!(
            ResponseClassifier::default().strategy_names(),
            vec!["plain-token", "encrypted-field", "server-error", "bare-ciphertext"]
        );
    }

    #[test]
    fn test_decryptor_round_trip_and_extraction() {
        let decryptor = ResponseDecryptor::new(LegacyHandshakeCipher);

        let top = decryptor.decrypt(&encrypt_b64(&json!({"uk": "top"})), &key()).unwrap();
        assert_eq!(extract_token(&top).as_deref(), Some("top"));

        let nested = decryptor
            .decrypt(&encrypt_b64(&json!({"code": 0, "data": {"uk": "nested"}})), &key())
            .unwrap();
        assert_eq!(extract_token(&nested).as_deref(), Some("nested"));

        let none = decryptor.decrypt(&encrypt_b64(&json!({"code": 0})), &key()).unwrap();
        assert_eq!(extract_token(&none), None);
    }

    #[test]
    fn test_decryptor_errors_are_typed() {
        let decryptor = ResponseDecryptor::new(LegacyHandshakeCipher);

        assert!(matches!(
            decryptor.decrypt("%%%not-base64", &key()),
            Err(DecryptionError::InvalidBase64(_))
        ));
        assert_eq!(
            decryptor.decrypt(&STANDARD.encode([0u8; 15]), &key()),
            Err(DecryptionError::BadLength(15))
        );

        let not_json = STANDARD.encode(LegacyHandshakeCipher.encrypt(b"not json", &key()));
        assert!(matches!(
            decryptor.decrypt(&not_json, &key()),
            Err(DecryptionError::InvalidPlaintext(_))
        ));
    }
}
