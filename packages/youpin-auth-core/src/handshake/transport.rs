//! The network leg of the handshake.
//!
//! [`HandshakeTransport`] is the seam between the protocol and HTTP: the
//! production [`HttpTransport`] posts to the verification endpoint, tests
//! plug in in-process fakes. Classifying the reply is left to
//! [`HandshakeClient`](super::HandshakeClient), which also owns the deadline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::response::RawReply;
use crate::config::HandshakeConfig;
use crate::error::{Error, Result};

/// JSON body of the handshake request: exactly two base64 fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequestBody {
    /// Fingerprint encrypted with the handshake key
    #[serde(rename = "encryptedData")]
    pub encrypted_data: String,
    /// Handshake key wrapped under the server's RSA key
    #[serde(rename = "encryptedAesKey")]
    pub encrypted_aes_key: String,
}

/// Carries one handshake request to the verification server
#[async_trait]
pub trait HandshakeTransport: Send + Sync {
    /// Perform a single exchange, returning the decompressed reply
    ///
    /// Non-200 statuses are returned as replies, not errors; only failures
    /// to obtain a reply at all are errors.
    async fn exchange(&self, body: &HandshakeRequestBody) -> Result<RawReply>;
}

/// Transport over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a client for the configured endpoint
    ///
    /// Single attempt, bounded by `config.timeout`, gzip decoded
    /// transparently, Title-Case header names on HTTP/1.
    pub fn new(config: &HandshakeConfig) -> Result<Self> {
        if config.skip_tls_verify {
            tracing::warn!("TLS certificate verification disabled for the handshake");
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .gzip(true)
            .http1_title_case_headers()
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout.as_secs())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl HandshakeTransport for HttpTransport {
    async fn exchange(&self, body: &HandshakeRequestBody) -> Result<RawReply> {
        let payload = serde_json::to_vec(body)?;

        tracing::debug!(
            endpoint = %self.endpoint,
            payload_len = payload.len(),
            "Posting handshake request"
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header(ACCEPT, "application/json, text/plain, */*")
            .body(payload)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| self.map_error(e))?.to_vec();

        tracing::debug!(status, body_len = body.len(), "Received handshake reply");

        Ok(RawReply { status, body })
    }
}
