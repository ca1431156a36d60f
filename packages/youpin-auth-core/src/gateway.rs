//! Signed calls to the open-platform gateway.
//!
//! Every call is signed with a fresh [`GatewayTimestamp`] and posted as the
//! JSON envelope. The device token, when supplied, travels in the `uk`
//! header and is checked against a [`TokenPolicy`] first.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::signing::{RequestSigner, SignatureRequest, SignedEnvelope};
use crate::time::GatewayTimestamp;
use crate::token::{TokenPolicy, VerificationToken};

/// Header carrying the device verification token
pub const UK_HEADER: &str = "uk";

/// Client for signed gateway endpoints
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: Client,
    signer: RequestSigner,
    base_url: String,
}

impl GatewayClient {
    pub fn new(signer: RequestSigner, base_url: impl Into<String>) -> Self {
        Self::with_http_client(Client::new(), signer, base_url)
    }

    pub fn with_http_client(http: Client, signer: RequestSigner, base_url: impl Into<String>) -> Self {
        Self {
            http,
            signer,
            base_url: base_url.into(),
        }
    }

    /// Load the key material named by `config` and target its gateway URL
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let keys = config.load_key_material()?;
        Ok(Self::new(RequestSigner::new(keys), config.gateway_url.clone()))
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Sign `params` and POST them to `path`
    pub async fn call(&self, path: &str, params: SignatureRequest) -> Result<Value> {
        let envelope = self.signer.sign(params, &GatewayTimestamp::now())?;
        self.post(path, &envelope, None).await
    }

    /// [`call`](Self::call) with the device token attached
    ///
    /// ## Errors
    ///
    /// `Error::DegradedToken` before anything is sent if `policy` refuses
    /// the token's provenance.
    pub async fn call_with_token(
        &self,
        path: &str,
        params: SignatureRequest,
        token: &VerificationToken,
        policy: TokenPolicy,
    ) -> Result<Value> {
        let uk = token.value_for(policy)?;
        let envelope = self.signer.sign(params, &GatewayTimestamp::now())?;
        self.post(path, &envelope, Some(uk)).await
    }

    async fn post(&self, path: &str, envelope: &SignedEnvelope, uk: Option<&str>) -> Result<Value> {
        let url = self.url(path);
        let mut request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(envelope.to_wire_json()?);
        if let Some(uk) = uk {
            request = request.header(UK_HEADER, uk);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "Gateway call failed");
            return Err(Error::Gateway {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(%url, status = status.as_u16(), with_uk = uk.is_some(), "Gateway call succeeded");
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyMaterial, KeyPair};
    use std::sync::OnceLock;

    fn signer() -> RequestSigner {
        static KEYS: OnceLock<KeyMaterial> = OnceLock::new();
        let keys = KEYS.get_or_init(|| {
            let pair = KeyPair::generate().unwrap();
            KeyMaterial::load(&pair.private_key, "app-key").unwrap()
        });
        RequestSigner::new(keys.clone())
    }

    #[test]
    fn test_url_joining() {
        let client = GatewayClient::new(signer(), "https://gw.example.com/");
        assert_eq!(
            client.url("/open/v1/api/goodsQuery"),
            "https://gw.example.com/open/v1/api/goodsQuery"
        );
        assert_eq!(client.url("ping"), "https://gw.example.com/ping");
    }

    #[tokio::test]
    async fn test_fallback_token_refused_before_sending() {
        // Unroutable base URL: reaching the network would fail differently
        let client = GatewayClient::new(signer(), "http://127.0.0.1:9");
        let token = VerificationToken::local_fallback("f".repeat(64));

        let err = client
            .call_with_token("/x", SignatureRequest::new(), &token, TokenPolicy::RequireServerIssued)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DegradedToken));
    }
}
