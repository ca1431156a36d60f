//! Configuration for the signer and the device handshake.
//!
//! Nothing secret is compiled in. The private key comes from a
//! [`SecretSource`]; the verification server's public key defaults to the
//! vendor's published key and can be overridden.
//!
//! ## Environment
//!
//! | Variable                         | Used by           | Default                     |
//! |----------------------------------|-------------------|-----------------------------|
//! | `YOUPIN_APP_KEY`                 | [`AuthConfig`]    | required                    |
//! | `YOUPIN_PRIVATE_KEY`             | [`AuthConfig`]    | one of the two is required  |
//! | `YOUPIN_PRIVATE_KEY_FILE`        | [`AuthConfig`]    |                             |
//! | `YOUPIN_GATEWAY_URL`             | [`AuthConfig`]    | `https://gw-openapi.youpin898.com` |
//! | `YOUPIN_DEVICE_ENDPOINT`         | [`HandshakeConfig`] | `https://api.youpin898.com/api/deviceW2` |
//! | `YOUPIN_SERVER_PUBLIC_KEY`       | [`HandshakeConfig`] | published vendor key      |
//! | `YOUPIN_SERVER_PUBLIC_KEY_FILE`  | [`HandshakeConfig`] |                           |
//! | `YOUPIN_HANDSHAKE_TIMEOUT_SECS`  | [`HandshakeConfig`] | `30`                      |
//! | `YOUPIN_HANDSHAKE_USER_AGENT`    | [`HandshakeConfig`] | desktop Chrome            |
//! | `YOUPIN_SKIP_TLS_VERIFY`         | [`HandshakeConfig`] | `false`                   |

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::crypto::{KeyMaterial, DEFAULT_SERVER_PUBLIC_KEY_PEM};
use crate::error::{Error, Result};

/// App key variable
pub const APP_KEY_VAR: &str = "YOUPIN_APP_KEY";
/// Inline private key variable
pub const PRIVATE_KEY_VAR: &str = "YOUPIN_PRIVATE_KEY";
/// Private key file variable
pub const PRIVATE_KEY_FILE_VAR: &str = "YOUPIN_PRIVATE_KEY_FILE";
/// Gateway base URL variable
pub const GATEWAY_URL_VAR: &str = "YOUPIN_GATEWAY_URL";
/// Device endpoint variable
pub const DEVICE_ENDPOINT_VAR: &str = "YOUPIN_DEVICE_ENDPOINT";
/// Inline server public key variable
pub const SERVER_PUBLIC_KEY_VAR: &str = "YOUPIN_SERVER_PUBLIC_KEY";
/// Server public key file variable
pub const SERVER_PUBLIC_KEY_FILE_VAR: &str = "YOUPIN_SERVER_PUBLIC_KEY_FILE";
/// Handshake timeout variable
pub const HANDSHAKE_TIMEOUT_VAR: &str = "YOUPIN_HANDSHAKE_TIMEOUT_SECS";
/// Handshake User-Agent variable
pub const HANDSHAKE_USER_AGENT_VAR: &str = "YOUPIN_HANDSHAKE_USER_AGENT";
/// TLS verification bypass variable
pub const SKIP_TLS_VERIFY_VAR: &str = "YOUPIN_SKIP_TLS_VERIFY";

/// Open-platform gateway
pub const DEFAULT_GATEWAY_URL: &str = "https://gw-openapi.youpin898.com";

/// Device-verification endpoint
pub const DEFAULT_DEVICE_ENDPOINT: &str = "https://api.youpin898.com/api/deviceW2";

/// Handshake deadline
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser identity presented by the handshake and the device fingerprint
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// ── Secret sources ─────────────────────────────────────────────────────────

/// Somewhere a secret can be read from at use time
pub trait SecretSource: Send + Sync + fmt::Debug {
    /// Read the secret
    fn load(&self) -> Result<Zeroizing<String>>;
}

/// Secret held in an environment variable, read on each [`load`](SecretSource::load)
#[derive(Debug, Clone)]
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SecretSource for EnvSecret {
    fn load(&self) -> Result<Zeroizing<String>> {
        match env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(Zeroizing::new(value)),
            Ok(_) => Err(Error::SecretUnavailable {
                source_name: format!("env:{}", self.var),
                reason: "variable is empty".into(),
            }),
            Err(e) => Err(Error::SecretUnavailable {
                source_name: format!("env:{}", self.var),
                reason: e.to_string(),
            }),
        }
    }
}

/// Secret stored in a file, read on each [`load`](SecretSource::load)
#[derive(Debug, Clone)]
pub struct FileSecret {
    path: PathBuf,
}

impl FileSecret {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretSource for FileSecret {
    fn load(&self) -> Result<Zeroizing<String>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| Error::SecretUnavailable {
            source_name: format!("file:{}", self.path.display()),
            reason: e.to_string(),
        })?;
        let contents = Zeroizing::new(contents);
        if contents.trim().is_empty() {
            return Err(Error::SecretUnavailable {
                source_name: format!("file:{}", self.path.display()),
                reason: "file is empty".into(),
            });
        }
        Ok(contents)
    }
}

/// Secret supplied directly by the caller
#[derive(Clone)]
pub struct InlineSecret(Zeroizing<String>);

impl InlineSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }
}

impl fmt::Debug for InlineSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InlineSecret([REDACTED])")
    }
}

impl SecretSource for InlineSecret {
    fn load(&self) -> Result<Zeroizing<String>> {
        Ok(self.0.clone())
    }
}

// ── Signing configuration ──────────────────────────────────────────────────

/// Everything needed to sign gateway calls
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Vendor-issued application identifier
    pub app_key: String,
    /// Where the base64 PKCS#8 private key lives
    pub private_key: Arc<dyn SecretSource>,
    /// Gateway base URL
    pub gateway_url: String,
}

impl AuthConfig {
    pub fn new(app_key: impl Into<String>, private_key: impl SecretSource + 'static) -> Self {
        Self {
            app_key: app_key.into(),
            private_key: Arc::new(private_key),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary lookup
    ///
    /// `YOUPIN_PRIVATE_KEY_FILE` wins over `YOUPIN_PRIVATE_KEY` when both are
    /// set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let app_key = get(APP_KEY_VAR).ok_or_else(|| Error::MissingConfig(APP_KEY_VAR.into()))?;

        let private_key: Arc<dyn SecretSource> = match (get(PRIVATE_KEY_FILE_VAR), get(PRIVATE_KEY_VAR)) {
            (Some(path), _) => Arc::new(FileSecret::new(path)),
            (None, Some(inline)) => Arc::new(InlineSecret::new(inline)),
            (None, None) => {
                return Err(Error::MissingConfig(format!(
                    "{PRIVATE_KEY_VAR} or {PRIVATE_KEY_FILE_VAR}"
                )))
            }
        };

        Ok(Self {
            app_key: app_key.trim().to_string(),
            private_key,
            gateway_url: get(GATEWAY_URL_VAR).unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
        })
    }

    /// Read the secret and load the key material
    pub fn load_key_material(&self) -> Result<KeyMaterial> {
        let encoded = self.private_key.load()?;
        KeyMaterial::load(&encoded, self.app_key.clone())
    }

    /// Full URL for a gateway path
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.gateway_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

// ── Handshake configuration ────────────────────────────────────────────────

/// Settings of the device-verification exchange
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Verification endpoint
    pub endpoint: String,
    /// PEM of the server's RSA public key
    pub server_public_key_pem: String,
    /// Deadline for the single exchange
    pub timeout: Duration,
    /// User-Agent header
    pub user_agent: String,
    /// Accept invalid certificates (test environments only)
    pub skip_tls_verify: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_DEVICE_ENDPOINT.to_string(),
            server_public_key_pem: DEFAULT_SERVER_PUBLIC_KEY_PEM.to_string(),
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            skip_tls_verify: false,
        }
    }
}

impl HandshakeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary lookup, defaulting every
    /// unset value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let server_public_key_pem = match (get(SERVER_PUBLIC_KEY_FILE_VAR), get(SERVER_PUBLIC_KEY_VAR)) {
            (Some(path), _) => FileSecret::new(path).load()?.to_string(),
            (None, Some(pem)) => pem,
            (None, None) => defaults.server_public_key_pem,
        };

        let timeout = match get(HANDSHAKE_TIMEOUT_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(Error::InvalidConfig(format!(
                        "{HANDSHAKE_TIMEOUT_VAR} must be a positive number of seconds, got {raw:?}"
                    )))
                }
            },
            None => defaults.timeout,
        };

        Ok(Self {
            endpoint: get(DEVICE_ENDPOINT_VAR).unwrap_or(defaults.endpoint),
            server_public_key_pem,
            timeout,
            user_agent: get(HANDSHAKE_USER_AGENT_VAR).unwrap_or(defaults.user_agent),
            skip_tls_verify: get(SKIP_TLS_VERIFY_VAR)
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
