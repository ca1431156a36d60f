//! Verification tokens ("UK") and the policy for using them.
//!
//! A token minted by the handshake is either issued by the verification
//! server or derived locally after the handshake failed. The two look alike
//! on the wire; only [`Provenance`] tells them apart, and a fallback token is
//! only released under [`TokenPolicy::AllowFallback`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Returned by the verification server
    ServerIssued,
    /// Derived locally; the server will not honor it
    LocalFallback,
}

impl Provenance {
    /// Wire/display marker
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::ServerIssued => "server-issued",
            Provenance::LocalFallback => "local-fallback",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a caller accepts degraded tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPolicy {
    /// Only server-issued tokens may be used
    #[default]
    RequireServerIssued,
    /// Fallback tokens are accepted as well
    AllowFallback,
}

/// An opaque per-device verification token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationToken {
    value: String,
    provenance: Provenance,
}

impl VerificationToken {
    /// A token returned by the server
    pub fn server_issued(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            provenance: Provenance::ServerIssued,
        }
    }

    /// A locally derived stand-in
    pub fn local_fallback(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            provenance: Provenance::LocalFallback,
        }
    }

    /// Where the token came from
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// `true` for server-issued tokens
    pub fn is_server_issued(&self) -> bool {
        self.provenance == Provenance::ServerIssued
    }

    /// The token value, subject to `policy`
    ///
    /// ## Errors
    ///
    /// `Error::DegradedToken` for a fallback token under
    /// [`TokenPolicy::RequireServerIssued`].
    pub fn value_for(&self, policy: TokenPolicy) -> Result<&str> {
        match (self.provenance, policy) {
            (Provenance::ServerIssued, _) | (Provenance::LocalFallback, TokenPolicy::AllowFallback) => {
                Ok(&self.value)
            }
            (Provenance::LocalFallback, TokenPolicy::RequireServerIssued) => {
                Err(Error::DegradedToken)
            }
        }
    }

    /// The token value regardless of provenance
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// First few characters, safe to log
    pub fn redacted(&self) -> String {
        let prefix: String = self.value.chars().take(8).collect();
        format!("{prefix}... ({})", self.provenance)
    }
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationToken")
            .field("value", &self.redacted())
            .field("provenance", &self.provenance)
            .finish()
    }
}
