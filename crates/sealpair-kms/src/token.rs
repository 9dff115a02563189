//! KMS access tokens.
//!
//! The KMS never sees the bearer token a client obtained from the
//! authentication service. Instead, a [`TokenProvider`] exchanges it for a
//! short-lived KMS token on every call. Tokens are HS256 JWTs whose `sub`
//! claim is the identity they were issued for.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::KmsError;

/// Short-lived KMS access token.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct KmsToken(String);

impl KmsToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KmsToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KmsToken(<redacted {} bytes>)", self.0.len())
    }
}

/// Capability handing out fresh KMS tokens.
///
/// Implementations must be callable any number of times: a key service asks
/// for a new token before each operation that reaches the directory or the
/// backup escrow.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Obtain a fresh KMS token.
    async fn refresh(&self) -> Result<KmsToken, KmsError>;
}

/// Claims carried by a KMS token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsClaims {
    /// Identity the token was issued for.
    pub sub: String,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: u64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// Issues and verifies KMS tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct KmsJwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl KmsJwt {
    /// Create a signer/verifier pair from a shared secret.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token for `identity`, valid for `ttl` from now.
    pub fn issue(&self, identity: &str, ttl: Duration) -> Result<KmsToken, KmsError> {
        let iat = jsonwebtoken::get_current_timestamp();
        self.sign(&KmsClaims { sub: identity.to_string(), iat, exp: iat + ttl.as_secs() })
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &KmsClaims) -> Result<KmsToken, KmsError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map(KmsToken)
            .map_err(|e| KmsError::Internal { reason: format!("token signing failed: {e}") })
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &KmsToken) -> Result<KmsClaims, KmsError> {
        jsonwebtoken::decode::<KmsClaims>(&token.0, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| KmsError::Unauthorized { reason: e.to_string() })
    }
}

impl fmt::Debug for KmsJwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsJwt").field("algorithm", &Algorithm::HS256).finish_non_exhaustive()
    }
}
