//! Authentication service collaborator.
//!
//! Two endpoints:
//!
//! - `POST /authenticate` with `{"identity": ...}` returns `{"authToken": ...}`
//! - `GET /kms-jwt` with `Authorization: Bearer <authToken>` returns
//!   `{"kmsToken": ...}`
//!
//! [`BearerTokenProvider`] wraps the second endpoint as the KMS token
//! provider, calling it again on every refresh.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response};
use sealpair_kms::{KmsError, KmsToken, TokenProvider};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Bearer token proving an authenticated identity.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<redacted {} bytes>)", self.0.len())
    }
}

/// Identity assertion and KMS token exchange.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Obtain a bearer token for `identity`.
    async fn authenticate(&self, identity: &str) -> Result<AuthToken, AuthError>;

    /// Exchange a bearer token for a short-lived KMS token.
    async fn kms_token(&self, auth_token: &AuthToken) -> Result<KmsToken, AuthError>;
}

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    identity: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateResponse {
    auth_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KmsTokenResponse {
    kms_token: String,
}

/// HTTP client for the authentication service.
#[derive(Clone)]
pub struct HttpAuthService {
    client: Client,
    base_url: String,
}

impl HttpAuthService {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client reusing an existing `reqwest` client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::debug!("Auth service configured: {}", base_url);
        Self { client, base_url }
    }

    /// Base URL requests go to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Turn a non-success response into `AuthError::Rejected`.
async fn check_status(response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body
    };

    Err(AuthError::Rejected { status: status.as_u16(), reason })
}

#[async_trait]
impl AuthService for HttpAuthService {
    async fn authenticate(&self, identity: &str) -> Result<AuthToken, AuthError> {
        let url = format!("{}/authenticate", self.base_url);
        tracing::debug!(identity, "POST {}", url);

        let response =
            self.client.post(&url).json(&AuthenticateRequest { identity }).send().await?;
        let body: AuthenticateResponse = check_status(response).await?.json().await?;

        Ok(AuthToken(body.auth_token))
    }

    async fn kms_token(&self, auth_token: &AuthToken) -> Result<KmsToken, AuthError> {
        let url = format!("{}/kms-jwt", self.base_url);
        tracing::trace!("GET {}", url);

        let response = self.client.get(&url).bearer_auth(&auth_token.0).send().await?;
        let body: KmsTokenResponse = check_status(response).await?.json().await?;

        Ok(KmsToken::new(body.kms_token))
    }
}

/// KMS token provider backed by a bearer token.
///
/// Holds the bearer token and the service that accepts it; every
/// [`TokenProvider::refresh`] performs a new exchange.
pub struct BearerTokenProvider {
    auth: Arc<dyn AuthService>,
    auth_token: AuthToken,
}

impl BearerTokenProvider {
    /// Create a provider exchanging `auth_token` through `auth`.
    pub fn new(auth: Arc<dyn AuthService>, auth_token: AuthToken) -> Self {
        Self { auth, auth_token }
    }
}

#[async_trait]
impl TokenProvider for BearerTokenProvider {
    async fn refresh(&self) -> Result<KmsToken, KmsError> {
        self.auth
            .kms_token(&self.auth_token)
            .await
            .map_err(|e| KmsError::TokenProvider { reason: e.to_string() })
    }
}
