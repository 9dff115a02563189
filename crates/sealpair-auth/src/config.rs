//! Authentication server configuration.

use std::{collections::BTreeSet, fmt, time::Duration};

/// Configuration for [`crate::AuthServer`].
#[derive(Clone)]
pub struct AuthServerConfig {
    /// Address to bind to (e.g., "127.0.0.1:3000")
    pub bind_address: String,
    /// HMAC secret shared with the KMS for signing KMS tokens
    pub jwt_secret: Vec<u8>,
    /// Lifetime of issued KMS tokens
    pub token_ttl: Duration,
    /// Lifetime of bearer tokens issued by `/authenticate`
    pub bearer_ttl: Duration,
    /// Identities allowed to authenticate. `None` admits any non-empty identity.
    pub allowed_identities: Option<BTreeSet<String>>,
}

impl AuthServerConfig {
    /// Config with default bind address and TTL, admitting any identity.
    pub fn new(jwt_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::from_secs(600),
            bearer_ttl: Duration::from_secs(3600),
            allowed_identities: None,
        }
    }

    /// Restrict authentication to `identities`.
    #[must_use]
    pub fn allow<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_identities = Some(identities.into_iter().map(Into::into).collect());
        self
    }

    /// Check whether `identity` may authenticate.
    pub fn admits(&self, identity: &str) -> bool {
        self.allowed_identities.as_ref().is_none_or(|allowed| allowed.contains(identity))
    }
}

impl fmt::Debug for AuthServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthServerConfig")
            .field("bind_address", &self.bind_address)
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("bearer_ttl", &self.bearer_ttl)
            .field("allowed_identities", &self.allowed_identities)
            .finish()
    }
}
