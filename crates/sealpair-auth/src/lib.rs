//! Development authentication service.
//!
//! Asserts identities and exchanges bearer tokens for short-lived KMS tokens.
//! The KMS tokens are HS256 JWTs signed with a secret shared with the KMS.
//!
//! ## Architecture
//!
//! ```text
//! sealpair-auth
//!   ├─ AuthServer        (listener + axum serve loop)
//!   ├─ router            (POST /authenticate, GET /kms-jwt)
//!   ├─ AuthState         (bearer token table, JWT signer)
//!   └─ Environment       (bearer token randomness)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod routes;

use std::net::SocketAddr;

pub use config::AuthServerConfig;
pub use error::{ApiError, AuthServerError};
pub use routes::{AuthState, router};
use sealpair_kms::Environment;
use tokio::net::TcpListener;

/// Bound authentication server.
pub struct AuthServer {
    listener: TcpListener,
    router: axum::Router,
}

impl AuthServer {
    /// Bind the listener and build the router.
    ///
    /// # Errors
    ///
    /// Returns `AuthServerError::Bind` if the address cannot be bound.
    pub async fn bind<E: Environment>(
        config: AuthServerConfig,
        env: E,
    ) -> Result<Self, AuthServerError> {
        let address = config.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| AuthServerError::Bind { address, source })?;

        if config.allowed_identities.is_none() {
            tracing::warn!("No allow-list configured - any identity can authenticate");
        }

        Ok(Self { listener, router: router(AuthState::new(config, env)) })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, AuthServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until the task is dropped or an I/O error occurs.
    pub async fn run(self) -> Result<(), AuthServerError> {
        tracing::info!("Auth server listening on {}", self.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
