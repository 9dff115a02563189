//! Client
//!
//! Per-identity secure messaging session. A [`Session`] authenticates against
//! an authentication service, bootstraps a KMS capability with a token
//! provider, and then exposes registration, key lookup, sign-and-encrypt,
//! decrypt-and-verify and key backup operations.
//!
//! # Architecture
//!
//! The session is an orchestration layer:
//! - Identity assertion is delegated to an [`AuthService`]
//!   ([`HttpAuthService`] in production)
//! - Key management is delegated to a `KeyServiceConnector` / `KeyService`
//!   pair from `sealpair-kms`
//! - Conflicts with a defined recovery (identity, local key or backup already
//!   exists) are healed with one corrective action and at most one retry
//!
//! # Components
//!
//! - [`Session`]: the per-identity state machine
//! - [`BearerTokenProvider`]: exchanges the bearer token for KMS tokens
//! - [`SessionError`]: closed error taxonomy of session operations
//! - [`SessionConfig`]: timeouts and benchmarking

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod auth;
mod config;
mod error;
mod session;

pub use auth::{AuthService, AuthToken, BearerTokenProvider, HttpAuthService};
pub use config::SessionConfig;
pub use error::{AuthError, SessionError};
pub use sealpair_kms::{
    EncryptedPayload, KeyService, KeyServiceConnector, KmsError, LookupResult, PublicKey,
};
pub use session::{Operation, RegisterOutcome, Session, SessionState};
