//! Client error types.

use std::time::Duration;

use sealpair_kms::KmsError;
use thiserror::Error;

use crate::session::Operation;

/// Errors from the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The service answered with a non-success status.
    #[error("authentication service returned {status}: {reason}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, or the canonical reason phrase if it was empty.
        reason: String,
    },

    /// The request did not complete.
    #[error("authentication service unreachable: {reason}")]
    Transport {
        /// Description of the transport failure.
        reason: String,
    },

    /// The service answered 2xx with an unexpected body.
    #[error("malformed authentication response: {reason}")]
    InvalidResponse {
        /// Description of the decoding failure.
        reason: String,
    },
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse { reason: err.to_string() }
        } else {
            Self::Transport { reason: err.to_string() }
        }
    }
}

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation other than `initialize` ran before the session was
    /// initialized.
    #[error("session for {identity} is not initialized")]
    Precondition {
        /// Identity of the session.
        identity: String,
    },

    /// The authentication service rejected the identity or was unreachable.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// The KMS capability could not be bootstrapped.
    #[error("key service initialization failed: {0}")]
    KeyServiceInit(#[source] KmsError),

    /// The identity already has a published key.
    #[error("identity already registered: {identity}")]
    IdentityAlreadyExists {
        /// The registered identity.
        identity: String,
    },

    /// Public key lookup failed.
    #[error("public key lookup failed: {0}")]
    Lookup(#[source] KmsError),

    /// Signing or encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(#[source] KmsError),

    /// The payload could not be decrypted.
    #[error("decryption failed: {0}")]
    Decryption(#[source] KmsError),

    /// The payload decrypted but was not signed by the expected sender.
    #[error("signature of {identity} did not verify")]
    SignatureVerification {
        /// Identity whose key was used for verification.
        identity: String,
    },

    /// A private key backup already exists.
    #[error("private key backup already exists")]
    CloudEntryExists,

    /// A local private key already exists.
    #[error("local private key already exists")]
    PrivateKeyAlreadyExists,

    /// The backup password was wrong.
    #[error("wrong backup password")]
    Authorization,

    /// A collaborator call exceeded the configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        operation: Operation,
        /// Configured bound.
        timeout: Duration,
    },

    /// Any other KMS failure.
    #[error("{operation} failed: {source}")]
    KeyService {
        /// Operation that failed.
        operation: Operation,
        /// Underlying KMS error.
        source: KmsError,
    },
}

impl SessionError {
    /// Classify a KMS error raised while running `operation`.
    ///
    /// Kinds with their own session variant win; everything else is attributed
    /// to the operation.
    pub(crate) fn from_kms(operation: Operation, err: KmsError) -> Self {
        match err {
            KmsError::IdentityAlreadyExists { identity } => Self::IdentityAlreadyExists { identity },
            KmsError::CloudEntryExists => Self::CloudEntryExists,
            KmsError::PrivateKeyAlreadyExists => Self::PrivateKeyAlreadyExists,
            KmsError::WrongPassword => Self::Authorization,
            KmsError::SignatureVerification { identity } => Self::SignatureVerification { identity },
            err => match operation {
                Operation::Initialize => Self::KeyServiceInit(err),
                Operation::Lookup => Self::Lookup(err),
                Operation::Encrypt => Self::Encryption(err),
                Operation::Decrypt => Self::Decryption(err),
                operation => Self::KeyService { operation, source: err },
            },
        }
    }

    /// Returns true if the session heals this error by itself.
    ///
    /// Recoverable errors trigger one corrective action followed by at most
    /// one retry. Everything else propagates to the caller.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Healed: cleanup/rotate, reset backup, cleanup
            Self::IdentityAlreadyExists { .. }
            | Self::CloudEntryExists
            | Self::PrivateKeyAlreadyExists => true,

            // Propagated
            Self::Precondition { .. }
            | Self::Authentication(_)
            | Self::KeyServiceInit(_)
            | Self::Lookup(_)
            | Self::Encryption(_)
            | Self::Decryption(_)
            | Self::SignatureVerification { .. }
            | Self::Authorization
            | Self::Timeout { .. }
            | Self::KeyService { .. } => false,
        }
    }
}
