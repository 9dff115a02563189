//! KMS error types.

use thiserror::Error;

/// Errors returned across the KMS boundary.
///
/// The set is closed: callers match on the variant, never on the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KmsError {
    /// The access token was missing, expired or issued for someone else.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Why the token was rejected.
        reason: String,
    },

    /// The token provider could not produce a fresh token.
    #[error("token provider failed: {reason}")]
    TokenProvider {
        /// Description of the provider failure.
        reason: String,
    },

    /// The identity already has a public key in the directory.
    #[error("identity already registered: {identity}")]
    IdentityAlreadyExists {
        /// The registered identity.
        identity: String,
    },

    /// The identity has no public key in the directory.
    #[error("identity not registered: {identity}")]
    IdentityNotRegistered {
        /// The unregistered identity.
        identity: String,
    },

    /// Some looked-up identities have no public key.
    #[error("identities not found: {}", identities.join(", "))]
    IdentitiesNotFound {
        /// Identities missing from the directory.
        identities: Vec<String>,
    },

    /// Lookup was called without any identity.
    #[error("lookup requires at least one identity")]
    EmptyLookup,

    /// The operation needs a local private key and there is none.
    #[error("no local private key")]
    MissingPrivateKey,

    /// A local private key is already stored.
    #[error("local private key already exists")]
    PrivateKeyAlreadyExists,

    /// A private key backup already exists in the escrow.
    #[error("private key backup already exists")]
    CloudEntryExists,

    /// No private key backup exists in the escrow.
    #[error("private key backup not found")]
    BackupNotFound,

    /// The backup password did not unwrap the escrowed key.
    #[error("wrong backup password")]
    WrongPassword,

    /// Signing or encrypting failed.
    #[error("encryption failed: {reason}")]
    Encryption {
        /// Description of the failure.
        reason: String,
    },

    /// The payload could not be decrypted with the local key.
    #[error("decryption failed: {reason}")]
    Decryption {
        /// Description of the failure.
        reason: String,
    },

    /// The payload decrypted but the signature does not match the sender key.
    #[error("signature verification failed for {identity}")]
    SignatureVerification {
        /// Identity whose key was used for verification.
        identity: String,
    },

    /// Stored or received data could not be decoded.
    #[error("malformed data: {reason}")]
    Malformed {
        /// Description of the decoding failure.
        reason: String,
    },

    /// Internal invariant failure in the key service.
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the failure.
        reason: String,
    },
}

impl KmsError {
    /// Returns true if the error originates from token handling.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::TokenProvider { .. })
    }

    /// Returns true if the error reports state that already exists.
    ///
    /// These are the conditions a client can heal by discarding or replacing
    /// the existing entry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::IdentityAlreadyExists { .. }
                | Self::PrivateKeyAlreadyExists
                | Self::CloudEntryExists
        )
    }
}
