//! The KMS capability.
//!
//! A [`KeyServiceConnector`] is the bootstrap half: it turns a token provider
//! into a per-device [`KeyService`]. The service owns the device's local
//! private key and talks to the shared directory and backup escrow.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::KmsError,
    token::TokenProvider,
    types::{EncryptedPayload, LookupResult, PublicKey},
};

/// Bootstraps a [`KeyService`] for the identity behind a token provider.
#[async_trait]
pub trait KeyServiceConnector: Send + Sync {
    /// Per-device service produced by this connector.
    type Service: KeyService;

    /// Initialize a key service.
    ///
    /// The identity is taken from the provider's first token. The provider is
    /// retained and refreshed on later operations.
    async fn initialize(&self, tokens: Arc<dyn TokenProvider>) -> Result<Self::Service, KmsError>;
}

/// Per-device key management operations.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Identity this service acts for.
    fn identity(&self) -> &str;

    /// Generate a keypair and publish its public half.
    async fn register(&self) -> Result<PublicKey, KmsError>;

    /// Resolve public keys from the directory.
    async fn lookup_public_keys(&self, identities: &[String]) -> Result<LookupResult, KmsError>;

    /// Sign with the local key and encrypt for every key in `recipients`.
    async fn encrypt(
        &self,
        plaintext: &[u8],
        recipients: &LookupResult,
    ) -> Result<EncryptedPayload, KmsError>;

    /// Decrypt with the local key and verify against `sender`.
    async fn decrypt(
        &self,
        payload: &EncryptedPayload,
        sender: &PublicKey,
    ) -> Result<Vec<u8>, KmsError>;

    /// Escrow the local key under `password`.
    async fn backup_private_key(&self, password: &str) -> Result<(), KmsError>;

    /// Unwrap the escrowed key into local storage.
    async fn restore_private_key(&self, password: &str) -> Result<(), KmsError>;

    /// Delete the escrowed backup.
    async fn reset_private_key_backup(&self) -> Result<(), KmsError>;

    /// Re-wrap the escrowed backup under a new password.
    async fn change_password(&self, old_password: &str, new_password: &str)
    -> Result<(), KmsError>;

    /// Replace the published key with a freshly generated one.
    async fn rotate_private_key(&self) -> Result<PublicKey, KmsError>;

    /// Delete local key material. Directory and escrow are untouched.
    async fn cleanup(&self) -> Result<(), KmsError>;

    /// Remove this identity's key from the directory.
    async fn unregister(&self) -> Result<(), KmsError>;

    /// Check whether a local private key is stored.
    async fn has_local_private_key(&self) -> Result<bool, KmsError>;
}
