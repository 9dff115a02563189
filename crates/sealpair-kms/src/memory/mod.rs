//! In-memory reference KMS.
//!
//! [`MemoryCloud`] plays the remote half of a key management service: a
//! public-key directory and a password-protected backup escrow shared by
//! every device. [`MemoryKms`] is the per-device half holding the local
//! private key.
//!
//! Every directory or escrow operation first refreshes a KMS token through
//! the device's [`TokenProvider`] and verifies it, exactly like a remote KMS
//! would on each request. Purely local operations (`encrypt`, `decrypt`,
//! `cleanup`, `has_local_private_key`) do not need a token.
//!
//! Lock order is always local key first, then cloud state.

mod crypto;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    env::Environment,
    error::KmsError,
    service::{KeyService, KeyServiceConnector},
    token::{KmsJwt, TokenProvider},
    types::{EncryptedPayload, LookupResult, PublicKey},
};
use self::crypto::{BackupEntry, KeyMaterial};

/// Reference KMS configuration.
#[derive(Debug, Clone, Copy)]
pub struct MemoryKmsConfig {
    /// PBKDF2 iterations for backup wrapping keys.
    pub backup_rounds: u32,
}

impl Default for MemoryKmsConfig {
    fn default() -> Self {
        Self { backup_rounds: 100_000 }
    }
}

#[derive(Default)]
struct CloudState {
    directory: HashMap<String, PublicKey>,
    escrow: HashMap<String, BackupEntry>,
}

/// Shared directory and backup escrow.
///
/// Cheap to clone; clones share state. Acts as the connector for new devices.
#[derive(Clone)]
pub struct MemoryCloud<E: Environment> {
    state: Arc<Mutex<CloudState>>,
    jwt: KmsJwt,
    env: E,
    config: MemoryKmsConfig,
}

impl<E: Environment> MemoryCloud<E> {
    /// Create an empty cloud verifying tokens with `jwt`.
    pub fn new(env: E, jwt: KmsJwt, config: MemoryKmsConfig) -> Self {
        Self { state: Arc::new(Mutex::new(CloudState::default())), jwt, env, config }
    }

    /// Currently published key of `identity`.
    pub async fn published_key(&self, identity: &str) -> Option<PublicKey> {
        self.state.lock().await.directory.get(identity).cloned()
    }

    /// Check whether `identity` has an escrowed backup.
    pub async fn has_backup(&self, identity: &str) -> bool {
        self.state.lock().await.escrow.contains_key(identity)
    }
}

#[async_trait]
impl<E: Environment> KeyServiceConnector for MemoryCloud<E> {
    type Service = MemoryKms<E>;

    async fn initialize(&self, tokens: Arc<dyn TokenProvider>) -> Result<MemoryKms<E>, KmsError> {
        let token = tokens.refresh().await?;
        let claims = self.jwt.verify(&token)?;

        tracing::debug!(identity = %claims.sub, "key service initialized");

        Ok(MemoryKms {
            identity: claims.sub,
            cloud: self.clone(),
            tokens,
            local_key: Mutex::new(None),
        })
    }
}

/// Per-device key service backed by a [`MemoryCloud`].
pub struct MemoryKms<E: Environment> {
    identity: String,
    cloud: MemoryCloud<E>,
    tokens: Arc<dyn TokenProvider>,
    local_key: Mutex<Option<KeyMaterial>>,
}

impl<E: Environment> MemoryKms<E> {
    /// Refresh and verify a token for this identity.
    async fn authorize(&self) -> Result<(), KmsError> {
        let token = self.tokens.refresh().await?;
        let claims = self.cloud.jwt.verify(&token)?;

        if claims.sub != self.identity {
            return Err(KmsError::Unauthorized {
                reason: format!("token issued for {}, not {}", claims.sub, self.identity),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl<E: Environment> KeyService for MemoryKms<E> {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn register(&self) -> Result<PublicKey, KmsError> {
        self.authorize().await?;

        let mut local = self.local_key.lock().await;
        let mut cloud = self.cloud.state.lock().await;

        if cloud.directory.contains_key(&self.identity) {
            return Err(KmsError::IdentityAlreadyExists { identity: self.identity.clone() });
        }
        if local.is_some() {
            return Err(KmsError::PrivateKeyAlreadyExists);
        }

        let material = KeyMaterial::generate(&self.cloud.env)?;
        let public_key = material.public_key(&self.identity);
        cloud.directory.insert(self.identity.clone(), public_key.clone());
        *local = Some(material);

        tracing::debug!(identity = %self.identity, key = %public_key.fingerprint(), "published key");
        Ok(public_key)
    }

    async fn lookup_public_keys(&self, identities: &[String]) -> Result<LookupResult, KmsError> {
        self.authorize().await?;

        if identities.is_empty() {
            return Err(KmsError::EmptyLookup);
        }

        let cloud = self.cloud.state.lock().await;
        let mut missing: Vec<String> =
            identities.iter().filter(|id| !cloud.directory.contains_key(*id)).cloned().collect();

        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(KmsError::IdentitiesNotFound { identities: missing });
        }

        Ok(identities.iter().filter_map(|id| cloud.directory.get(id).cloned()).collect())
    }

    async fn encrypt(
        &self,
        plaintext: &[u8],
        recipients: &LookupResult,
    ) -> Result<EncryptedPayload, KmsError> {
        if recipients.is_empty() {
            return Err(KmsError::Encryption { reason: "no recipients".to_string() });
        }

        let local = self.local_key.lock().await;
        let material = local.as_ref().ok_or(KmsError::MissingPrivateKey)?;

        // Always readable by the sender as well.
        let own_key = material.public_key(&self.identity);
        let keys = recipients
            .keys()
            .filter(|key| key.identity() != self.identity)
            .chain(std::iter::once(&own_key));

        crypto::seal(material, plaintext, keys, &self.cloud.env)
    }

    async fn decrypt(
        &self,
        payload: &EncryptedPayload,
        sender: &PublicKey,
    ) -> Result<Vec<u8>, KmsError> {
        let local = self.local_key.lock().await;
        let material = local.as_ref().ok_or(KmsError::MissingPrivateKey)?;

        crypto::open(material, payload, sender)
    }

    async fn backup_private_key(&self, password: &str) -> Result<(), KmsError> {
        self.authorize().await?;

        let local = self.local_key.lock().await;
        let material = local.as_ref().ok_or(KmsError::MissingPrivateKey)?;
        let mut cloud = self.cloud.state.lock().await;

        if cloud.escrow.contains_key(&self.identity) {
            return Err(KmsError::CloudEntryExists);
        }

        let entry =
            crypto::wrap_seed(material, password, self.cloud.config.backup_rounds, &self.cloud.env)?;
        cloud.escrow.insert(self.identity.clone(), entry);
        Ok(())
    }

    async fn restore_private_key(&self, password: &str) -> Result<(), KmsError> {
        self.authorize().await?;

        let mut local = self.local_key.lock().await;
        if local.is_some() {
            return Err(KmsError::PrivateKeyAlreadyExists);
        }

        let entry = {
            let cloud = self.cloud.state.lock().await;
            cloud.escrow.get(&self.identity).cloned().ok_or(KmsError::BackupNotFound)?
        };

        *local = Some(crypto::unwrap_seed(&entry, password)?);
        Ok(())
    }

    async fn reset_private_key_backup(&self) -> Result<(), KmsError> {
        self.authorize().await?;

        let removed = self.cloud.state.lock().await.escrow.remove(&self.identity);
        tracing::debug!(identity = %self.identity, existed = removed.is_some(), "backup reset");
        Ok(())
    }

    async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), KmsError> {
        self.authorize().await?;

        let mut cloud = self.cloud.state.lock().await;
        let entry = cloud.escrow.get(&self.identity).ok_or(KmsError::BackupNotFound)?;

        let material = crypto::unwrap_seed(entry, old_password)?;
        let rewrapped = crypto::wrap_seed(
            &material,
            new_password,
            self.cloud.config.backup_rounds,
            &self.cloud.env,
        )?;
        cloud.escrow.insert(self.identity.clone(), rewrapped);
        Ok(())
    }

    async fn rotate_private_key(&self) -> Result<PublicKey, KmsError> {
        self.authorize().await?;

        let mut local = self.local_key.lock().await;
        if local.is_some() {
            return Err(KmsError::PrivateKeyAlreadyExists);
        }

        let mut cloud = self.cloud.state.lock().await;
        if !cloud.directory.contains_key(&self.identity) {
            return Err(KmsError::IdentityNotRegistered { identity: self.identity.clone() });
        }

        let material = KeyMaterial::generate(&self.cloud.env)?;
        let public_key = material.public_key(&self.identity);
        cloud.directory.insert(self.identity.clone(), public_key.clone());
        *local = Some(material);

        tracing::debug!(identity = %self.identity, key = %public_key.fingerprint(), "rotated key");
        Ok(public_key)
    }

    async fn cleanup(&self) -> Result<(), KmsError> {
        self.local_key.lock().await.take();
        Ok(())
    }

    async fn unregister(&self) -> Result<(), KmsError> {
        self.authorize().await?;

        let mut local = self.local_key.lock().await;
        let mut cloud = self.cloud.state.lock().await;

        if cloud.directory.remove(&self.identity).is_none() {
            return Err(KmsError::IdentityNotRegistered { identity: self.identity.clone() });
        }

        // The local key has no published counterpart any more.
        local.take();
        Ok(())
    }

    async fn has_local_private_key(&self) -> Result<bool, KmsError> {
        Ok(self.local_key.lock().await.is_some())
    }
}
