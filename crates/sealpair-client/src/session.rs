//! Session state machine.
//!
//! A `Session` is one participant's authenticated, key-bearing client.
//!
//! ```text
//! Uninitialized --initialize--> Authenticated --register--> Registered
//!                                     ^                         |
//!                                     +-------unregister--------+
//! ```
//!
//! Independently, the KMS tracks whether a local private key is present;
//! `cleanup`, `restore_private_key` and `rotate_private_key` flip it.

use std::{fmt, future::Future, sync::Arc, time::Instant};

use sealpair_kms::{
    EncryptedPayload, KeyService, KeyServiceConnector, KmsError, LookupResult, PublicKey,
};

use crate::{
    auth::{AuthService, AuthToken, BearerTokenProvider},
    config::SessionConfig,
    error::SessionError,
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `initialize` has not completed.
    Uninitialized,
    /// Holds a bearer token and a key service; no key is published.
    Authenticated,
    /// The identity's key is published.
    Registered,
}

/// Session operations, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Authenticate and bootstrap the key service.
    Initialize,
    /// Publish a public key.
    Register,
    /// Resolve public keys.
    Lookup,
    /// Sign and encrypt.
    Encrypt,
    /// Decrypt and verify.
    Decrypt,
    /// Escrow the private key.
    Backup,
    /// Re-wrap the escrowed key.
    ChangePassword,
    /// Restore the escrowed key.
    Restore,
    /// Delete the escrowed key.
    ResetBackup,
    /// Query for a local key.
    HasLocalKey,
    /// Replace the published key.
    Rotate,
    /// Delete local key material.
    Cleanup,
    /// Remove the published key.
    Unregister,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::Register => "register",
            Self::Lookup => "lookup public keys",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
            Self::Backup => "backup private key",
            Self::ChangePassword => "change password",
            Self::Restore => "restore private key",
            Self::ResetBackup => "reset private key backup",
            Self::HasLocalKey => "has local private key",
            Self::Rotate => "rotate private key",
            Self::Cleanup => "cleanup",
            Self::Unregister => "unregister",
        };
        f.write_str(name)
    }
}

/// How `register` completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A fresh key was published.
    Registered(PublicKey),
    /// The identity was already registered; local key material was discarded
    /// and a rotated key published instead.
    RotatedExistingIdentity(PublicKey),
}

impl RegisterOutcome {
    /// The key now published for the identity.
    pub fn public_key(&self) -> &PublicKey {
        match self {
            Self::Registered(key) | Self::RotatedExistingIdentity(key) => key,
        }
    }
}

/// Per-identity secure messaging session.
///
/// # Type Parameters
///
/// - `C`: KMS connector used by `initialize`
pub struct Session<C: KeyServiceConnector> {
    identity: String,
    auth: Arc<dyn AuthService>,
    connector: C,
    config: SessionConfig,
    state: SessionState,
    auth_token: Option<AuthToken>,
    key_client: Option<C::Service>,
}

impl<C: KeyServiceConnector> Session<C> {
    /// Create an uninitialized session with default configuration.
    pub fn new(identity: impl Into<String>, auth: Arc<dyn AuthService>, connector: C) -> Self {
        Self::with_config(identity, auth, connector, SessionConfig::default())
    }

    /// Create an uninitialized session.
    pub fn with_config(
        identity: impl Into<String>,
        auth: Arc<dyn AuthService>,
        connector: C,
        config: SessionConfig,
    ) -> Self {
        Self {
            identity: identity.into(),
            auth,
            connector,
            config,
            state: SessionState::Uninitialized,
            auth_token: None,
            key_client: None,
        }
    }

    /// Identity of this session.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if `initialize` completed.
    pub fn is_initialized(&self) -> bool {
        self.key_client.is_some()
    }

    /// Bearer token obtained by `initialize`.
    pub fn auth_token(&self) -> Option<&AuthToken> {
        self.auth_token.as_ref()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Authenticate and bootstrap the key service.
    ///
    /// The key service receives a [`BearerTokenProvider`], so it exchanges the
    /// bearer token for a fresh KMS token whenever it needs one.
    ///
    /// Runs once. Later calls return `Ok(())` and keep the existing key
    /// service, its local key and the current state.
    ///
    /// # Errors
    ///
    /// - `Authentication` if the authentication service rejects the identity
    /// - `KeyServiceInit` if the key service cannot be bootstrapped
    /// - `Timeout` if either call exceeds the configured bound
    pub async fn initialize(&mut self) -> Result<(), SessionError> {
        if self.key_client.is_some() {
            tracing::debug!(identity = %self.identity, state = ?self.state, "Already initialized");
            return Ok(());
        }

        let auth_token = self
            .bounded(Operation::Initialize, self.auth.authenticate(&self.identity))
            .await
            .and_then(|result| result.map_err(SessionError::from))
            .inspect_err(|e| self.log_failure(Operation::Initialize, e))?;

        let tokens = Arc::new(BearerTokenProvider::new(Arc::clone(&self.auth), auth_token.clone()));
        let key_client = self
            .call_connector(tokens)
            .await
            .inspect_err(|e| self.log_failure(Operation::Initialize, e))?;

        self.auth_token = Some(auth_token);
        self.key_client = Some(key_client);
        self.state = SessionState::Authenticated;

        tracing::info!(identity = %self.identity, "Initialized");
        Ok(())
    }

    /// Publish this identity's public key.
    ///
    /// If the identity is already registered, local key material is discarded
    /// and a fresh key is rotated in. That outcome is reported separately from
    /// a clean registration.
    pub async fn register(&mut self) -> Result<RegisterOutcome, SessionError> {
        let result = match self.call(Operation::Register, |kms| kms.register()).await {
            Ok(key) => {
                tracing::info!(identity = %self.identity, key = %key.fingerprint(), "Registered");
                Ok(RegisterOutcome::Registered(key))
            },
            Err(SessionError::IdentityAlreadyExists { .. }) => {
                tracing::warn!(
                    identity = %self.identity,
                    "Identity already registered, rotating private key instead"
                );
                self.cleanup_then(Operation::Rotate, |kms| kms.rotate_private_key()).await.map(|key| {
                    tracing::info!(identity = %self.identity, key = %key.fingerprint(), "Rotated private key instead");
                    RegisterOutcome::RotatedExistingIdentity(key)
                })
            },
            Err(e) => Err(e),
        };

        let outcome = self.logged(Operation::Register, result)?;
        self.state = SessionState::Registered;
        Ok(outcome)
    }

    /// Resolve public keys of `identities`.
    pub async fn lookup_public_keys(&self, identities: &[&str]) -> Result<LookupResult, SessionError> {
        let identities: Vec<String> = identities.iter().map(ToString::to_string).collect();
        let result = self.call(Operation::Lookup, |kms| kms.lookup_public_keys(&identities)).await;
        let result = self.logged(Operation::Lookup, result)?;

        tracing::info!(identity = %self.identity, ?identities, "Looked up public keys");
        Ok(result)
    }

    /// Sign `plaintext` and encrypt it for every key in `recipients`.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        recipients: &LookupResult,
    ) -> Result<EncryptedPayload, SessionError> {
        let repetitions = self.config.benchmark_repetitions.get();
        let started = Instant::now();

        let mut result =
            self.call(Operation::Encrypt, |kms| kms.encrypt(plaintext.as_bytes(), recipients)).await;
        for _ in 1..repetitions {
            if result.is_err() {
                break;
            }
            result =
                self.call(Operation::Encrypt, |kms| kms.encrypt(plaintext.as_bytes(), recipients)).await;
        }
        let payload = self.logged(Operation::Encrypt, result)?;

        tracing::info!(
            identity = %self.identity,
            bytes = payload.len(),
            took = ?(started.elapsed() / repetitions),
            "Encrypted and signed"
        );
        Ok(payload)
    }

    /// Decrypt `payload` and verify it was signed by `sender`.
    ///
    /// # Errors
    ///
    /// - `Decryption` if the payload cannot be decrypted with the local key
    ///   or is not valid UTF-8
    /// - `SignatureVerification` if it decrypts but `sender` did not sign it
    pub async fn decrypt(
        &self,
        payload: &EncryptedPayload,
        sender: &PublicKey,
    ) -> Result<String, SessionError> {
        let repetitions = self.config.benchmark_repetitions.get();
        let started = Instant::now();

        let mut result = self.call(Operation::Decrypt, |kms| kms.decrypt(payload, sender)).await;
        for _ in 1..repetitions {
            if result.is_err() {
                break;
            }
            result = self.call(Operation::Decrypt, |kms| kms.decrypt(payload, sender)).await;
        }

        let result = result.and_then(|plaintext| {
            String::from_utf8(plaintext).map_err(|e| {
                SessionError::Decryption(KmsError::Malformed { reason: e.to_string() })
            })
        });
        let plaintext = self.logged(Operation::Decrypt, result)?;

        tracing::info!(
            identity = %self.identity,
            sender = %sender,
            took = ?(started.elapsed() / repetitions),
            "Decrypted and verified"
        );
        Ok(plaintext)
    }

    /// Escrow the local private key under `password`.
    ///
    /// An existing backup is reset and the backup retried once.
    pub async fn backup_private_key(&self, password: &str) -> Result<(), SessionError> {
        let result = match self.call(Operation::Backup, |kms| kms.backup_private_key(password)).await {
            Err(SessionError::CloudEntryExists) => {
                tracing::warn!(identity = %self.identity, "Backup exists, resetting and trying again");
                match self.call(Operation::ResetBackup, |kms| kms.reset_private_key_backup()).await {
                    Ok(()) => self.call(Operation::Backup, |kms| kms.backup_private_key(password)).await,
                    Err(e) => Err(e),
                }
            },
            result => result,
        };
        self.logged(Operation::Backup, result)?;

        tracing::info!(identity = %self.identity, "Backed up private key");
        Ok(())
    }

    /// Re-wrap the escrowed backup under `new_password`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Authorization` if `old_password` is wrong.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        let result = self
            .call(Operation::ChangePassword, |kms| kms.change_password(old_password, new_password))
            .await;
        self.logged(Operation::ChangePassword, result)?;

        tracing::info!(identity = %self.identity, "Changed password");
        Ok(())
    }

    /// Restore the escrowed private key into local storage.
    ///
    /// An existing local key is cleaned up and the restore retried once.
    pub async fn restore_private_key(&self, password: &str) -> Result<(), SessionError> {
        let result = match self.call(Operation::Restore, |kms| kms.restore_private_key(password)).await {
            Err(SessionError::PrivateKeyAlreadyExists) => {
                tracing::warn!(identity = %self.identity, "Local key exists, cleaning up and trying again");
                self.cleanup_then(Operation::Restore, |kms| kms.restore_private_key(password)).await
            },
            result => result,
        };
        self.logged(Operation::Restore, result)?;

        tracing::info!(identity = %self.identity, "Restored private key");
        Ok(())
    }

    /// Delete the escrowed backup.
    pub async fn reset_private_key_backup(&self) -> Result<(), SessionError> {
        let result = self.call(Operation::ResetBackup, |kms| kms.reset_private_key_backup()).await;
        self.logged(Operation::ResetBackup, result)?;

        tracing::info!(identity = %self.identity, "Reset private key backup");
        Ok(())
    }

    /// Check whether a local private key is stored.
    pub async fn has_local_private_key(&self) -> Result<bool, SessionError> {
        let result = self.call(Operation::HasLocalKey, |kms| kms.has_local_private_key()).await;
        self.logged(Operation::HasLocalKey, result)
    }

    /// Generate and publish a new key, replacing the local one.
    ///
    /// An existing local key is cleaned up and the rotation retried once.
    pub async fn rotate_private_key(&self) -> Result<PublicKey, SessionError> {
        let result = match self.call(Operation::Rotate, |kms| kms.rotate_private_key()).await {
            Err(SessionError::PrivateKeyAlreadyExists) => {
                tracing::warn!(identity = %self.identity, "Local key exists, cleaning up and trying again");
                self.cleanup_then(Operation::Rotate, |kms| kms.rotate_private_key()).await
            },
            result => result,
        };
        let key = self.logged(Operation::Rotate, result)?;

        tracing::info!(identity = %self.identity, key = %key.fingerprint(), "Rotated private key");
        Ok(key)
    }

    /// Delete local key material. The published key and backup remain.
    pub async fn cleanup(&self) -> Result<(), SessionError> {
        let result = self.call(Operation::Cleanup, |kms| kms.cleanup()).await;
        self.logged(Operation::Cleanup, result)?;

        tracing::info!(identity = %self.identity, "Cleaned up");
        Ok(())
    }

    /// Remove this identity's key from the directory.
    pub async fn unregister(&mut self) -> Result<(), SessionError> {
        let result = self.call(Operation::Unregister, |kms| kms.unregister()).await;
        self.logged(Operation::Unregister, result)?;
        self.state = SessionState::Authenticated;

        tracing::info!(identity = %self.identity, "Unregistered");
        Ok(())
    }

    /// Corrective path shared by recovery: clean up local key material, then
    /// run `operation` once more.
    async fn cleanup_then<'a, T, F>(
        &'a self,
        operation: Operation,
        f: impl FnOnce(&'a C::Service) -> F,
    ) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, KmsError>>,
    {
        self.call(Operation::Cleanup, |kms| kms.cleanup()).await?;
        self.call(operation, f).await
    }

    /// Run `f` against the key service, bounded and classified.
    ///
    /// Does not log; callers either recover or pass the error to
    /// [`Self::log_failure`].
    async fn call<'a, T, F>(
        &'a self,
        operation: Operation,
        f: impl FnOnce(&'a C::Service) -> F,
    ) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, KmsError>>,
    {
        match self.key_client.as_ref() {
            Some(kms) => self
                .bounded(operation, f(kms))
                .await
                .and_then(|result| result.map_err(|e| SessionError::from_kms(operation, e))),
            None => Err(SessionError::Precondition { identity: self.identity.clone() }),
        }
    }

    async fn call_connector(
        &self,
        tokens: Arc<BearerTokenProvider>,
    ) -> Result<C::Service, SessionError> {
        let key_client = self
            .bounded(Operation::Initialize, self.connector.initialize(tokens))
            .await?
            .map_err(|e| SessionError::from_kms(Operation::Initialize, e))?;

        if key_client.identity() != self.identity {
            return Err(SessionError::KeyServiceInit(KmsError::Unauthorized {
                reason: format!("key service bound to {}, expected {}", key_client.identity(), self.identity),
            }));
        }

        Ok(key_client)
    }

    /// Apply the configured timeout to `future`.
    async fn bounded<F: Future>(
        &self,
        operation: Operation,
        future: F,
    ) -> Result<F::Output, SessionError> {
        match self.config.operation_timeout {
            Some(timeout) => tokio::time::timeout(timeout, future)
                .await
                .map_err(|_| SessionError::Timeout { operation, timeout }),
            None => Ok(future.await),
        }
    }

    /// Log an error that is about to reach the caller.
    fn log_failure(&self, operation: Operation, error: &SessionError) {
        tracing::warn!(identity = %self.identity, %operation, %error, "operation failed");
    }

    fn logged<T>(&self, operation: Operation, result: Result<T, SessionError>) -> Result<T, SessionError> {
        result.inspect_err(|e| self.log_failure(operation, e))
    }
}
