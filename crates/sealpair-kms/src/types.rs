//! Values exchanged across the KMS boundary.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Size of a recipient key id in bytes.
pub(crate) const KEY_ID_SIZE: usize = 8;

/// Published public key of one identity.
///
/// Carries an Ed25519 verification key for signatures and an X25519 key for
/// encrypting to the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    identity: String,
    signing: [u8; 32],
    exchange: [u8; 32],
}

impl PublicKey {
    /// Create a public key handle from raw key bytes.
    pub fn new(identity: impl Into<String>, signing: [u8; 32], exchange: [u8; 32]) -> Self {
        Self { identity: identity.into(), signing, exchange }
    }

    /// Identity this key belongs to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Ed25519 verification key bytes.
    pub fn signing_bytes(&self) -> &[u8; 32] {
        &self.signing
    }

    /// X25519 key-agreement key bytes.
    pub fn exchange_bytes(&self) -> &[u8; 32] {
        &self.exchange
    }

    /// Short key id: the first bytes of SHA-256 over both keys.
    pub(crate) fn key_id(&self) -> [u8; KEY_ID_SIZE] {
        let digest = Sha256::new().chain_update(self.signing).chain_update(self.exchange).finalize();
        let mut id = [0u8; KEY_ID_SIZE];
        id.copy_from_slice(&digest[..KEY_ID_SIZE]);
        id
    }

    /// Hex fingerprint for display and logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.key_id())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.fingerprint())
    }
}

/// Result of a public key lookup: identity → public key.
///
/// Immutable once returned. Ordered by identity so iteration and logs are
/// stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupResult {
    keys: BTreeMap<String, PublicKey>,
}

impl LookupResult {
    /// Key for `identity`, if it was part of the lookup.
    pub fn get(&self, identity: &str) -> Option<&PublicKey> {
        self.keys.get(identity)
    }

    /// Check if `identity` was resolved.
    pub fn contains(&self, identity: &str) -> bool {
        self.keys.contains_key(identity)
    }

    /// Number of resolved identities.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolved identities in order.
    pub fn identities(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys.keys().map(String::as_str)
    }

    /// Resolved keys in identity order.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> + '_ {
        self.keys.values()
    }
}

impl FromIterator<PublicKey> for LookupResult {
    fn from_iter<I: IntoIterator<Item = PublicKey>>(iter: I) -> Self {
        Self { keys: iter.into_iter().map(|key| (key.identity.clone(), key)).collect() }
    }
}

/// Opaque signed-and-encrypted payload.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedPayload(Vec<u8>);

impl EncryptedPayload {
    /// Raw payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the payload, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the payload holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for EncryptedPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedPayload(<{} bytes>)", self.0.len())
    }
}
