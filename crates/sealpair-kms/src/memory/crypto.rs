//! Key material and payload sealing for the reference KMS.
//!
//! # Payload format
//!
//! ```text
//! Envelope (CBOR)
//!   ├─ version
//!   ├─ nonce, body         XChaCha20-Poly1305(content_key, Signed)
//!   └─ recipients[]        one WrappedKey per recipient key
//!        ├─ key_id         SHA-256(signing || exchange)[..8]
//!        ├─ ephemeral      X25519 public key
//!        └─ nonce, wrapped XChaCha20-Poly1305(kek, content_key)
//!
//! kek = HKDF-SHA256(salt = ephemeral || recipient_exchange,
//!                   ikm  = X25519(ephemeral, recipient_exchange))
//! ```
//!
//! `Signed` carries the plaintext and an Ed25519 signature over it, so the
//! signature is only visible to recipients.
//!
//! Backups wrap the 32-byte key seed under PBKDF2-HMAC-SHA256(password).

use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};
use zeroize::Zeroizing;

use crate::{
    env::Environment,
    error::KmsError,
    types::{EncryptedPayload, KEY_ID_SIZE, PublicKey},
};

/// Current envelope format version.
const ENVELOPE_VERSION: u8 = 1;

/// Size of the key seed all key material derives from.
const SEED_SIZE: usize = 32;

/// XChaCha20 nonce size.
const NONCE_SIZE: usize = 24;

/// Backup salt size.
const SALT_SIZE: usize = 16;

/// Domain separation labels.
const SIGNING_INFO: &[u8] = b"sealpair signing key v1";
const EXCHANGE_INFO: &[u8] = b"sealpair exchange key v1";
const KEK_INFO: &[u8] = b"sealpair content key wrap v1";

/// Private key material of one device.
///
/// Both the Ed25519 and X25519 keys derive from a single seed, which is the
/// only value that gets escrowed.
pub(crate) struct KeyMaterial {
    seed: Zeroizing<[u8; SEED_SIZE]>,
    signing: SigningKey,
    exchange: StaticSecret,
}

impl KeyMaterial {
    /// Generate fresh key material.
    pub(crate) fn generate<E: Environment>(env: &E) -> Result<Self, KmsError> {
        Self::from_seed(Zeroizing::new(env.random_array()))
    }

    fn from_seed(seed: Zeroizing<[u8; SEED_SIZE]>) -> Result<Self, KmsError> {
        let signing = SigningKey::from_bytes(&*expand(seed.as_ref(), None, SIGNING_INFO)?);
        let exchange = StaticSecret::from(*expand(seed.as_ref(), None, EXCHANGE_INFO)?);
        Ok(Self { seed, signing, exchange })
    }

    /// Public half, published under `identity`.
    pub(crate) fn public_key(&self, identity: &str) -> PublicKey {
        PublicKey::new(
            identity,
            self.signing.verifying_key().to_bytes(),
            ExchangePublic::from(&self.exchange).to_bytes(),
        )
    }
}

/// Password-wrapped key seed held by the escrow.
#[derive(Clone)]
pub(crate) struct BackupEntry {
    salt: [u8; SALT_SIZE],
    rounds: u32,
    nonce: [u8; NONCE_SIZE],
    wrapped: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    nonce: [u8; NONCE_SIZE],
    body: Vec<u8>,
    recipients: Vec<WrappedKey>,
}

#[derive(Serialize, Deserialize)]
struct WrappedKey {
    key_id: [u8; KEY_ID_SIZE],
    ephemeral: [u8; 32],
    nonce: [u8; NONCE_SIZE],
    wrapped: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Signed {
    plaintext: Vec<u8>,
    signature: Vec<u8>,
}

/// Sign `plaintext` with `sender` and encrypt it for every recipient.
pub(crate) fn seal<'a, E: Environment>(
    sender: &KeyMaterial,
    plaintext: &[u8],
    recipients: impl IntoIterator<Item = &'a PublicKey>,
    env: &E,
) -> Result<EncryptedPayload, KmsError> {
    let signature = sender.signing.sign(plaintext);
    let signed = Signed { plaintext: plaintext.to_vec(), signature: signature.to_bytes().to_vec() };
    let signed = Zeroizing::new(to_cbor(&signed)?);

    let content_key = Zeroizing::new(env.random_array::<32>());
    let nonce = env.random_array::<NONCE_SIZE>();
    let body = aead_seal(&content_key, &nonce, &signed)?;

    let mut wrapped_keys = Vec::new();
    for recipient in recipients {
        let ephemeral = StaticSecret::from(env.random_array::<32>());
        let ephemeral_public = ExchangePublic::from(&ephemeral).to_bytes();
        let recipient_exchange = ExchangePublic::from(*recipient.exchange_bytes());

        let shared = ephemeral.diffie_hellman(&recipient_exchange);
        if !shared.was_contributory() {
            return Err(KmsError::Encryption {
                reason: format!("degenerate exchange key for {}", recipient.identity()),
            });
        }

        let kek = key_encryption_key(
            shared.as_bytes(),
            &ephemeral_public,
            recipient.exchange_bytes(),
        )?;
        let wrap_nonce = env.random_array::<NONCE_SIZE>();
        let wrapped = aead_seal(&kek, &wrap_nonce, content_key.as_ref())?;

        wrapped_keys.push(WrappedKey {
            key_id: recipient.key_id(),
            ephemeral: ephemeral_public,
            nonce: wrap_nonce,
            wrapped,
        });
    }

    let envelope = Envelope { version: ENVELOPE_VERSION, nonce, body, recipients: wrapped_keys };
    Ok(EncryptedPayload::from(to_cbor(&envelope)?))
}

/// Decrypt `payload` with `receiver`'s key and verify it against `sender`.
pub(crate) fn open(
    receiver: &KeyMaterial,
    payload: &EncryptedPayload,
    sender: &PublicKey,
) -> Result<Vec<u8>, KmsError> {
    let envelope: Envelope = from_cbor(payload.as_bytes())
        .map_err(|e| KmsError::Decryption { reason: e.to_string() })?;

    if envelope.version != ENVELOPE_VERSION {
        return Err(KmsError::Decryption {
            reason: format!("unsupported envelope version {}", envelope.version),
        });
    }

    let own_key = receiver.public_key("");
    let own_id = own_key.key_id();
    let wrapped = envelope.recipients.iter().find(|w| w.key_id == own_id).ok_or_else(|| {
        KmsError::Decryption { reason: "payload is not addressed to the local key".to_string() }
    })?;

    let shared = receiver.exchange.diffie_hellman(&ExchangePublic::from(wrapped.ephemeral));
    let kek = key_encryption_key(shared.as_bytes(), &wrapped.ephemeral, own_key.exchange_bytes())?;

    let content_key = Zeroizing::new(aead_open(&kek, &wrapped.nonce, &wrapped.wrapped)?);
    let content_key: Zeroizing<[u8; 32]> =
        Zeroizing::new(content_key.as_slice().try_into().map_err(|_| KmsError::Decryption {
            reason: "wrapped content key has wrong length".to_string(),
        })?);

    let signed = Zeroizing::new(aead_open(&content_key, &envelope.nonce, &envelope.body)?);
    let signed: Signed = from_cbor(&signed)
        .map_err(|e| KmsError::Decryption { reason: e.to_string() })?;

    let verification_failed =
        || KmsError::SignatureVerification { identity: sender.identity().to_string() };
    let verifying_key =
        VerifyingKey::from_bytes(sender.signing_bytes()).map_err(|_| verification_failed())?;
    let signature = Signature::from_slice(&signed.signature).map_err(|_| verification_failed())?;
    verifying_key.verify_strict(&signed.plaintext, &signature).map_err(|_| verification_failed())?;

    Ok(signed.plaintext)
}

/// Wrap the key seed under a password-derived key.
pub(crate) fn wrap_seed<E: Environment>(
    material: &KeyMaterial,
    password: &str,
    rounds: u32,
    env: &E,
) -> Result<BackupEntry, KmsError> {
    let salt = env.random_array::<SALT_SIZE>();
    let nonce = env.random_array::<NONCE_SIZE>();
    let key = password_key(password, &salt, rounds);
    let wrapped = aead_seal(&key, &nonce, material.seed.as_ref())?;

    Ok(BackupEntry { salt, rounds, nonce, wrapped })
}

/// Recover key material from a backup entry.
///
/// Any authentication failure is reported as a wrong password.
pub(crate) fn unwrap_seed(entry: &BackupEntry, password: &str) -> Result<KeyMaterial, KmsError> {
    let key = password_key(password, &entry.salt, entry.rounds);
    let seed = Zeroizing::new(
        XChaCha20Poly1305::new(Key::from_slice(key.as_ref()))
            .decrypt(XNonce::from_slice(&entry.nonce), entry.wrapped.as_slice())
            .map_err(|_| KmsError::WrongPassword)?,
    );

    let seed: [u8; SEED_SIZE] = seed.as_slice().try_into().map_err(|_| KmsError::Malformed {
        reason: "backup seed has wrong length".to_string(),
    })?;
    KeyMaterial::from_seed(Zeroizing::new(seed))
}

fn password_key(password: &str, salt: &[u8], rounds: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, key.as_mut());
    key
}

fn key_encryption_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<Zeroizing<[u8; 32]>, KmsError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);
    expand(shared, Some(&salt), KEK_INFO)
}

fn expand(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<Zeroizing<[u8; 32]>, KmsError> {
    let mut okm = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, okm.as_mut())
        .map_err(|e| KmsError::Internal { reason: format!("key derivation failed: {e}") })?;
    Ok(okm)
}

fn aead_seal(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
    XChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|e| KmsError::Encryption { reason: e.to_string() })
}

fn aead_open(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| KmsError::Decryption { reason: "authentication tag mismatch".to_string() })
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, KmsError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| KmsError::Internal { reason: format!("CBOR encoding failed: {e}") })?;
    Ok(bytes)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, KmsError> {
    ciborium::de::from_reader(bytes).map_err(|e| KmsError::Malformed { reason: e.to_string() })
}
