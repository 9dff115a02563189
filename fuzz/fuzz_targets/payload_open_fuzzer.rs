//! Fuzz target for opening encrypted payloads
//!
//! Prevent forged or corrupted payloads from decrypting to attacker-chosen
//! plaintext.
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary input handed straight to `decrypt`
//! - Bit flips: XOR masks applied to a genuine Alice → Bob payload
//! - Truncation: genuine payload cut at an arbitrary offset
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Failures are `Decryption` or `SignatureVerification`, nothing else
//! - Anything that opens yields exactly the original plaintext

#![no_main]

use std::{sync::OnceLock, time::Duration};

use arbitrary::Arbitrary;
use async_trait::async_trait;
use libfuzzer_sys::fuzz_target;
use sealpair_kms::{
    memory::{MemoryCloud, MemoryKms, MemoryKmsConfig},
    EncryptedPayload, KeyService, KeyServiceConnector, KmsError, KmsJwt, KmsToken, PublicKey,
    SeededEnv, TokenProvider,
};
use tokio::runtime::Runtime;

const SECRET: &[u8] = b"fuzz secret";
const MESSAGE: &[u8] = b"Hello Bob! How are you?";

struct Tokens {
    jwt: KmsJwt,
    identity: &'static str,
}

#[async_trait]
impl TokenProvider for Tokens {
    async fn refresh(&self) -> Result<KmsToken, KmsError> {
        self.jwt.issue(self.identity, Duration::from_secs(3600))
    }
}

struct Fixture {
    runtime: Runtime,
    bob: MemoryKms<SeededEnv>,
    alice_key: PublicKey,
    payload: Vec<u8>,
}

fn fixture() -> &'static Fixture {
    static FIXTURE: OnceLock<Fixture> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let cloud = MemoryCloud::new(
            SeededEnv::with_seed(0),
            KmsJwt::new(SECRET),
            MemoryKmsConfig { backup_rounds: 1 },
        );

        let (bob, alice_key, payload) = runtime.block_on(async {
            let tokens = |identity| std::sync::Arc::new(Tokens { jwt: KmsJwt::new(SECRET), identity });
            let alice = cloud.initialize(tokens("Alice")).await.unwrap();
            let bob = cloud.initialize(tokens("Bob")).await.unwrap();
            let alice_key = alice.register().await.unwrap();
            bob.register().await.unwrap();

            let lookup = alice.lookup_public_keys(&["Bob".to_string()]).await.unwrap();
            let payload = alice.encrypt(MESSAGE, &lookup).await.unwrap();
            (bob, alice_key, payload.into_bytes())
        });

        Fixture { runtime, bob, alice_key, payload }
    })
}

#[derive(Debug, Arbitrary)]
enum PayloadInput {
    Raw(Vec<u8>),
    Flipped(Vec<(u16, u8)>),
    Truncated(u16),
}

fuzz_target!(|input: PayloadInput| {
    let fixture = fixture();

    let bytes = match input {
        PayloadInput::Raw(bytes) => bytes,
        PayloadInput::Flipped(flips) => {
            let mut bytes = fixture.payload.clone();
            for (index, mask) in flips {
                let len = bytes.len();
                bytes[usize::from(index) % len] ^= mask;
            }
            bytes
        },
        PayloadInput::Truncated(at) => {
            let mut bytes = fixture.payload.clone();
            bytes.truncate(usize::from(at) % fixture.payload.len());
            bytes
        },
    };

    let payload = EncryptedPayload::from(bytes);
    let result = fixture.runtime.block_on(fixture.bob.decrypt(&payload, &fixture.alice_key));

    match result {
        Ok(plaintext) => assert_eq!(plaintext, MESSAGE, "forged payload opened"),
        Err(KmsError::Decryption { .. } | KmsError::SignatureVerification { .. }) => {},
        Err(other) => panic!("unexpected error kind: {other:?}"),
    }
});
