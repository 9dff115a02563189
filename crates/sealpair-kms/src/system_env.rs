//! Production Environment implementation using OS randomness.

use rand::RngCore;

use crate::env::Environment;

/// Production environment using the operating system's cryptographic RNG.
///
/// # Security
///
/// The RNG uses `getrandom`, which reads the OS entropy pool. This is
/// suitable for key seeds, AEAD nonces and bearer tokens.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(e) = getrandom::fill(buffer) {
            // Output becomes key material: fall back to a CSPRNG, never zeros.
            tracing::error!("getrandom failed: {}", e);
            rand::thread_rng().fill_bytes(buffer);
        }
    }
}
