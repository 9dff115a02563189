//! Sealpair key management boundary.
//!
//! This crate defines the capability a client session drives to manage
//! long-term keys, and an in-memory reference implementation of it.
//!
//! # Components
//!
//! - [`KeyServiceConnector`] / [`KeyService`]: the KMS capability. A connector
//!   bootstraps a per-device service from a [`TokenProvider`].
//! - [`TokenProvider`]: capability object handing out fresh KMS access tokens.
//!   Services call [`TokenProvider::refresh`] before every directory or escrow
//!   operation.
//! - [`KmsError`]: closed error enumeration returned across the boundary.
//! - [`memory`]: `MemoryCloud` (shared directory + backup escrow) and
//!   `MemoryKms` (per-device service).
//! - [`Environment`]: randomness source, [`SystemEnv`] in production and
//!   [`SeededEnv`] for reproducible runs.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
mod error;
pub mod memory;
mod service;
mod system_env;
mod token;
mod types;

pub use env::{Environment, SeededEnv};
pub use error::KmsError;
pub use service::{KeyService, KeyServiceConnector};
pub use system_env::SystemEnv;
pub use token::{KmsClaims, KmsJwt, KmsToken, TokenProvider};
pub use types::{EncryptedPayload, LookupResult, PublicKey};
