//! Cryptographic primitives for the IKEv2 engine
//!
//! Key exchange providers, the negotiated PRF, the RFC 7427 hash-algorithm
//! registry and the nonce source. All algorithm implementations come from
//! vetted libraries (`ring`, RustCrypto); this module only adapts them to
//! the shapes the protocol code consumes.

pub mod hash;
pub mod kex;
pub mod nonce;
pub mod prf;

pub use hash::{HashAlgorithm, HashAlgorithmSet};
pub use kex::{create_key_exchange, KeyExchange};
pub use nonce::{NonceGen, RandomNonceGen, NONCE_SIZE};
pub use prf::PrfAlgorithm;
