//! Nonce source for IKE exchanges
//!
//! Nonces are mixed into the key derivation and must be fresh for every
//! IKE_SA. The protocol-defined size is fixed; retries within one task
//! reuse the nonce generated on the first attempt.

use rand::RngCore;

use crate::error::{Error, Result};

/// Nonce size used in IKE exchanges (RFC 7296 requires 16..256 octets)
pub const NONCE_SIZE: usize = 32;

/// A source of fresh random nonces
pub trait NonceGen {
    /// Allocate a nonce of exactly `len` bytes
    fn allocate_nonce(&mut self, len: usize) -> Result<Vec<u8>>;
}

/// Nonce source backed by the thread-local CSPRNG
#[derive(Debug, Default)]
pub struct RandomNonceGen;

impl RandomNonceGen {
    /// Create a new nonce source
    pub fn new() -> Self {
        RandomNonceGen
    }
}

impl NonceGen for RandomNonceGen {
    fn allocate_nonce(&mut self, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Err(Error::NonceAllocationFailed);
        }
        let mut nonce = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut nonce);
        Ok(nonce)
    }
}
