//! IKE key material derivation
//!
//! Implements the key derivation of RFC 7296 Sections 2.14 and 2.18, fed by
//! one or more completed key exchanges (RFC 9370 chains additional shared
//! secrets in plan order):
//!
//! ```text
//! SKEYSEED           = prf(Ni | Nr, shared secrets)
//! SKEYSEED (chained) = prf(SK_d_old, shared secrets | Ni | Nr)
//!
//! {SK_d | SK_ai | SK_ar | SK_ei | SK_er | SK_pi | SK_pr}
//!     = prf+ (SKEYSEED, Ni | Nr | SPIi | SPIr)
//! ```

use zeroize::Zeroizing;

use super::proposal::{Proposal, TransformType};
use super::sa::IkeSaId;
use crate::crypto::hash::{HashAlgorithm, HashAlgorithmSet};
use crate::crypto::kex::{create_key_exchange, KeyExchange};
use crate::crypto::nonce::{NonceGen, RandomNonceGen};
use crate::crypto::prf::PrfAlgorithm;
use crate::error::{Error, Result};

/// The derived IKE_SA key suite
#[derive(Debug, Clone)]
pub struct IkeKeys {
    /// PRF the keys were derived with
    pub prf_alg: PrfAlgorithm,
    /// Key derivation key for child and rekeyed SAs
    pub sk_d: Zeroizing<Vec<u8>>,
    /// Initiator integrity key
    pub sk_ai: Zeroizing<Vec<u8>>,
    /// Responder integrity key
    pub sk_ar: Zeroizing<Vec<u8>>,
    /// Initiator encryption key
    pub sk_ei: Zeroizing<Vec<u8>>,
    /// Responder encryption key
    pub sk_er: Zeroizing<Vec<u8>>,
    /// Initiator AUTH payload key
    pub sk_pi: Zeroizing<Vec<u8>>,
    /// Responder AUTH payload key
    pub sk_pr: Zeroizing<Vec<u8>>,
}

/// Key material provider of one IKE_SA
#[derive(Debug, Default)]
pub struct Keymat {
    hash_algorithms: HashAlgorithmSet,
    keys: Option<IkeKeys>,
}

impl Keymat {
    /// Create an empty keymat
    pub fn new() -> Self {
        Keymat::default()
    }

    /// Instantiate a key exchange object for a method
    pub fn create_ke(&self, method: u16) -> Result<Box<dyn KeyExchange>> {
        create_key_exchange(method)
    }

    /// Create a nonce source
    pub fn create_nonce_gen(&self) -> Box<dyn NonceGen> {
        Box::new(RandomNonceGen::new())
    }

    /// Record a hash algorithm the peer supports for signature authentication
    pub fn add_hash_algorithm(&mut self, algo: HashAlgorithm) {
        self.hash_algorithms.add(algo);
    }

    /// The hash algorithms the peer announced
    pub fn hash_algorithms(&self) -> &HashAlgorithmSet {
        &self.hash_algorithms
    }

    /// The PRF and `SK_d` of the current key suite, once derived
    pub fn skd(&self) -> Option<(PrfAlgorithm, Zeroizing<Vec<u8>>)> {
        self.keys.as_ref().map(|k| (k.prf_alg, k.sk_d.clone()))
    }

    /// The derived key suite, if any
    pub fn keys(&self) -> Option<&IkeKeys> {
        self.keys.as_ref()
    }

    /// Whether keys have been derived
    pub fn is_derived(&self) -> bool {
        self.keys.is_some()
    }

    /// Derive the IKE_SA key suite
    ///
    /// `kes` are the completed key exchanges in plan order. `old` carries
    /// the predecessor's PRF and `SK_d` when rekeying or when chaining keys
    /// across intermediate exchanges; `None` selects the initial derivation.
    pub fn derive_ike_keys(
        &mut self,
        proposal: &Proposal,
        kes: &[&dyn KeyExchange],
        nonce_i: &[u8],
        nonce_r: &[u8],
        id: &IkeSaId,
        old: Option<(PrfAlgorithm, Zeroizing<Vec<u8>>)>,
    ) -> Result<()> {
        if kes.is_empty() {
            return Err(Error::Internal("no key exchange to derive from".to_string()));
        }

        let prf_id = proposal
            .get_algorithm(TransformType::Prf)
            .ok_or_else(|| Error::CryptoError("proposal carries no PRF".to_string()))?;
        let prf_alg = PrfAlgorithm::from_transform_id(prf_id)
            .ok_or_else(|| Error::CryptoError(format!("unsupported PRF transform {}", prf_id)))?;

        let mut secrets = Zeroizing::new(Vec::new());
        for ke in kes {
            secrets.extend_from_slice(&ke.shared_secret()?);
        }

        let skeyseed = Zeroizing::new(match &old {
            Some((old_prf, sk_d)) => {
                let mut data = Zeroizing::new(Vec::new());
                data.extend_from_slice(&secrets);
                data.extend_from_slice(nonce_i);
                data.extend_from_slice(nonce_r);
                old_prf.compute(sk_d, &data)
            }
            None => {
                let mut key = Vec::with_capacity(nonce_i.len() + nonce_r.len());
                key.extend_from_slice(nonce_i);
                key.extend_from_slice(nonce_r);
                prf_alg.compute(&key, &secrets)
            }
        });

        let encr_key_len = encryption_key_len(proposal)?;
        let integ_key_len = integrity_key_len(proposal);
        let prf_len = prf_alg.output_len();
        let total_len = prf_len + 2 * integ_key_len + 2 * encr_key_len + 2 * prf_len;

        let mut seed = Vec::new();
        seed.extend_from_slice(nonce_i);
        seed.extend_from_slice(nonce_r);
        seed.extend_from_slice(&id.initiator_spi);
        seed.extend_from_slice(&id.responder_spi);

        let keymat = Zeroizing::new(prf_alg.prf_plus(&skeyseed, &seed, total_len));

        let mut offset = 0;
        let mut take = |len: usize| {
            let part = Zeroizing::new(keymat[offset..offset + len].to_vec());
            offset += len;
            part
        };

        self.keys = Some(IkeKeys {
            prf_alg,
            sk_d: take(prf_len),
            sk_ai: take(integ_key_len),
            sk_ar: take(integ_key_len),
            sk_ei: take(encr_key_len),
            sk_er: take(encr_key_len),
            sk_pi: take(prf_len),
            sk_pr: take(prf_len),
        });

        Ok(())
    }
}

/// Encryption key length in bytes from the proposal's ENCR transform
fn encryption_key_len(proposal: &Proposal) -> Result<usize> {
    let transform = proposal
        .transforms
        .iter()
        .find(|t| t.transform_type == TransformType::Encr)
        .ok_or_else(|| Error::CryptoError("proposal carries no cipher".to_string()))?;

    if let Some(bits) = transform.key_length() {
        return Ok(bits as usize / 8);
    }
    // fixed-size or unattributed AEAD ciphers default to 256 bits
    Ok(32)
}

/// Integrity key length in bytes; zero for AEAD-only proposals
fn integrity_key_len(proposal: &Proposal) -> usize {
    match proposal.get_algorithm(TransformType::Integ) {
        Some(12) => 32, // HMAC-SHA2-256-128
        Some(13) => 48, // HMAC-SHA2-384-192
        Some(14) => 64, // HMAC-SHA2-512-256
        _ => 0,
    }
}
