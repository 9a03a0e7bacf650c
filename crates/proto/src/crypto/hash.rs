//! Hash algorithm registry for signature authentication (RFC 7427)
//!
//! The SIGNATURE_HASH_ALGORITHMS notify carries 16-bit identifiers from the
//! IKEv2 hash algorithm registry. We track the algorithms the peer accepts
//! in a small ordered set on the keymat.

use std::collections::BTreeSet;

/// Hash algorithms from the IKEv2 registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum HashAlgorithm {
    /// SHA-1 (registered but not acceptable for IKEv2 signatures)
    Sha1 = 1,
    /// SHA2-256
    Sha256 = 2,
    /// SHA2-384
    Sha384 = 3,
    /// SHA2-512
    Sha512 = 4,
    /// Identity hash (RFC 8420, for Ed25519/Ed448)
    Identity = 5,
}

impl HashAlgorithm {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(HashAlgorithm::Sha1),
            2 => Some(HashAlgorithm::Sha256),
            3 => Some(HashAlgorithm::Sha384),
            4 => Some(HashAlgorithm::Sha512),
            5 => Some(HashAlgorithm::Identity),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Check whether this algorithm may be used for IKEv2 signature
    /// authentication. SHA-1 is in the registry but excluded per RFC 8247.
    pub fn valid_for_ikev2(self) -> bool {
        !matches!(self, HashAlgorithm::Sha1)
    }

    /// All algorithms the crypto provider can offer for IKEv2
    pub fn all_for_ikev2() -> [HashAlgorithm; 4] {
        [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
            HashAlgorithm::Identity,
        ]
    }
}

/// An ordered, duplicate-free set of hash algorithms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashAlgorithmSet {
    algos: BTreeSet<HashAlgorithm>,
}

impl HashAlgorithmSet {
    /// Create an empty set
    pub fn new() -> Self {
        HashAlgorithmSet::default()
    }

    /// Add an algorithm; duplicates are ignored
    pub fn add(&mut self, algo: HashAlgorithm) {
        self.algos.insert(algo);
    }

    /// Number of algorithms in the set
    pub fn len(&self) -> usize {
        self.algos.len()
    }

    /// True if no algorithm was added
    pub fn is_empty(&self) -> bool {
        self.algos.is_empty()
    }

    /// Check membership
    pub fn contains(&self, algo: HashAlgorithm) -> bool {
        self.algos.contains(&algo)
    }

    /// Iterate in registry order
    pub fn iter(&self) -> impl Iterator<Item = HashAlgorithm> + '_ {
        self.algos.iter().copied()
    }
}
