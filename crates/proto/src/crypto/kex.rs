//! Key exchange providers
//!
//! A [`KeyExchange`] object is a stateful instance of one negotiated key
//! exchange method: it emits our public value, accepts the peer's value and
//! produces the shared secret. Classic Diffie-Hellman methods are symmetric;
//! for KEMs the initiator's public value is the encapsulation key and the
//! responder's is the ciphertext, so the call order (public value first on
//! the initiator, peer value first on the responder) decides the role.
//!
//! ECDH runs on `ring`, the 2048-bit MODP group on `num-bigint`, ML-KEM on
//! the RustCrypto `ml-kem` crate.

use ml_kem::kem::{Decapsulate, DecapsulationKey, Encapsulate, EncapsulationKey};
use ml_kem::{EncodedSizeUser, KemCore, MlKem1024Params, MlKem512Params, MlKem768Params};
use ring::agreement::{agree_ephemeral, EphemeralPrivateKey, UnparsedPublicKey};
use ring::rand::SystemRandom;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// Key exchange method identifiers (IKEv2 Transform Type 4 registry)
pub mod methods {
    /// 2048-bit MODP group (RFC 3526 group 14)
    pub const MODP_2048: u16 = 14;
    /// NIST P-256 (ECP-256)
    pub const ECP_256: u16 = 19;
    /// NIST P-384 (ECP-384)
    pub const ECP_384: u16 = 20;
    /// Curve25519
    pub const CURVE_25519: u16 = 31;
    /// ML-KEM-512 (RFC 9370 additional key exchange registry)
    pub const ML_KEM_512: u16 = 35;
    /// ML-KEM-768
    pub const ML_KEM_768: u16 = 36;
    /// ML-KEM-1024
    pub const ML_KEM_1024: u16 = 37;
}

/// A stateful key exchange instance
pub trait KeyExchange {
    /// The method this instance implements
    fn method(&self) -> u16;

    /// Our public value as it appears in the KE payload
    fn public_key(&mut self) -> Result<Vec<u8>>;

    /// Apply the peer's public value; computes the shared secret
    fn set_public_key(&mut self, value: &[u8]) -> Result<()>;

    /// The shared secret; only valid after `set_public_key` succeeded
    fn shared_secret(&self) -> Result<Zeroizing<Vec<u8>>>;
}

/// Instantiate a key exchange object for a negotiated method
pub fn create_key_exchange(method: u16) -> Result<Box<dyn KeyExchange>> {
    match method {
        methods::MODP_2048 => Ok(Box::new(Modp2048Exchange::new()?)),
        methods::ECP_256 | methods::ECP_384 | methods::CURVE_25519 => {
            Ok(Box::new(EcdhExchange::new(method)?))
        }
        methods::ML_KEM_512 => Ok(Box::new(MlKem512Exchange::new())),
        methods::ML_KEM_768 => Ok(Box::new(MlKem768Exchange::new())),
        methods::ML_KEM_1024 => Ok(Box::new(MlKem1024Exchange::new())),
        _ => Err(Error::UnsupportedKeMethod(method)),
    }
}

/// ECDH key exchange (X25519, ECP-256, ECP-384)
///
/// NIST curve public values travel as the raw affine coordinates (64 or 96
/// bytes); the SEC1 point-format byte is local to `ring`.
pub struct EcdhExchange {
    method: u16,
    algorithm: &'static ring::agreement::Algorithm,
    private_key: Option<EphemeralPrivateKey>,
    public_key: Vec<u8>,
    shared: Option<Zeroizing<Vec<u8>>>,
}

impl EcdhExchange {
    /// Generate an ephemeral key pair for `method`
    pub fn new(method: u16) -> Result<Self> {
        let algorithm = match method {
            methods::ECP_256 => &ring::agreement::ECDH_P256,
            methods::ECP_384 => &ring::agreement::ECDH_P384,
            methods::CURVE_25519 => &ring::agreement::X25519,
            _ => return Err(Error::UnsupportedKeMethod(method)),
        };

        let rng = SystemRandom::new();
        let private_key = EphemeralPrivateKey::generate(algorithm, &rng)
            .map_err(|_| Error::CryptoError("ECDH key generation failed".to_string()))?;
        let public_key = private_key
            .compute_public_key()
            .map_err(|_| Error::CryptoError("ECDH public key computation failed".to_string()))?;

        let public_key = if Self::is_nist_curve(method) {
            // drop the uncompressed-point marker for the wire
            public_key.as_ref()[1..].to_vec()
        } else {
            public_key.as_ref().to_vec()
        };

        Ok(EcdhExchange {
            method,
            algorithm,
            private_key: Some(private_key),
            public_key,
            shared: None,
        })
    }

    fn is_nist_curve(method: u16) -> bool {
        matches!(method, methods::ECP_256 | methods::ECP_384)
    }

    fn expected_peer_len(&self) -> usize {
        match self.method {
            methods::ECP_256 => 64,
            methods::ECP_384 => 96,
            _ => 32,
        }
    }
}

impl KeyExchange for EcdhExchange {
    fn method(&self) -> u16 {
        self.method
    }

    fn public_key(&mut self) -> Result<Vec<u8>> {
        Ok(self.public_key.clone())
    }

    fn set_public_key(&mut self, value: &[u8]) -> Result<()> {
        if value.len() != self.expected_peer_len() {
            return Err(Error::InvalidLength {
                expected: self.expected_peer_len(),
                actual: value.len(),
            });
        }

        let peer = if Self::is_nist_curve(self.method) {
            let mut point = Vec::with_capacity(value.len() + 1);
            point.push(0x04);
            point.extend_from_slice(value);
            point
        } else {
            value.to_vec()
        };

        let private_key = self
            .private_key
            .take()
            .ok_or_else(|| Error::InvalidState("peer public value already applied".to_string()))?;

        let peer_public_key = UnparsedPublicKey::new(self.algorithm, peer);
        let shared = agree_ephemeral(private_key, &peer_public_key, |key_material| {
            Zeroizing::new(key_material.to_vec())
        })
        .map_err(|_| Error::CryptoError("ECDH key agreement failed".to_string()))?;

        self.shared = Some(shared);
        Ok(())
    }

    fn shared_secret(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.shared
            .clone()
            .ok_or_else(|| Error::InvalidState("shared secret not yet computed".to_string()))
    }
}

/// Diffie-Hellman group 14 parameters (RFC 3526).
///
/// 2048-bit MODP group; public values and shared secrets are padded to the
/// full group size.
mod modp2048 {
    use num_bigint::BigUint;
    use once_cell::sync::Lazy;

    /// Group size in bytes
    pub const LEN: usize = 256;

    /// Group 14 prime (2048-bit)
    pub static P: Lazy<BigUint> = Lazy::new(|| {
        BigUint::from_bytes_be(
            &hex::decode(
                "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
                 29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
                 EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
                 E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                 EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
                 C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
                 83655D23DCA3AD961C62F356208552BB9ED529077096966D\
                 670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                 E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
                 DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
                 15728E5A8AACAA68FFFFFFFFFFFFFFFF",
            )
            .expect("Invalid hex"),
        )
    });

    /// Group 14 generator
    pub static G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));
}

/// 2048-bit MODP group key exchange
pub struct Modp2048Exchange {
    /// Private exponent (x)
    private_key: Vec<u8>,
    /// Public value (g^x mod p), padded to the group size
    public_key: Vec<u8>,
    shared: Option<Zeroizing<Vec<u8>>>,
}

impl Modp2048Exchange {
    /// Generate a new exchange with a random private exponent
    pub fn new() -> Result<Self> {
        use num_bigint::{BigUint, RandBigInt};

        let mut rng = rand::thread_rng();

        // 1 < x < p-1
        let p_minus_one = modp2048::P.clone() - 1u32;
        let x = rng.gen_biguint_range(&BigUint::from(2u32), &p_minus_one);

        let y = modp2048::G.modpow(&x, &modp2048::P);

        Ok(Modp2048Exchange {
            private_key: x.to_bytes_be(),
            public_key: pad_to(&y.to_bytes_be(), modp2048::LEN),
            shared: None,
        })
    }
}

impl KeyExchange for Modp2048Exchange {
    fn method(&self) -> u16 {
        methods::MODP_2048
    }

    fn public_key(&mut self) -> Result<Vec<u8>> {
        Ok(self.public_key.clone())
    }

    fn set_public_key(&mut self, value: &[u8]) -> Result<()> {
        use num_bigint::BigUint;

        if value.len() != modp2048::LEN {
            return Err(Error::InvalidLength {
                expected: modp2048::LEN,
                actual: value.len(),
            });
        }

        let y_peer = BigUint::from_bytes_be(value);

        // validate the peer's public value: 1 < y < p-1
        if y_peer <= BigUint::from(1u32) || y_peer >= *modp2048::P {
            return Err(Error::CryptoError(
                "Invalid peer public value: out of range".to_string(),
            ));
        }

        let x = BigUint::from_bytes_be(&self.private_key);
        let k = y_peer.modpow(&x, &modp2048::P);

        self.shared = Some(Zeroizing::new(pad_to(&k.to_bytes_be(), modp2048::LEN)));
        Ok(())
    }

    fn shared_secret(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.shared
            .clone()
            .ok_or_else(|| Error::InvalidState("shared secret not yet computed".to_string()))
    }
}

impl Drop for Modp2048Exchange {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Left-pad a big-endian integer to `len` bytes
fn pad_to(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(bytes);
    out
}

macro_rules! impl_ml_kem_exchange {
    ($name:ident, $params:ty, $method:expr, $doc:expr) => {
        #[doc = $doc]
        ///
        /// Until either side of the exchange is driven, the instance is
        /// role-neutral: emitting the public value first makes it the
        /// encapsulation-key holder, applying the peer value first makes it
        /// the encapsulator.
        pub struct $name {
            dk: Option<Zeroizing<Vec<u8>>>,
            ek: Option<Vec<u8>>,
            ct: Option<Vec<u8>>,
            shared: Option<Zeroizing<Vec<u8>>>,
        }

        impl $name {
            /// Create a role-neutral instance
            pub fn new() -> Self {
                $name {
                    dk: None,
                    ek: None,
                    ct: None,
                    shared: None,
                }
            }

            fn generate(&mut self) {
                let mut rng = rand::thread_rng();
                let (dk, ek) = ml_kem::kem::Kem::<$params>::generate(&mut rng);
                self.dk = Some(Zeroizing::new(dk.as_bytes().to_vec()));
                self.ek = Some(ek.as_bytes().to_vec());
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl KeyExchange for $name {
            fn method(&self) -> u16 {
                $method
            }

            fn public_key(&mut self) -> Result<Vec<u8>> {
                // the encapsulator's public value is the ciphertext
                if let Some(ct) = &self.ct {
                    return Ok(ct.clone());
                }
                if self.ek.is_none() {
                    self.generate();
                }
                Ok(self.ek.clone().expect("keypair generated above"))
            }

            fn set_public_key(&mut self, value: &[u8]) -> Result<()> {
                let mut rng = rand::thread_rng();

                if let Some(dk_bytes) = &self.dk {
                    // we hold the decapsulation key, the peer sent a ciphertext
                    let dk = DecapsulationKey::<$params>::from_bytes(
                        dk_bytes.as_slice().try_into().map_err(|_| {
                            Error::Internal("stored decapsulation key corrupt".to_string())
                        })?,
                    );
                    let ct = value
                        .try_into()
                        .map_err(|_| Error::CryptoError("malformed ciphertext".to_string()))?;
                    let ss = dk
                        .decapsulate(ct)
                        .map_err(|_| Error::CryptoError("decapsulation failed".to_string()))?;
                    self.shared = Some(Zeroizing::new(ss.as_slice().to_vec()));
                } else {
                    // the peer sent its encapsulation key
                    let ek = EncapsulationKey::<$params>::from_bytes(
                        value
                            .try_into()
                            .map_err(|_| Error::CryptoError("malformed encapsulation key".to_string()))?,
                    );
                    let (ct, ss) = ek
                        .encapsulate(&mut rng)
                        .map_err(|_| Error::CryptoError("encapsulation failed".to_string()))?;
                    self.ct = Some(ct.as_slice().to_vec());
                    self.shared = Some(Zeroizing::new(ss.as_slice().to_vec()));
                }
                Ok(())
            }

            fn shared_secret(&self) -> Result<Zeroizing<Vec<u8>>> {
                self.shared
                    .clone()
                    .ok_or_else(|| Error::InvalidState("shared secret not yet computed".to_string()))
            }
        }
    };
}

impl_ml_kem_exchange!(
    MlKem512Exchange,
    MlKem512Params,
    methods::ML_KEM_512,
    "ML-KEM-512 key exchange"
);
impl_ml_kem_exchange!(
    MlKem768Exchange,
    MlKem768Params,
    methods::ML_KEM_768,
    "ML-KEM-768 key exchange"
);
impl_ml_kem_exchange!(
    MlKem1024Exchange,
    MlKem1024Params,
    methods::ML_KEM_1024,
    "ML-KEM-1024 key exchange"
);

#[cfg(test)]
mod tests {
    use super::*;

    fn agree(method: u16) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
        let mut alice = create_key_exchange(method).unwrap();
        let mut bob = create_key_exchange(method).unwrap();

        // initiator emits first, responder applies first
        let alice_public = alice.public_key().unwrap();
        bob.set_public_key(&alice_public).unwrap();
        let bob_public = bob.public_key().unwrap();
        alice.set_public_key(&bob_public).unwrap();

        (alice.shared_secret().unwrap(), bob.shared_secret().unwrap())
    }

    #[test]
    fn test_x25519_agreement() {
        let (a, b) = agree(methods::CURVE_25519);
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_ecp256_agreement() {
        let (a, b) = agree(methods::ECP_256);
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_ecp384_agreement() {
        let (a, b) = agree(methods::ECP_384);
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_modp2048_agreement() {
        let (a, b) = agree(methods::MODP_2048);
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 256);
    }

    #[test]
    fn test_ml_kem_768_agreement() {
        let (a, b) = agree(methods::ML_KEM_768);
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_public_value_sizes() {
        let mut ke = create_key_exchange(methods::ECP_256).unwrap();
        assert_eq!(ke.public_key().unwrap().len(), 64);

        let mut ke = create_key_exchange(methods::ECP_384).unwrap();
        assert_eq!(ke.public_key().unwrap().len(), 96);

        let mut ke = create_key_exchange(methods::CURVE_25519).unwrap();
        assert_eq!(ke.public_key().unwrap().len(), 32);

        let mut ke = create_key_exchange(methods::ML_KEM_768).unwrap();
        assert_eq!(ke.public_key().unwrap().len(), 1184);
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!(matches!(
            create_key_exchange(0x7fff),
            Err(Error::UnsupportedKeMethod(0x7fff))
        ));
    }

    #[test]
    fn test_ecdh_rejects_bad_length() {
        let mut ke = create_key_exchange(methods::ECP_256).unwrap();
        assert!(ke.set_public_key(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_shared_secret_requires_peer_value() {
        let ke = EcdhExchange::new(methods::CURVE_25519).unwrap();
        assert!(ke.shared_secret().is_err());
    }

    #[test]
    fn test_method_accessors() {
        assert_eq!(
            create_key_exchange(methods::MODP_2048).unwrap().method(),
            14
        );
        assert_eq!(
            create_key_exchange(methods::ML_KEM_1024).unwrap().method(),
            37
        );
    }
}
