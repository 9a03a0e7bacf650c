//! Daemon configuration consumed by the IKE exchanges
//!
//! Provides the strict-default settings knob block, the per-connection IKE
//! and peer configurations, the backend store used to find alternative
//! configurations for a host pair, and the credential store the responder
//! consults for PPK availability.

use std::net::SocketAddr;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::hash::HashAlgorithm;
use crate::ikev2::proposal::{select_proposal, Proposal, SelectionFlags, TransformType};

/// Global tunables, with their defaults
#[derive(Debug, Clone)]
pub struct Settings {
    /// Use signature authentication as per RFC 7427
    pub signature_authentication: bool,

    /// Follow IKEv2 redirects as per RFC 5685
    pub follow_redirects: bool,

    /// Accept proposals containing private-use algorithm identifiers
    pub accept_private_algs: bool,

    /// Prefer locally configured proposals over the peer's order
    pub prefer_configured_proposals: bool,

    /// On rekeying, reuse the key exchange method of the previous IKE_SA
    pub prefer_previous_dh_group: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            signature_authentication: true,
            follow_redirects: true,
            accept_private_algs: false,
            prefer_configured_proposals: true,
            prefer_previous_dh_group: true,
        }
    }
}

/// IKE fragmentation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fragmentation {
    /// Never use or announce fragmentation
    No,
    /// Accept fragmented messages but don't announce support
    Accept,
    /// Announce and use fragmentation
    #[default]
    Yes,
}

/// Childless IKE_SA policy (RFC 6023)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Childless {
    /// Never accept childless IKE_SAs
    Never,
    /// Accept childless IKE_SAs when the peer requests them
    #[default]
    Allowed,
    /// Propose childless IKE_SAs ourselves
    Preferred,
}

/// Connection-level IKE configuration
#[derive(Debug, Clone)]
pub struct IkeConfig {
    proposals: Vec<Proposal>,
    fragmentation: Fragmentation,
    childless: Childless,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

impl IkeConfig {
    /// Create an empty configuration with default policies
    pub fn new() -> Self {
        IkeConfig {
            proposals: Vec::new(),
            fragmentation: Fragmentation::default(),
            childless: Childless::default(),
            local: None,
            remote: None,
        }
    }

    /// Add an IKE proposal (builder form)
    pub fn add_proposal(mut self, proposal: Proposal) -> Self {
        self.proposals.push(proposal);
        self
    }

    /// Set the fragmentation policy
    pub fn with_fragmentation(mut self, fragmentation: Fragmentation) -> Self {
        self.fragmentation = fragmentation;
        self
    }

    /// Set the childless policy
    pub fn with_childless(mut self, childless: Childless) -> Self {
        self.childless = childless;
        self
    }

    /// Restrict the configuration to a host pair
    pub fn with_hosts(mut self, local: SocketAddr, remote: SocketAddr) -> Self {
        self.local = Some(local);
        self.remote = Some(remote);
        self
    }

    /// A copy of the configured proposal list
    pub fn proposals(&self) -> Vec<Proposal> {
        self.proposals.clone()
    }

    /// First configured algorithm of the given transform type
    pub fn get_algorithm(&self, transform_type: TransformType) -> Option<u16> {
        self.proposals
            .iter()
            .find_map(|p| p.get_algorithm(transform_type))
    }

    /// Select a proposal from a supplied list against this configuration
    pub fn select_proposal(
        &self,
        supplied: &[Proposal],
        flags: SelectionFlags,
    ) -> Option<Proposal> {
        select_proposal(supplied, &self.proposals, flags)
    }

    /// The fragmentation policy
    pub fn fragmentation(&self) -> Fragmentation {
        self.fragmentation
    }

    /// The childless policy
    pub fn childless(&self) -> Childless {
        self.childless
    }

    /// Check whether this configuration applies to a host pair
    ///
    /// Unset hosts act as wildcards; ports are not significant.
    pub fn matches(&self, local: SocketAddr, remote: SocketAddr) -> bool {
        let local_ok = self.local.map(|l| l.ip() == local.ip()).unwrap_or(true);
        let remote_ok = self.remote.map(|r| r.ip() == remote.ip()).unwrap_or(true);
        local_ok && remote_ok
    }
}

impl Default for IkeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Signature schemes configurable for IKE authentication (RFC 7427)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// RSASSA-PSS with SHA-256
    RsaSha256,
    /// RSASSA-PSS with SHA-384
    RsaSha384,
    /// RSASSA-PSS with SHA-512
    RsaSha512,
    /// ECDSA on P-256 with SHA-256
    EcdsaSha256,
    /// ECDSA on P-384 with SHA-384
    EcdsaSha384,
    /// ECDSA on P-521 with SHA-512
    EcdsaSha512,
    /// Ed25519 (identity hash)
    Ed25519,
}

impl SignatureScheme {
    /// The hash algorithm the scheme needs the peer to support
    pub fn hash(self) -> HashAlgorithm {
        match self {
            SignatureScheme::RsaSha256 | SignatureScheme::EcdsaSha256 => HashAlgorithm::Sha256,
            SignatureScheme::RsaSha384 | SignatureScheme::EcdsaSha384 => HashAlgorithm::Sha384,
            SignatureScheme::RsaSha512 | SignatureScheme::EcdsaSha512 => HashAlgorithm::Sha512,
            SignatureScheme::Ed25519 => HashAlgorithm::Identity,
        }
    }
}

/// One authentication round of a peer configuration
#[derive(Debug, Clone, Default)]
pub struct AuthRound {
    /// Signature schemes pinned for IKE authentication in this round
    pub ike_signature_schemes: Vec<SignatureScheme>,
}

/// Peer-level configuration
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    auth_rounds: Vec<AuthRound>,
    ppk_id: Option<String>,
}

impl PeerConfig {
    /// Create an empty peer configuration
    pub fn new() -> Self {
        PeerConfig::default()
    }

    /// Add an authentication round (builder form)
    pub fn add_auth_round(mut self, round: AuthRound) -> Self {
        self.auth_rounds.push(round);
        self
    }

    /// Configure a PPK identity for this peer
    pub fn with_ppk_id(mut self, ppk_id: impl Into<String>) -> Self {
        self.ppk_id = Some(ppk_id.into());
        self
    }

    /// The configured authentication rounds
    pub fn auth_rounds(&self) -> &[AuthRound] {
        &self.auth_rounds
    }

    /// The PPK identity configured for the peer, if any
    pub fn ppk_id(&self) -> Option<&str> {
        self.ppk_id.as_deref()
    }
}

/// Backend store of IKE configurations, queried by host pair
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    configs: Vec<Arc<IkeConfig>>,
}

impl ConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        ConfigStore::default()
    }

    /// Register a configuration
    pub fn add(&mut self, config: Arc<IkeConfig>) {
        self.configs.push(config);
    }

    /// All configurations applying to a host pair, in registration order
    pub fn matching(&self, local: SocketAddr, remote: SocketAddr) -> Vec<Arc<IkeConfig>> {
        self.configs
            .iter()
            .filter(|c| c.matches(local, remote))
            .cloned()
            .collect()
    }
}

/// A postquantum preshared key credential (RFC 8784)
#[derive(Debug)]
pub struct Ppk {
    /// The PPK identity
    pub id: String,
    /// The key itself
    pub key: Zeroizing<Vec<u8>>,
}

/// Credential store; only PPK lookup is needed by the initial exchange
#[derive(Debug, Default)]
pub struct CredentialStore {
    ppks: Vec<Ppk>,
}

impl CredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        CredentialStore::default()
    }

    /// Register a PPK credential
    pub fn add_ppk(&mut self, id: impl Into<String>, key: Vec<u8>) {
        self.ppks.push(Ppk {
            id: id.into(),
            key: Zeroizing::new(key),
        });
    }

    /// Check if at least one PPK is available
    pub fn has_ppk(&self) -> bool {
        !self.ppks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kex::methods;
    use crate::ikev2::proposal::{ProtocolId, Transform};

    fn test_config() -> IkeConfig {
        IkeConfig::new().add_proposal(
            Proposal::new(1, ProtocolId::Ike)
                .add_transform(Transform::encr(20))
                .add_transform(Transform::prf(5))
                .add_transform(Transform::ke(methods::ECP_256)),
        )
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(settings.signature_authentication);
        assert!(settings.follow_redirects);
        assert!(!settings.accept_private_algs);
        assert!(settings.prefer_configured_proposals);
        assert!(settings.prefer_previous_dh_group);
    }

    #[test]
    fn test_ike_config_algorithm_lookup() {
        let config = test_config();
        assert_eq!(
            config.get_algorithm(TransformType::Ke),
            Some(methods::ECP_256)
        );
        assert_eq!(config.get_algorithm(TransformType::AdditionalKe1), None);
    }

    #[test]
    fn test_ike_config_host_matching() {
        let local: SocketAddr = "192.0.2.1:500".parse().unwrap();
        let remote: SocketAddr = "192.0.2.2:500".parse().unwrap();
        let other: SocketAddr = "198.51.100.7:500".parse().unwrap();

        let wildcard = test_config();
        assert!(wildcard.matches(local, remote));

        let pinned = test_config().with_hosts(local, remote);
        assert!(pinned.matches(local, remote));
        assert!(!pinned.matches(local, other));

        // ports are not significant
        let high_port: SocketAddr = "192.0.2.2:4500".parse().unwrap();
        assert!(pinned.matches(local, high_port));
    }

    #[test]
    fn test_config_store_matching_order() {
        let local: SocketAddr = "192.0.2.1:500".parse().unwrap();
        let remote: SocketAddr = "192.0.2.2:500".parse().unwrap();

        let mut store = ConfigStore::new();
        let a = Arc::new(test_config());
        let b = Arc::new(test_config().with_hosts(local, remote));
        store.add(a.clone());
        store.add(b.clone());

        let matching = store.matching(local, remote);
        assert_eq!(matching.len(), 2);
        assert!(Arc::ptr_eq(&matching[0], &a));
        assert!(Arc::ptr_eq(&matching[1], &b));
    }

    #[test]
    fn test_signature_scheme_hashes() {
        assert_eq!(SignatureScheme::EcdsaSha256.hash(), HashAlgorithm::Sha256);
        assert_eq!(SignatureScheme::RsaSha512.hash(), HashAlgorithm::Sha512);
        assert_eq!(SignatureScheme::Ed25519.hash(), HashAlgorithm::Identity);
    }

    #[test]
    fn test_peer_config_ppk() {
        let peer = PeerConfig::new().with_ppk_id("ppk-1");
        assert_eq!(peer.ppk_id(), Some("ppk-1"));
        assert!(PeerConfig::new().ppk_id().is_none());
    }

    #[test]
    fn test_credential_store_ppk_lookup() {
        let mut creds = CredentialStore::new();
        assert!(!creds.has_ppk());
        creds.add_ppk("ppk-1", vec![1, 2, 3]);
        assert!(creds.has_ppk());
    }
}
