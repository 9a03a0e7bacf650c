//! The IKE security association collaborator
//!
//! [`IkeSa`] is the container a task mutates while an exchange runs: it owns
//! the SA identifier, the negotiated proposal, the keymat, the extension
//! flags and the handles to daemon-level services (settings, configuration
//! backends, credentials, the bus). Tasks receive it as `&mut IkeSa` per
//! operation; the scheduler serialises access per SA.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::RngCore;

use super::keymat::Keymat;
use super::proposal::Proposal;
use super::redirect::GatewayIdentity;
use crate::bus::Bus;
use crate::config::{ConfigStore, CredentialStore, IkeConfig, PeerConfig, Settings};

/// The two 8-byte SPIs identifying an IKE_SA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IkeSaId {
    /// SPI chosen by the exchange initiator
    pub initiator_spi: [u8; 8],
    /// SPI chosen by the responder; zero until assigned
    pub responder_spi: [u8; 8],
}

impl IkeSaId {
    /// Allocate a fresh identifier with a random initiator SPI
    pub fn new_initiator() -> Self {
        IkeSaId {
            initiator_spi: random_spi(),
            responder_spi: [0u8; 8],
        }
    }

    /// Create an identifier for a responder SA
    pub fn new_responder(initiator_spi: [u8; 8]) -> Self {
        IkeSaId {
            initiator_spi,
            responder_spi: random_spi(),
        }
    }
}

fn random_spi() -> [u8; 8] {
    let mut spi = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut spi);
    spi
}

/// IKE_SA lifecycle states driven by the initial exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IkeSaState {
    /// SA allocated, no exchange started
    Created,
    /// Initial exchange in progress
    Connecting,
    /// SA established
    Established,
    /// SA being torn down
    Deleting,
}

/// Protocol extensions a peer can announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Extension {
    /// IKEv2 message fragmentation (RFC 7383)
    Fragmentation = 1 << 0,
    /// Signature authentication (RFC 7427)
    SignatureAuth = 1 << 1,
    /// Postquantum preshared keys (RFC 8784)
    Ppk = 1 << 2,
    /// Redirection (RFC 5685)
    Redirection = 1 << 3,
    /// Childless IKE_SAs (RFC 6023)
    Childless = 1 << 4,
    /// Peer announced a vendor extension allowing private-use algorithms
    VendorPrivateUse = 1 << 5,
}

/// Fixed-width bit set of announced extensions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extensions(u32);

impl Extensions {
    /// Enable an extension
    pub fn enable(&mut self, extension: Extension) {
        self.0 |= extension as u32;
    }

    /// Check whether an extension was enabled
    pub fn supports(&self, extension: Extension) -> bool {
        self.0 & (extension as u32) != 0
    }

    /// Clear all extensions
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// An IKE security association
#[derive(Debug)]
pub struct IkeSa {
    id: IkeSaId,
    name: String,
    unique_id: u32,
    state: IkeSaState,
    ike_cfg: Arc<IkeConfig>,
    peer_cfg: Option<Arc<PeerConfig>>,
    keymat: Keymat,
    proposal: Option<Proposal>,
    extensions: Extensions,
    local_host: Option<SocketAddr>,
    other_host: Option<SocketAddr>,
    redirected_from: Option<SocketAddr>,
    redirect_on_init: Option<GatewayIdentity>,
    settings: Arc<Settings>,
    config_store: Arc<ConfigStore>,
    credentials: Arc<CredentialStore>,
    bus: Arc<Bus>,
}

impl IkeSa {
    /// Create a new SA bound to a configuration
    pub fn new(name: impl Into<String>, unique_id: u32, id: IkeSaId, ike_cfg: Arc<IkeConfig>) -> Self {
        IkeSa {
            id,
            name: name.into(),
            unique_id,
            state: IkeSaState::Created,
            ike_cfg,
            peer_cfg: None,
            keymat: Keymat::new(),
            proposal: None,
            extensions: Extensions::default(),
            local_host: None,
            other_host: None,
            redirected_from: None,
            redirect_on_init: None,
            settings: Arc::new(Settings::default()),
            config_store: Arc::new(ConfigStore::new()),
            credentials: Arc::new(CredentialStore::new()),
            bus: Arc::new(Bus::new()),
        }
    }

    /// Override the daemon settings handle (builder form)
    pub fn with_settings(mut self, settings: Arc<Settings>) -> Self {
        self.settings = settings;
        self
    }

    /// Override the configuration backend handle (builder form)
    pub fn with_config_store(mut self, store: Arc<ConfigStore>) -> Self {
        self.config_store = store;
        self
    }

    /// Override the credential store handle (builder form)
    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Override the bus handle (builder form)
    pub fn with_bus(mut self, bus: Arc<Bus>) -> Self {
        self.bus = bus;
        self
    }

    /// Attach a peer configuration (builder form)
    pub fn with_peer_cfg(mut self, peer_cfg: Arc<PeerConfig>) -> Self {
        self.peer_cfg = Some(peer_cfg);
        self
    }

    /// Set local and remote addresses (builder form)
    pub fn with_hosts(mut self, local: SocketAddr, other: SocketAddr) -> Self {
        self.local_host = Some(local);
        self.other_host = Some(other);
        self
    }

    /// The SA identifier
    pub fn id(&self) -> IkeSaId {
        self.id
    }

    /// Assign the responder SPI (initiator side, learned from the response)
    pub fn set_responder_spi(&mut self, spi: [u8; 8]) {
        self.id.responder_spi = spi;
    }

    /// Assign the initiator SPI (responder side during rekey)
    pub fn set_initiator_spi(&mut self, spi: [u8; 8]) {
        self.id.initiator_spi = spi;
    }

    /// The connection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The daemon-unique SA number
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// The current state
    pub fn state(&self) -> IkeSaState {
        self.state
    }

    /// Move the SA to a new state
    pub fn set_state(&mut self, state: IkeSaState) {
        if state != self.state {
            tracing::info!(
                name = %self.name,
                unique_id = self.unique_id,
                spi_i = %hex::encode(self.id.initiator_spi),
                state_from = ?self.state,
                state_to = ?state,
                "IKE_SA state change"
            );
        }
        self.state = state;
    }

    /// The active IKE configuration
    pub fn ike_cfg(&self) -> Arc<IkeConfig> {
        self.ike_cfg.clone()
    }

    /// Replace the IKE configuration (alternative-config lookup)
    pub fn set_ike_cfg(&mut self, ike_cfg: Arc<IkeConfig>) {
        self.ike_cfg = ike_cfg;
    }

    /// Check whether a configuration is the active one
    pub fn uses_ike_cfg(&self, ike_cfg: &Arc<IkeConfig>) -> bool {
        Arc::ptr_eq(&self.ike_cfg, ike_cfg)
    }

    /// The peer configuration, if resolved
    pub fn peer_cfg(&self) -> Option<Arc<PeerConfig>> {
        self.peer_cfg.clone()
    }

    /// The SA's key material provider
    pub fn keymat(&self) -> &Keymat {
        &self.keymat
    }

    /// Mutable access to the key material provider
    pub fn keymat_mut(&mut self) -> &mut Keymat {
        &mut self.keymat
    }

    /// The negotiated proposal, once set
    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    /// Store the negotiated proposal
    pub fn set_proposal(&mut self, proposal: Proposal) {
        self.proposal = Some(proposal);
    }

    /// Announce an extension the peer supports
    pub fn enable_extension(&mut self, extension: Extension) {
        self.extensions.enable(extension);
    }

    /// Check whether the peer announced an extension
    pub fn supports_extension(&self, extension: Extension) -> bool {
        self.extensions.supports(extension)
    }

    /// The peer's address, if known
    pub fn other_host(&self) -> Option<SocketAddr> {
        self.other_host
    }

    /// Update the peer's address
    pub fn set_other_host(&mut self, addr: SocketAddr) {
        self.other_host = Some(addr);
    }

    /// Our own address, if known
    pub fn local_host(&self) -> Option<SocketAddr> {
        self.local_host
    }

    /// The gateway this SA was redirected away from, if any
    pub fn redirected_from(&self) -> Option<SocketAddr> {
        self.redirected_from
    }

    /// Configure the gateway new initiators get redirected to
    pub fn set_redirect_on_init(&mut self, gateway: GatewayIdentity) {
        self.redirect_on_init = Some(gateway);
    }

    /// The redirect target for fresh SAs, if configured
    pub fn redirect_on_init(&self) -> Option<GatewayIdentity> {
        self.redirect_on_init.clone()
    }

    /// Follow a REDIRECT notify to a new gateway
    ///
    /// Rebinds the SA to the new gateway address and resets negotiation
    /// state so the scheduler can reinitiate. FQDN identities need a
    /// resolver and are rejected here.
    pub fn handle_redirect(&mut self, gateway: &GatewayIdentity) -> bool {
        let Some(ip) = gateway.ip() else {
            tracing::warn!(gateway = %gateway, "cannot follow redirect to unresolved identity");
            return false;
        };
        let port = self.other_host.map(|h| h.port()).unwrap_or(500);

        tracing::info!(gateway = %gateway, "following redirect");
        self.redirected_from = self.other_host;
        self.other_host = Some(SocketAddr::new(ip, port));
        self.reset();
        true
    }

    /// Reset negotiation state for a retry of the initial exchange
    pub fn reset(&mut self) {
        self.id.responder_spi = [0u8; 8];
        self.proposal = None;
        self.state = IkeSaState::Created;
    }

    /// The daemon settings
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.clone()
    }

    /// The configuration backend
    pub fn config_store(&self) -> Arc<ConfigStore> {
        self.config_store.clone()
    }

    /// The credential store
    pub fn credentials(&self) -> Arc<CredentialStore> {
        self.credentials.clone()
    }

    /// The event bus
    pub fn bus(&self) -> Arc<Bus> {
        self.bus.clone()
    }
}
