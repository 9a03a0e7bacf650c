//! The IKE_SA_INIT task
//!
//! Drives the initial exchange that establishes an IKE_SA: proposal
//! negotiation, one or more key exchanges, nonces, cookies, redirects and
//! the derivation of the initial key material. The same task type handles
//! both roles and is also used when rekeying an existing IKE_SA, in which
//! case the new keys are chained from the predecessor's `SK_d`.
//!
//! When the negotiated proposal carries additional key exchanges
//! (RFC 9370), the task switches into its multi-exchange phase after the
//! IKE_SA_INIT round and performs one IKE_INTERMEDIATE (initial setup) or
//! IKE_FOLLOWUP_KE (rekeying) round per pending key exchange. Keys are
//! derived only once all exchanges completed; on intermediate rounds the
//! derivation is deferred to the post hooks so the message in flight is
//! still protected with the previous keys.

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::hash::HashAlgorithm;
use crate::crypto::kex::KeyExchange;
use crate::crypto::nonce::{NonceGen, NONCE_SIZE};
use crate::crypto::prf::PrfAlgorithm;
use crate::bus::{Alert, IkeKeysEvent};
use crate::ikev2::constants::{ExchangeType, NotifyType, PayloadType};
use crate::ikev2::message::IkeMessage;
use crate::ikev2::payload::{IkePayload, KePayload, NoncePayload, NotifyPayload, SaPayload};
use crate::ikev2::proposal::{SelectionFlags, TransformType, ADDITIONAL_KE_TYPES};
use crate::ikev2::proposal::Proposal;
use crate::ikev2::redirect::{redirect_data_create, redirect_data_parse, GatewayIdentity};
use crate::ikev2::sa::{Extension, IkeSa, IkeSaId, IkeSaState};
use crate::config::Childless;
use crate::config::Fragmentation;

use super::{Task, TaskStatus, TaskType};

/// Maximum retries after a COOKIE or INVALID_KE_PAYLOAD notify
pub const MAX_RETRIES: u32 = 5;

/// Maximum number of key exchanges (the initial one plus up to seven more)
pub const MAX_KEY_EXCHANGES: usize = 8;

/// One slot of the key exchange plan
#[derive(Debug, Clone, Copy, Default)]
struct KeSlot {
    /// Transform type the slot was planned from; None marks an unused slot
    transform_type: Option<TransformType>,
    /// Negotiated method for this slot
    method: u16,
    /// Whether the exchange completed
    done: bool,
}

/// Dispatch phase of the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The IKE_SA_INIT round itself
    Initial,
    /// Additional IKE_INTERMEDIATE / IKE_FOLLOWUP_KE rounds
    MultiKe,
}

/// State captured from the IKE_SA a rekeying replaces
///
/// The predecessor is immutable for the duration of the rekey, so the task
/// keeps a value snapshot instead of a borrow across operations.
#[derive(Clone)]
pub struct RekeySource {
    sa_id: IkeSaId,
    skd: Option<(PrfAlgorithm, Zeroizing<Vec<u8>>)>,
    ke_method: Option<u16>,
}

impl RekeySource {
    /// Snapshot the relevant predecessor state
    pub fn from_sa(sa: &IkeSa) -> Self {
        RekeySource {
            sa_id: sa.id(),
            skd: sa.keymat().skd(),
            ke_method: sa
                .proposal()
                .and_then(|p| p.get_algorithm(TransformType::Ke)),
        }
    }
}

/// Which `SK_d` seeds a key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeriveBase {
    /// Chain from this SA's own current keys (intermediate exchanges);
    /// falls back to the initial derivation while no keys exist yet
    OwnSa,
    /// Chain from the rekeyed predecessor
    Predecessor,
}

/// The IKE_SA_INIT exchange task
pub struct IkeInitTask {
    /// Our role, fixed at creation
    initiator: bool,

    /// Current dispatch phase
    phase: Phase,

    /// The key exchange plan computed from the selected proposal
    key_exchanges: [KeSlot; MAX_KEY_EXCHANGES],

    /// Cursor into the plan; next exchange to perform
    ke_index: usize,

    /// Key exchange method from the parsed or locally chosen KE payload
    ke_method: u16,

    /// Current key exchange object
    ke: Option<Box<dyn KeyExchange>>,

    /// Completed key exchanges, collected while rekeying
    kes: Vec<Box<dyn KeyExchange>>,

    /// Applying a peer public value failed or the method didn't match
    ke_failed: bool,

    /// Nonce chosen by us; generated once per task
    my_nonce: Vec<u8>,

    /// Nonce chosen by the peer
    other_nonce: Vec<u8>,

    /// Nonce source
    nonceg: Box<dyn NonceGen>,

    /// Negotiated proposal for the new IKE_SA
    proposal: Option<Proposal>,

    /// Predecessor snapshot when this task rekeys an IKE_SA
    old_sa: Option<RekeySource>,

    /// Cookie received from the responder, echoed on the next attempt
    cookie: Vec<u8>,

    /// Retries done so far after a cookie or bad KE group
    retry: u32,

    /// Key derivation latched for the post hook of the current round
    deferred_derive: bool,

    /// Whether to use signature authentication as per RFC 7427
    signature_authentication: bool,

    /// Whether to follow redirects as per RFC 5685
    follow_redirects: bool,
}

impl IkeInitTask {
    /// Create a task for the given role
    ///
    /// `old_sa` makes this a rekeying task inheriting the predecessor's
    /// `SK_d` and, by default, its key exchange method.
    pub fn new(sa: &IkeSa, initiator: bool, old_sa: Option<RekeySource>) -> Self {
        let settings = sa.settings();
        IkeInitTask {
            initiator,
            phase: Phase::Initial,
            key_exchanges: Default::default(),
            ke_index: 0,
            ke_method: 0,
            ke: None,
            kes: Vec::new(),
            ke_failed: false,
            my_nonce: Vec::new(),
            other_nonce: Vec::new(),
            nonceg: sa.keymat().create_nonce_gen(),
            proposal: None,
            old_sa,
            cookie: Vec::new(),
            retry: 0,
            deferred_derive: false,
            signature_authentication: settings.signature_authentication,
            follow_redirects: settings.follow_redirects,
        }
    }

    /// The smaller of the two nonces, compared over the common prefix
    ///
    /// Used by the rekey collision resolution in peer tasks; both ends of a
    /// negotiation agree on the result.
    pub fn get_lower_nonce(&self) -> &[u8] {
        let common = self.my_nonce.len().min(self.other_nonce.len());
        if self.my_nonce[..common] < self.other_nonce[..common] {
            &self.my_nonce
        } else {
            &self.other_nonce
        }
    }

    /// The exchange type for additional key exchange rounds
    fn exchange_type_multi_ke(&self) -> ExchangeType {
        if self.old_sa.is_some() {
            ExchangeType::IkeFollowupKe
        } else {
            ExchangeType::IkeIntermediate
        }
    }

    /// Allocate our own nonce value
    fn generate_nonce(&mut self) -> bool {
        match self.nonceg.allocate_nonce(NONCE_SIZE) {
            Ok(nonce) => {
                self.my_nonce = nonce;
                true
            }
            Err(e) => {
                warn!(error = %e, "nonce allocation failed");
                false
            }
        }
    }

    /// Notify the peer about the hash algorithms we support or expect,
    /// as per RFC 7427
    fn send_supported_hash_algorithms(&self, sa: &IkeSa, message: &mut IkeMessage) {
        let mut algos = crate::crypto::hash::HashAlgorithmSet::new();

        if let Some(peer) = sa.peer_cfg() {
            for round in peer.auth_rounds() {
                for scheme in &round.ike_signature_schemes {
                    let hash = scheme.hash();
                    if hash.valid_for_ikev2() {
                        algos.add(hash);
                    }
                }
            }
        }

        if algos.is_empty() {
            for hash in HashAlgorithm::all_for_ikev2() {
                algos.add(hash);
            }
        }

        if !algos.is_empty() {
            let mut data = Vec::with_capacity(algos.len() * 2);
            for hash in algos.iter() {
                data.extend_from_slice(&hash.to_u16().to_be_bytes());
            }
            debug!(count = algos.len(), "sending supported signature hash algorithms");
            message.add_notify(false, NotifyType::SignatureHashAlgorithms, data);
        }
    }

    /// Store the hash algorithms supported by the peer
    fn handle_supported_hash_algorithms(&self, sa: &mut IkeSa, notify: &NotifyPayload) {
        let mut added = false;

        for chunk in notify.data.chunks_exact(2) {
            let value = u16::from_be_bytes([chunk[0], chunk[1]]);
            if let Some(hash) = HashAlgorithm::from_u16(value) {
                if hash.valid_for_ikev2() {
                    sa.keymat_mut().add_hash_algorithm(hash);
                    added = true;
                }
            }
        }
        debug!(
            count = sa.keymat().hash_algorithms().len(),
            "received supported signature hash algorithms"
        );

        if added {
            sa.enable_extension(Extension::SignatureAuth);
        }
    }

    /// Check whether to send a USE_PPK notify
    fn send_use_ppk(&self, sa: &IkeSa) -> bool {
        if self.initiator {
            sa.peer_cfg().map(|p| p.ppk_id().is_some()).unwrap_or(false)
        } else if sa.supports_extension(Extension::Ppk) {
            // check if we have at least one PPK available
            sa.credentials().has_ppk()
        } else {
            false
        }
    }

    /// Build the payloads for an initial exchange message
    fn build_payloads(&mut self, sa: &IkeSa, message: &mut IkeMessage) -> bool {
        let id = sa.id();
        let ike_cfg = sa.ike_cfg();

        let sa_payload = if self.initiator {
            let mut proposal_list = ike_cfg.proposals();
            let mut other_ke_groups = Vec::new();
            let mut i = 0;
            while i < proposal_list.len() {
                // include the SPI of the new IKE_SA when we are rekeying
                if self.old_sa.is_some() {
                    proposal_list[i].set_spi(&id.initiator_spi);
                }
                // move the selected method to the front of the proposal
                if proposal_list[i].promote_transform(TransformType::Ke, self.ke_method) {
                    i += 1;
                } else {
                    // proposals without the method are offered last
                    other_ke_groups.push(proposal_list.remove(i));
                }
            }
            proposal_list.append(&mut other_ke_groups);
            SaPayload::new(proposal_list)
        } else {
            let Some(proposal) = self.proposal.as_mut() else {
                return false;
            };
            if self.old_sa.is_some() {
                proposal.set_spi(&id.responder_spi);
            }
            SaPayload::new(vec![proposal.clone()])
        };
        message.add_payload(IkePayload::Sa(sa_payload));

        let Some(ke) = self.ke.as_mut() else {
            warn!("creating KE payload failed");
            return false;
        };
        let public = match ke.public_key() {
            Ok(public) => public,
            Err(e) => {
                warn!(error = %e, "creating KE payload failed");
                return false;
            }
        };
        message.add_payload(IkePayload::Ke(KePayload::new(ke.method(), public)));

        match NoncePayload::new(self.my_nonce.clone()) {
            Ok(nonce) => message.add_payload(IkePayload::Nonce(nonce)),
            Err(_) => return false,
        }

        // negotiate fragmentation if we are not rekeying
        if self.old_sa.is_none() && ike_cfg.fragmentation() != Fragmentation::No {
            if self.initiator || sa.supports_extension(Extension::Fragmentation) {
                message.add_notify(false, NotifyType::FragmentationSupported, Vec::new());
            }
        }
        // submit supported hash algorithms for signature authentication
        if self.old_sa.is_none() && self.signature_authentication {
            if self.initiator || sa.supports_extension(Extension::SignatureAuth) {
                self.send_supported_hash_algorithms(sa, message);
            }
        }
        // notify the peer if we support redirection
        if self.old_sa.is_none() && self.initiator && self.follow_redirects {
            if let Some(from) = sa.redirected_from() {
                let gateway = GatewayIdentity::from_socket_addr(from);
                let data = redirect_data_create(&gateway, &[]);
                message.add_notify(false, NotifyType::RedirectedFrom, data);
            } else {
                message.add_notify(false, NotifyType::RedirectSupported, Vec::new());
            }
        }
        // notify the peer if we want to use/support PPK
        if self.old_sa.is_none() && self.send_use_ppk(sa) {
            message.add_notify(false, NotifyType::UsePpk, Vec::new());
        }
        // notify the peer if we accept childless IKE_SAs
        if self.old_sa.is_none() && !self.initiator && ike_cfg.childless() != Childless::Never {
            message.add_notify(false, NotifyType::ChildlessIkev2Supported, Vec::new());
        }
        true
    }

    /// Process the SA payload and select a proposal
    fn process_sa_payload(&mut self, sa: &mut IkeSa, message: &IkeMessage, sa_payload: &SaPayload) {
        let settings = sa.settings();
        let flags = SelectionFlags {
            skip_private: !sa.supports_extension(Extension::VendorPrivateUse)
                && !settings.accept_private_algs,
            prefer_supplied: !settings.prefer_configured_proposals,
        };

        self.proposal = sa.ike_cfg().select_proposal(&sa_payload.proposals, flags);

        if self.proposal.is_none() && !self.initiator && self.old_sa.is_none() {
            if let (Some(me), Some(other)) = (message.destination(), message.source()) {
                for cfg in sa.config_store().matching(me, other) {
                    if sa.uses_ike_cfg(&cfg) {
                        // already tried and failed
                        continue;
                    }
                    info!("no matching proposal found, trying alternative config");
                    self.proposal = cfg.select_proposal(&sa_payload.proposals, flags);
                    if self.proposal.is_some() {
                        sa.set_ike_cfg(cfg);
                        break;
                    }
                }
            }
        }
        if self.proposal.is_none() {
            sa.bus().alert(Alert::IkeProposalMismatch {
                proposals: sa_payload.proposals.clone(),
            });
        }
    }

    /// Collect all key exchanges from the selected proposal
    fn determine_key_exchanges(&mut self) {
        let Some(proposal) = self.proposal.as_ref() else {
            return;
        };

        if let Some(method) = proposal.get_algorithm(TransformType::Ke) {
            self.key_exchanges[0] = KeSlot {
                transform_type: Some(TransformType::Ke),
                method,
                done: false,
            };
        }

        let mut i = 1;
        for transform_type in ADDITIONAL_KE_TYPES {
            if let Some(method) = proposal.get_algorithm(transform_type) {
                self.key_exchanges[i] = KeSlot {
                    transform_type: Some(transform_type),
                    method,
                    done: false,
                };
                i += 1;
            }
        }
    }

    /// Check if additional key exchanges are required
    fn additional_key_exchange_required(&self) -> bool {
        self.key_exchanges[self.ke_index..]
            .iter()
            .any(|slot| slot.transform_type.is_some() && !slot.done)
    }

    /// Clear data on key exchanges
    fn clear_key_exchanges(&mut self) {
        self.key_exchanges = Default::default();
        self.ke_index = 0;
        self.kes.clear();
    }

    /// Apply a KE payload to the current exchange
    fn process_ke_payload(&mut self, sa: &IkeSa, ke_payload: &KePayload) {
        let method = self.key_exchanges[self.ke_index].method;
        let received = ke_payload.method;

        if method != received {
            warn!(
                received,
                negotiated = method,
                "key exchange method in received payload doesn't match negotiated"
            );
            self.ke_failed = true;
            return;
        }

        if !self.initiator {
            self.ke = None;
            match sa.keymat().create_ke(method) {
                Ok(ke) => self.ke = Some(ke),
                Err(_) => {
                    warn!(method, "negotiated key exchange method not supported");
                }
            }
        } else if let Some(ke) = &self.ke {
            self.ke_failed = ke.method() != received;
        }

        if !self.ke_failed {
            if let Some(ke) = self.ke.as_mut() {
                if let Err(e) = ke.set_public_key(&ke_payload.key_data) {
                    warn!(error = %e, "applying KE public value failed");
                    self.ke_failed = true;
                }
            }
        }
    }

    /// Read the payloads of an initial exchange message
    fn process_payloads(&mut self, sa: &mut IkeSa, message: &IkeMessage) {
        let mut ke_payload = None;

        for payload in &message.payloads {
            match payload {
                IkePayload::Sa(sa_payload) => {
                    self.process_sa_payload(sa, message, sa_payload);
                }
                IkePayload::Ke(ke) => {
                    self.ke_method = ke.method;
                    ke_payload = Some(ke);
                }
                IkePayload::Nonce(nonce) => {
                    self.other_nonce = nonce.nonce.clone();
                }
                IkePayload::Notify(notify) => match notify.known_type() {
                    Some(NotifyType::FragmentationSupported) => {
                        sa.enable_extension(Extension::Fragmentation);
                    }
                    Some(NotifyType::SignatureHashAlgorithms) => {
                        if self.signature_authentication {
                            self.handle_supported_hash_algorithms(sa, notify);
                        }
                    }
                    Some(NotifyType::UsePpk) => {
                        if self.old_sa.is_none() {
                            sa.enable_extension(Extension::Ppk);
                        }
                    }
                    Some(NotifyType::RedirectedFrom) => {
                        match redirect_data_parse(&notify.data) {
                            Ok((gateway, _)) => {
                                info!(gateway = %gateway, "client got redirected from");
                                if self.old_sa.is_none() {
                                    sa.enable_extension(Extension::Redirection);
                                }
                            }
                            Err(_) => {
                                warn!("received invalid REDIRECTED_FROM notify, ignored");
                            }
                        }
                    }
                    Some(NotifyType::RedirectSupported) => {
                        if self.old_sa.is_none() {
                            sa.enable_extension(Extension::Redirection);
                        }
                    }
                    Some(NotifyType::ChildlessIkev2Supported) => {
                        if self.initiator && self.old_sa.is_none() {
                            sa.enable_extension(Extension::Childless);
                        }
                    }
                    _ => {
                        // other notifies are handled elsewhere
                    }
                },
            }
        }

        if let Some(proposal) = self.proposal.clone() {
            sa.set_proposal(proposal.clone());

            if self.old_sa.is_some() {
                // retrieve the SPI of the new IKE_SA when rekeying
                match <[u8; 8]>::try_from(proposal.spi.as_slice()) {
                    Ok(spi) => {
                        if self.initiator {
                            sa.set_responder_spi(spi);
                        } else {
                            sa.set_initiator_spi(spi);
                        }
                    }
                    Err(_) => {
                        warn!(len = proposal.spi.len(), "ignoring rekey SPI of invalid size");
                    }
                }
            }

            self.determine_key_exchanges();
            if let Some(ke) = ke_payload {
                self.process_ke_payload(sa, ke);
            }
        }
    }

    /// Derive the key material for the IKE_SA
    fn derive_keys(&mut self, sa: &mut IkeSa, base: DeriveBase) -> bool {
        let old = match base {
            DeriveBase::OwnSa => sa.keymat().skd(),
            DeriveBase::Predecessor => self.old_sa.as_ref().and_then(|r| r.skd.clone()),
        };
        let rekeyed_from = if old.is_some() {
            match base {
                DeriveBase::OwnSa => Some(sa.id()),
                DeriveBase::Predecessor => self.old_sa.as_ref().map(|r| r.sa_id),
            }
        } else {
            None
        };

        let Some(proposal) = self.proposal.as_ref() else {
            return false;
        };
        let kes: Vec<&dyn KeyExchange> = if self.kes.is_empty() {
            match self.ke.as_ref() {
                Some(ke) => vec![ke.as_ref()],
                None => return false,
            }
        } else {
            self.kes.iter().map(|ke| ke.as_ref()).collect()
        };

        let (nonce_i, nonce_r) = if self.initiator {
            (self.my_nonce.clone(), self.other_nonce.clone())
        } else {
            (self.other_nonce.clone(), self.my_nonce.clone())
        };

        let id = sa.id();
        let count = kes.len();
        if sa
            .keymat_mut()
            .derive_ike_keys(proposal, &kes, &nonce_i, &nonce_r, &id, old)
            .is_err()
        {
            return false;
        }

        sa.bus().ike_keys(IkeKeysEvent {
            sa_id: id,
            key_exchanges: count,
            nonce_i,
            nonce_r,
            rekeyed_from,
        });
        true
    }

    /// Called when one key exchange is done
    fn key_exchange_done(&mut self, sa: &mut IkeSa) -> TaskStatus {
        self.key_exchanges[self.ke_index].done = true;
        self.ke_index += 1;
        let additional_ke = self.additional_key_exchange_required();

        let base = if self.old_sa.is_some() {
            // during rekeying we collect the key exchanges performed and
            // derive keys only when all are done
            if let Some(ke) = self.ke.take() {
                self.kes.push(ke);
            }
            (!additional_ke).then_some(DeriveBase::Predecessor)
        } else {
            // key derivation for additional key exchanges chains from our
            // own SK_d, like a rekeying would
            Some(DeriveBase::OwnSa)
        };

        if let Some(base) = base {
            if !self.derive_keys(sa, base) {
                warn!("key derivation failed");
                return TaskStatus::Failed;
            }
        }
        if additional_ke {
            TaskStatus::NeedMore
        } else {
            TaskStatus::Success
        }
    }

    /// Raise alerts for received notify errors
    fn raise_alerts(&self, sa: &IkeSa, notify_type: u16) {
        if NotifyType::from_u16(notify_type) == Some(NotifyType::NoProposalChosen) {
            sa.bus().alert(Alert::IkeProposalMismatch {
                proposals: sa.ike_cfg().proposals(),
            });
        }
    }

    /// Emit the single KE payload of an additional exchange round
    fn build_payloads_multi_ke(&mut self, message: &mut IkeMessage) -> bool {
        let Some(ke) = self.ke.as_mut() else {
            warn!("creating KE payload failed");
            return false;
        };
        match ke.public_key() {
            Ok(public) => {
                message.add_payload(IkePayload::Ke(KePayload::new(ke.method(), public)));
                true
            }
            Err(e) => {
                warn!(error = %e, "creating KE payload failed");
                false
            }
        }
    }

    /// Apply the single KE payload of an additional exchange round
    fn process_payloads_multi_ke(&mut self, sa: &IkeSa, message: &IkeMessage) {
        match message.get_payload(PayloadType::KE) {
            Some(IkePayload::Ke(ke)) => {
                // clone to release the message borrow before mutating self
                let ke = ke.clone();
                self.process_ke_payload(sa, &ke);
            }
            _ => {
                warn!("KE payload missing in message");
            }
        }
    }

    fn build_i(&mut self, sa: &mut IkeSa, message: &mut IkeMessage) -> TaskStatus {
        let ike_cfg = sa.ike_cfg();

        info!(
            name = %sa.name(),
            unique_id = sa.unique_id(),
            peer = ?sa.other_host(),
            "initiating IKE_SA"
        );
        sa.set_state(IkeSaState::Connecting);

        if self.retry >= MAX_RETRIES {
            warn!("giving up after {} retries", MAX_RETRIES);
            return TaskStatus::Failed;
        }

        // if we are retrying after an INVALID_KE_PAYLOAD we already have one
        if self.ke.is_none() {
            let prefer_previous = sa.settings().prefer_previous_dh_group;
            let method = if self.old_sa.is_some() && prefer_previous {
                // reuse the method of the rekeyed IKE_SA
                self.old_sa
                    .as_ref()
                    .and_then(|r| r.ke_method)
                    .or_else(|| ike_cfg.get_algorithm(TransformType::Ke))
            } else {
                ike_cfg.get_algorithm(TransformType::Ke)
            };
            let Some(method) = method else {
                warn!("no key exchange method configured");
                return TaskStatus::Failed;
            };
            self.ke_method = method;
            match sa.keymat().create_ke(self.ke_method) {
                Ok(ke) => self.ke = Some(ke),
                Err(_) => {
                    warn!(method = self.ke_method, "configured key exchange method not supported");
                    return TaskStatus::Failed;
                }
            }
        } else if self.ke.as_ref().map(|ke| ke.method()) != Some(self.ke_method) {
            // reset the instance if the method changed (INVALID_KE_PAYLOAD)
            match sa.keymat().create_ke(self.ke_method) {
                Ok(ke) => self.ke = Some(ke),
                Err(_) => {
                    warn!(method = self.ke_method, "requested key exchange method not supported");
                    return TaskStatus::Failed;
                }
            }
        }

        // generate the nonce only when we are trying the first time
        if self.my_nonce.is_empty() {
            if !self.generate_nonce() {
                return TaskStatus::Failed;
            }
        }

        if !self.cookie.is_empty() {
            message.add_notify(false, NotifyType::Cookie, self.cookie.clone());
        }

        if !self.build_payloads(sa, message) {
            return TaskStatus::Failed;
        }

        TaskStatus::NeedMore
    }

    fn build_i_multi_ke(&mut self, sa: &mut IkeSa, message: &mut IkeMessage) -> TaskStatus {
        message.set_exchange_type(self.exchange_type_multi_ke());

        self.ke = None;
        let method = self.key_exchanges[self.ke_index].method;
        match sa.keymat().create_ke(method) {
            Ok(ke) => self.ke = Some(ke),
            Err(_) => {
                warn!(method, "negotiated key exchange method not supported");
                return TaskStatus::Failed;
            }
        }
        if !self.build_payloads_multi_ke(message) {
            return TaskStatus::Failed;
        }
        TaskStatus::NeedMore
    }

    fn process_i(&mut self, sa: &mut IkeSa, message: &IkeMessage) -> TaskStatus {
        // check for erroneous notifies
        for notify in message.notifies() {
            match notify.known_type() {
                Some(NotifyType::InvalidKePayload) => {
                    if notify.data.len() < 2 {
                        warn!("received truncated INVALID_KE_PAYLOAD notify");
                        return TaskStatus::Failed;
                    }
                    let bad_group = self.ke_method;
                    self.ke_method = u16::from_be_bytes([notify.data[0], notify.data[1]]);
                    info!(
                        rejected = bad_group,
                        requested = self.ke_method,
                        "peer didn't accept key exchange method, it requested another"
                    );

                    if self.old_sa.is_none() {
                        // reset the IKE_SA if we are not rekeying
                        sa.reset();
                    }
                    self.retry += 1;
                    return TaskStatus::NeedMore;
                }
                Some(NotifyType::NatDetectionSourceIp)
                | Some(NotifyType::NatDetectionDestinationIp) => {
                    // skip, handled in the NAT detection task
                }
                Some(NotifyType::MultipleAuthSupported) => {
                    // handled in the authentication task
                }
                Some(NotifyType::Cookie) => {
                    self.cookie = notify.data.clone();
                    sa.reset();
                    debug!("received COOKIE notify");
                    self.retry += 1;
                    return TaskStatus::NeedMore;
                }
                Some(NotifyType::Redirect) => {
                    if self.old_sa.is_some() {
                        info!("received REDIRECT notify during rekeying, ignored");
                        continue;
                    }
                    return match redirect_data_parse(&notify.data) {
                        Ok((gateway, _)) => {
                            if sa.handle_redirect(&gateway) {
                                TaskStatus::NeedMore
                            } else {
                                TaskStatus::Failed
                            }
                        }
                        Err(_) => {
                            warn!("received invalid REDIRECT notify");
                            TaskStatus::Failed
                        }
                    };
                }
                _ => {
                    if notify.is_error() {
                        warn!(notify_type = notify.notify_type, "received notify error");
                        self.raise_alerts(sa, notify.notify_type);
                        return TaskStatus::Failed;
                    }
                    debug!(notify_type = notify.notify_type, "received notify");
                }
            }
        }

        self.process_payloads(sa, message);

        // check if we have everything
        if self.proposal.is_none() || self.other_nonce.is_empty() || self.my_nonce.is_empty() {
            warn!("peer's proposal selection invalid");
            return TaskStatus::Failed;
        }

        let method_offered = self
            .proposal
            .as_ref()
            .map(|p| p.has_transform(TransformType::Ke, self.ke_method))
            .unwrap_or(false);
        if !method_offered {
            warn!("peer's key exchange method selection invalid");
            return TaskStatus::Failed;
        }

        if self.ke_failed {
            warn!("applying KE public value failed");
            return TaskStatus::Failed;
        }

        let status = self.key_exchange_done(sa);
        if status == TaskStatus::NeedMore {
            // use the other exchange type for additional key exchanges
            self.phase = Phase::MultiKe;
        }
        status
    }

    fn process_i_multi_ke(&mut self, sa: &mut IkeSa, message: &IkeMessage) -> TaskStatus {
        self.process_payloads_multi_ke(sa, message);

        if self.ke_failed {
            return TaskStatus::Failed;
        }

        if self.old_sa.is_some() {
            self.key_exchange_done(sa)
        } else {
            // derive keys in post_process(), otherwise the authentication of
            // this intermediate exchange would use the wrong keys
            self.deferred_derive = true;
            TaskStatus::NeedMore
        }
    }

    fn pre_process_i(&mut self, message: &IkeMessage) -> TaskStatus {
        for notify in message.notifies() {
            match notify.known_type() {
                Some(NotifyType::Cookie) => {
                    if !self.cookie.is_empty() && notify.data == self.cookie {
                        warn!("ignore response with duplicate COOKIE notify");
                        return TaskStatus::Failed;
                    }
                }
                Some(NotifyType::Redirect) => {
                    if self.old_sa.is_some() {
                        continue;
                    }
                    return match redirect_data_parse(&notify.data) {
                        Ok((_, nonce)) if nonce == self.my_nonce => TaskStatus::Success,
                        _ => {
                            warn!("received invalid REDIRECT notify");
                            TaskStatus::Failed
                        }
                    };
                }
                _ => {}
            }
        }
        TaskStatus::Success
    }

    fn process_r(&mut self, sa: &mut IkeSa, message: &IkeMessage) -> TaskStatus {
        info!(source = ?message.source(), "peer is initiating an IKE_SA");
        sa.set_state(IkeSaState::Connecting);

        if !self.generate_nonce() {
            return TaskStatus::Failed;
        }

        self.process_payloads(sa, message);

        TaskStatus::NeedMore
    }

    fn process_r_multi_ke(&mut self, sa: &mut IkeSa, message: &IkeMessage) -> TaskStatus {
        if message.exchange_type() == self.exchange_type_multi_ke() {
            self.process_payloads_multi_ke(sa, message);
        }
        TaskStatus::NeedMore
    }

    fn build_r(&mut self, sa: &mut IkeSa, message: &mut IkeMessage) -> TaskStatus {
        // check if we have everything we need
        if self.proposal.is_none() || self.other_nonce.is_empty() || self.my_nonce.is_empty() {
            warn!("received proposals unacceptable");
            message.add_notify(true, NotifyType::NoProposalChosen, Vec::new());
            return TaskStatus::Failed;
        }

        // check if we have to redirect the client
        if self.old_sa.is_none() && sa.supports_extension(Extension::Redirection) {
            if let Some(gateway) = sa.redirect_on_init() {
                info!(gateway = %gateway, "redirecting peer");
                let data = redirect_data_create(&gateway, &self.other_nonce);
                message.add_notify(true, NotifyType::Redirect, data);
                return TaskStatus::Failed;
            }
        }

        let (method_offered, configured_group) = {
            let proposal = self.proposal.as_ref().expect("checked above");
            (
                proposal.has_transform(TransformType::Ke, self.ke_method),
                proposal.get_algorithm(TransformType::Ke),
            )
        };
        if self.ke.is_none() || !method_offered {
            if let Some(group) = configured_group {
                if group != self.ke_method {
                    info!(
                        rejected = self.ke_method,
                        requested = group,
                        "key exchange method unacceptable, requesting another"
                    );
                    self.ke_method = group;
                    message.add_notify(
                        false,
                        NotifyType::InvalidKePayload,
                        group.to_be_bytes().to_vec(),
                    );
                    return TaskStatus::Failed;
                }
            }
            warn!("no acceptable proposal found");
            message.add_notify(true, NotifyType::NoProposalChosen, Vec::new());
            return TaskStatus::Failed;
        }

        if self.ke_failed {
            warn!("applying KE public value failed");
            message.add_notify(true, NotifyType::NoProposalChosen, Vec::new());
            return TaskStatus::Failed;
        }

        if !self.build_payloads(sa, message) {
            message.add_notify(true, NotifyType::NoProposalChosen, Vec::new());
            return TaskStatus::Failed;
        }

        match self.key_exchange_done(sa) {
            TaskStatus::Failed => {
                message.add_notify(true, NotifyType::NoProposalChosen, Vec::new());
                TaskStatus::Failed
            }
            TaskStatus::NeedMore => {
                // use the other exchange type for additional key exchanges
                self.phase = Phase::MultiKe;
                TaskStatus::NeedMore
            }
            TaskStatus::Success => TaskStatus::Success,
        }
    }

    fn build_r_multi_ke(&mut self, sa: &mut IkeSa, message: &mut IkeMessage) -> TaskStatus {
        if self.ke.is_none() {
            message.add_notify(false, NotifyType::InvalidSyntax, Vec::new());
            return TaskStatus::Failed;
        }
        if self.ke_failed {
            message.add_notify(false, NotifyType::NoProposalChosen, Vec::new());
            return TaskStatus::Failed;
        }
        if !self.build_payloads_multi_ke(message) {
            return TaskStatus::Failed;
        }

        if self.old_sa.is_some() {
            match self.key_exchange_done(sa) {
                TaskStatus::Failed => {
                    message.add_notify(false, NotifyType::NoProposalChosen, Vec::new());
                    TaskStatus::Failed
                }
                status => status,
            }
        } else {
            // derive keys for each IKE_INTERMEDIATE in post_build(),
            // otherwise the response would be generated using the new keys
            self.deferred_derive = true;
            TaskStatus::NeedMore
        }
    }
}

impl Task for IkeInitTask {
    fn task_type(&self) -> TaskType {
        TaskType::IkeInit
    }

    fn build(&mut self, sa: &mut IkeSa, message: &mut IkeMessage) -> TaskStatus {
        match (self.initiator, self.phase) {
            (true, Phase::Initial) => self.build_i(sa, message),
            (true, Phase::MultiKe) => self.build_i_multi_ke(sa, message),
            (false, Phase::Initial) => self.build_r(sa, message),
            (false, Phase::MultiKe) => self.build_r_multi_ke(sa, message),
        }
    }

    fn process(&mut self, sa: &mut IkeSa, message: &IkeMessage) -> TaskStatus {
        match (self.initiator, self.phase) {
            (true, Phase::Initial) => self.process_i(sa, message),
            (true, Phase::MultiKe) => self.process_i_multi_ke(sa, message),
            (false, Phase::Initial) => self.process_r(sa, message),
            (false, Phase::MultiKe) => self.process_r_multi_ke(sa, message),
        }
    }

    fn pre_process(&mut self, _sa: &mut IkeSa, message: &IkeMessage) -> TaskStatus {
        if self.initiator {
            self.pre_process_i(message)
        } else {
            TaskStatus::Success
        }
    }

    fn post_build(&mut self, sa: &mut IkeSa, _message: &IkeMessage) -> TaskStatus {
        if !self.initiator && self.deferred_derive {
            self.deferred_derive = false;
            return self.key_exchange_done(sa);
        }
        TaskStatus::Success
    }

    fn post_process(&mut self, sa: &mut IkeSa, _message: &IkeMessage) -> TaskStatus {
        if self.initiator && self.deferred_derive {
            self.deferred_derive = false;
            return self.key_exchange_done(sa);
        }
        TaskStatus::Success
    }

    fn migrate(&mut self) {
        self.proposal = None;
        self.other_nonce.clear();
        self.ke_failed = false;
        self.deferred_derive = false;
        self.phase = Phase::Initial;
        self.clear_key_exchanges();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IkeConfig;
    use crate::crypto::kex::methods;
    use crate::ikev2::proposal::{ProtocolId, Transform};
    use std::sync::Arc;

    fn test_sa() -> IkeSa {
        let cfg = IkeConfig::new().add_proposal(
            Proposal::new(1, ProtocolId::Ike)
                .add_transform(Transform::encr(20).with_key_length(256))
                .add_transform(Transform::prf(5))
                .add_transform(Transform::ke(methods::CURVE_25519)),
        );
        IkeSa::new("test", 1, IkeSaId::new_initiator(), Arc::new(cfg))
    }

    fn hybrid_proposal() -> Proposal {
        Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr(20).with_key_length(256))
            .add_transform(Transform::prf(5))
            .add_transform(Transform::ke(methods::ECP_256))
            .add_transform(Transform::additional_ke(1, methods::ML_KEM_768))
            .add_transform(Transform::additional_ke(3, methods::ML_KEM_1024))
    }

    #[test]
    fn test_key_exchange_plan_is_compacted() {
        let sa = test_sa();
        let mut task = IkeInitTask::new(&sa, true, None);
        task.proposal = Some(hybrid_proposal());
        task.determine_key_exchanges();

        assert_eq!(task.key_exchanges[0].transform_type, Some(TransformType::Ke));
        assert_eq!(task.key_exchanges[0].method, methods::ECP_256);
        assert_eq!(
            task.key_exchanges[1].transform_type,
            Some(TransformType::AdditionalKe1)
        );
        assert_eq!(task.key_exchanges[1].method, methods::ML_KEM_768);
        // the gap between ADDITIONAL_KE_1 and _3 is compacted away
        assert_eq!(
            task.key_exchanges[2].transform_type,
            Some(TransformType::AdditionalKe3)
        );
        assert_eq!(task.key_exchanges[2].method, methods::ML_KEM_1024);
        assert_eq!(task.key_exchanges[3].transform_type, None);

        assert!(task.additional_key_exchange_required());
        task.key_exchanges[0].done = true;
        task.key_exchanges[1].done = true;
        task.key_exchanges[2].done = true;
        task.ke_index = 3;
        assert!(!task.additional_key_exchange_required());
    }

    #[test]
    fn test_lower_nonce_selection() {
        let sa = test_sa();
        let mut task = IkeInitTask::new(&sa, true, None);

        task.my_nonce = vec![1, 2, 3];
        task.other_nonce = vec![1, 2, 4, 0];
        assert_eq!(task.get_lower_nonce(), &[1, 2, 3]);

        task.my_nonce = vec![9, 9];
        task.other_nonce = vec![1, 2, 3];
        assert_eq!(task.get_lower_nonce(), &[1, 2, 3]);

        // equal common prefix resolves to the peer's nonce on both ends
        task.my_nonce = vec![5, 5];
        task.other_nonce = vec![5, 5, 1];
        assert_eq!(task.get_lower_nonce(), &[5, 5, 1]);
    }

    #[test]
    fn test_exchange_type_for_additional_rounds() {
        let sa = test_sa();
        let task = IkeInitTask::new(&sa, true, None);
        assert_eq!(task.exchange_type_multi_ke(), ExchangeType::IkeIntermediate);

        let rekey = RekeySource {
            sa_id: IkeSaId::default(),
            skd: None,
            ke_method: Some(methods::CURVE_25519),
        };
        let task = IkeInitTask::new(&sa, true, Some(rekey));
        assert_eq!(task.exchange_type_multi_ke(), ExchangeType::IkeFollowupKe);
    }

    #[test]
    fn test_migrate_keeps_identity_clears_volatile_state() {
        let sa = test_sa();
        let mut task = IkeInitTask::new(&sa, true, None);
        task.my_nonce = vec![1; 32];
        task.other_nonce = vec![2; 32];
        task.cookie = vec![3; 8];
        task.retry = 2;
        task.ke_failed = true;
        task.proposal = Some(hybrid_proposal());
        task.determine_key_exchanges();
        task.phase = Phase::MultiKe;

        task.migrate();

        assert_eq!(task.my_nonce, vec![1; 32]);
        assert_eq!(task.cookie, vec![3; 8]);
        assert_eq!(task.retry, 2);
        assert!(task.other_nonce.is_empty());
        assert!(!task.ke_failed);
        assert!(task.proposal.is_none());
        assert_eq!(task.phase, Phase::Initial);
        assert!(task.key_exchanges.iter().all(|s| s.transform_type.is_none()));
    }

    #[test]
    fn test_rekey_source_snapshot() {
        let mut sa = test_sa();
        sa.set_proposal(
            Proposal::new(1, ProtocolId::Ike)
                .add_transform(Transform::prf(5))
                .add_transform(Transform::ke(methods::ECP_384)),
        );
        let source = RekeySource::from_sa(&sa);
        assert_eq!(source.ke_method, Some(methods::ECP_384));
        assert!(source.skd.is_none());
        assert_eq!(source.sa_id, sa.id());
    }
}
