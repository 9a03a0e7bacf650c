//! Daemon event bus
//!
//! Collects alerts and key-material events raised by tasks so that other
//! daemon components (and tests) can observe them. Every event is also
//! mirrored to `tracing`.

use std::sync::Mutex;

use crate::ikev2::proposal::Proposal;
use crate::ikev2::sa::IkeSaId;

/// Alerts raised by protocol tasks
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// No IKE proposal could be agreed on; carries the peer's offer
    IkeProposalMismatch {
        /// The proposals the peer offered (or that we configured, when the
        /// peer rejected ours)
        proposals: Vec<Proposal>,
    },
}

/// Event published when IKE key material was derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeKeysEvent {
    /// Identifier of the SA the keys belong to
    pub sa_id: IkeSaId,
    /// Number of key exchanges that contributed to the derivation
    pub key_exchanges: usize,
    /// Initiator nonce
    pub nonce_i: Vec<u8>,
    /// Responder nonce
    pub nonce_r: Vec<u8>,
    /// The SA whose `SK_d` seeded the derivation, if any
    pub rekeyed_from: Option<IkeSaId>,
}

/// The bus instance shared by all SAs of a daemon
#[derive(Debug, Default)]
pub struct Bus {
    alerts: Mutex<Vec<Alert>>,
    ike_keys: Mutex<Vec<IkeKeysEvent>>,
}

impl Bus {
    /// Create a new bus
    pub fn new() -> Self {
        Bus::default()
    }

    /// Raise an alert
    pub fn alert(&self, alert: Alert) {
        match &alert {
            Alert::IkeProposalMismatch { proposals } => {
                tracing::warn!(offered = proposals.len(), "IKE proposal mismatch");
            }
        }
        self.alerts.lock().expect("bus poisoned").push(alert);
    }

    /// Publish derived IKE keys
    pub fn ike_keys(&self, event: IkeKeysEvent) {
        tracing::debug!(
            spi_i = %hex::encode(event.sa_id.initiator_spi),
            spi_r = %hex::encode(event.sa_id.responder_spi),
            key_exchanges = event.key_exchanges,
            rekey = event.rekeyed_from.is_some(),
            "IKE keys derived"
        );
        self.ike_keys.lock().expect("bus poisoned").push(event);
    }

    /// Alerts raised so far
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().expect("bus poisoned").clone()
    }

    /// Key events published so far
    pub fn ike_keys_events(&self) -> Vec<IkeKeysEvent> {
        self.ike_keys.lock().expect("bus poisoned").clone()
    }
}
