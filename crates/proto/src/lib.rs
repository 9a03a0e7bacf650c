//! IKEv2 initial-exchange engine for the varen daemon.
//!
//! This crate implements the protocol machinery that establishes an IKE
//! security association between two peers:
//!
//! - **IKE_SA_INIT**: proposal negotiation, key exchange, nonces, cookies
//! - **IKE_INTERMEDIATE / IKE_FOLLOWUP_KE**: additional key exchanges for
//!   post-quantum hybridisation (RFC 9370)
//! - Key material derivation for the IKE SA, including rekeying with
//!   `SK_d` inheritance
//!
//! The surrounding daemon (scheduler, transport, retransmission, child SA
//! handling) is out of scope; the task in [`ikev2::tasks::ike_init`] is
//! driven one message at a time and reports progress through
//! [`ikev2::tasks::TaskStatus`].
//!
//! # Protocol Overview
//!
//! ```text
//! Initiator                         Responder
//! -----------                       -----------
//! HDR, SAi1, KEi, Ni  -->
//!                     <--  HDR, SAr1, KEr, Nr, [N+]
//!
//! (optionally, per negotiated additional key exchanges:)
//! HDR, KEi(n)  -->
//!              <--  HDR, KEr(n)
//! ```
//!
//! # References
//!
//! - [RFC 7296](https://datatracker.ietf.org/doc/html/rfc7296) - IKEv2 Protocol
//! - [RFC 7427](https://datatracker.ietf.org/doc/html/rfc7427) - Signature Authentication
//! - [RFC 5685](https://datatracker.ietf.org/doc/html/rfc5685) - Redirect Mechanism
//! - [RFC 9370](https://datatracker.ietf.org/doc/html/rfc9370) - Multiple Key Exchanges

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ikev2;

pub use error::{Error, Result};
