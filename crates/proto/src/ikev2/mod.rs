//! IKEv2 (Internet Key Exchange v2) protocol implementation
//!
//! Implements the IKE_SA_INIT machinery of RFC 7296 together with the
//! multiple-key-exchange extension of RFC 9370.
//!
//! # Message Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Initiator's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Responder's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Message ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Length                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

pub mod constants;
pub mod keymat;
pub mod message;
pub mod payload;
pub mod proposal;
pub mod redirect;
pub mod sa;
pub mod tasks;

pub use constants::*;
pub use keymat::Keymat;
pub use message::{IkeHeader, IkeMessage};
pub use payload::{IkePayload, KePayload, NoncePayload, NotifyPayload, SaPayload};
pub use proposal::{Proposal, Transform, TransformType};
pub use sa::{Extension, IkeSa, IkeSaId};
