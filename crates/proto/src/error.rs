//! Error types for IKEv2 protocol operations
//!
//! This module defines a unified error type for message parsing, proposal
//! negotiation and key exchange failures.

use std::fmt;

/// Result type for IKEv2 operations
pub type Result<T> = std::result::Result<T, Error>;

/// IKEv2 protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid IKEv2 message format
    InvalidMessage(String),

    /// Invalid IKEv2 payload
    InvalidPayload(String),

    /// Unsupported protocol version
    UnsupportedVersion(u8),

    /// Unsupported exchange type
    UnsupportedExchangeType(u8),

    /// No acceptable proposal found
    NoProposalChosen,

    /// Key exchange method not supported by the crypto provider
    UnsupportedKeMethod(u16),

    /// Cryptographic operation failed
    CryptoError(String),

    /// Nonce generation failed
    NonceAllocationFailed,

    /// Invalid packet length
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Message too large
    MessageTooLarge(u32),

    /// Invalid configuration parameter
    InvalidParameter(String),

    /// State machine error
    InvalidState(String),

    /// Internal error (should not happen)
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidMessage(msg) => write!(f, "Invalid IKE message: {}", msg),
            Error::InvalidPayload(msg) => write!(f, "Invalid IKE payload: {}", msg),
            Error::UnsupportedVersion(v) => {
                write!(f, "Unsupported IKE version: 0x{:02x}", v)
            }
            Error::UnsupportedExchangeType(t) => {
                write!(f, "Unsupported exchange type: {}", t)
            }
            Error::NoProposalChosen => {
                write!(f, "No acceptable proposal found in negotiation")
            }
            Error::UnsupportedKeMethod(m) => {
                write!(f, "Unsupported key exchange method: {}", m)
            }
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::NonceAllocationFailed => write!(f, "Nonce allocation failed"),
            Error::InvalidLength { expected, actual } => {
                write!(f, "Invalid length: expected {}, got {}", expected, actual)
            }
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::MessageTooLarge(size) => {
                write!(f, "IKE message too large: {} bytes", size)
            }
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
