//! IKEv2 protocol constants from RFC 7296 and its extensions

/// IKE version 2 (major version = 2, minor version = 0)
pub const IKE_VERSION: u8 = 0x20;

/// Maximum IKE message size (64KB - 1)
pub const MAX_IKE_MESSAGE_SIZE: u32 = 65535;

/// IKE header size (28 bytes)
pub const IKE_HEADER_SIZE: usize = 28;

/// Notify types at or below this value are errors (RFC 7296 Section 3.10.1)
pub const NOTIFY_ERROR_MAX: u16 = 16383;

/// Exchange Types (RFC 7296 Section 3.1, RFC 9242, RFC 9370)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExchangeType {
    /// IKE_SA_INIT exchange (34)
    IkeSaInit = 34,
    /// IKE_AUTH exchange (35)
    IkeAuth = 35,
    /// CREATE_CHILD_SA exchange (36)
    CreateChildSa = 36,
    /// INFORMATIONAL exchange (37)
    Informational = 37,
    /// IKE_INTERMEDIATE exchange (43, RFC 9242)
    IkeIntermediate = 43,
    /// IKE_FOLLOWUP_KE exchange (44, RFC 9370)
    IkeFollowupKe = 44,
}

impl ExchangeType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            34 => Some(ExchangeType::IkeSaInit),
            35 => Some(ExchangeType::IkeAuth),
            36 => Some(ExchangeType::CreateChildSa),
            37 => Some(ExchangeType::Informational),
            43 => Some(ExchangeType::IkeIntermediate),
            44 => Some(ExchangeType::IkeFollowupKe),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// IKE message flags (RFC 7296 Section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IkeFlags(u8);

impl IkeFlags {
    /// Response flag (bit 5)
    pub const RESPONSE: u8 = 0x20;
    /// Version flag (bit 4)
    pub const VERSION: u8 = 0x10;
    /// Initiator flag (bit 3)
    pub const INITIATOR: u8 = 0x08;

    /// Create new flags
    pub fn new(value: u8) -> Self {
        IkeFlags(value & 0x38) // only bits 3-5 are defined
    }

    /// Create flags for a request
    pub fn request(is_initiator: bool) -> Self {
        if is_initiator {
            IkeFlags(Self::INITIATOR)
        } else {
            IkeFlags(0)
        }
    }

    /// Create flags for a response
    pub fn response(is_initiator: bool) -> Self {
        let mut flags = Self::RESPONSE;
        if is_initiator {
            flags |= Self::INITIATOR;
        }
        IkeFlags(flags)
    }

    /// Check if this is a response
    pub fn is_response(self) -> bool {
        (self.0 & Self::RESPONSE) != 0
    }

    /// Check if this is from the exchange initiator
    pub fn is_initiator(self) -> bool {
        (self.0 & Self::INITIATOR) != 0
    }

    /// Get raw value
    pub fn value(self) -> u8 {
        self.0
    }
}

/// Payload Types (RFC 7296 Section 3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    /// No next payload (0)
    None = 0,
    /// Security Association (33)
    SA = 33,
    /// Key Exchange (34)
    KE = 34,
    /// Nonce (40)
    Nonce = 40,
    /// Notify (41)
    Notify = 41,
}

impl PayloadType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PayloadType::None),
            33 => Some(PayloadType::SA),
            34 => Some(PayloadType::KE),
            40 => Some(PayloadType::Nonce),
            41 => Some(PayloadType::Notify),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Notify message types used by the initial exchange
///
/// Error types occupy 1..16383, status types 16384 and up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NotifyType {
    /// INVALID_SYNTAX (7)
    InvalidSyntax = 7,
    /// NO_PROPOSAL_CHOSEN (14)
    NoProposalChosen = 14,
    /// INVALID_KE_PAYLOAD (17)
    InvalidKePayload = 17,
    /// NAT_DETECTION_SOURCE_IP (16388), handled by the NAT detection task
    NatDetectionSourceIp = 16388,
    /// NAT_DETECTION_DESTINATION_IP (16389), handled by the NAT detection task
    NatDetectionDestinationIp = 16389,
    /// COOKIE (16390)
    Cookie = 16390,
    /// MULTIPLE_AUTH_SUPPORTED (16404), handled by the auth task
    MultipleAuthSupported = 16404,
    /// REDIRECT_SUPPORTED (16406, RFC 5685)
    RedirectSupported = 16406,
    /// REDIRECT (16407, RFC 5685)
    Redirect = 16407,
    /// REDIRECTED_FROM (16408, RFC 5685)
    RedirectedFrom = 16408,
    /// CHILDLESS_IKEV2_SUPPORTED (16418, RFC 6023)
    ChildlessIkev2Supported = 16418,
    /// IKEV2_FRAGMENTATION_SUPPORTED (16430, RFC 7383)
    FragmentationSupported = 16430,
    /// SIGNATURE_HASH_ALGORITHMS (16431, RFC 7427)
    SignatureHashAlgorithms = 16431,
    /// USE_PPK (16435, RFC 8784)
    UsePpk = 16435,
}

impl NotifyType {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            7 => Some(NotifyType::InvalidSyntax),
            14 => Some(NotifyType::NoProposalChosen),
            17 => Some(NotifyType::InvalidKePayload),
            16388 => Some(NotifyType::NatDetectionSourceIp),
            16389 => Some(NotifyType::NatDetectionDestinationIp),
            16390 => Some(NotifyType::Cookie),
            16404 => Some(NotifyType::MultipleAuthSupported),
            16406 => Some(NotifyType::RedirectSupported),
            16407 => Some(NotifyType::Redirect),
            16408 => Some(NotifyType::RedirectedFrom),
            16418 => Some(NotifyType::ChildlessIkev2Supported),
            16430 => Some(NotifyType::FragmentationSupported),
            16431 => Some(NotifyType::SignatureHashAlgorithms),
            16435 => Some(NotifyType::UsePpk),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Check if this is an error notification
    pub fn is_error(self) -> bool {
        self.to_u16() <= NOTIFY_ERROR_MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_type_conversion() {
        assert_eq!(ExchangeType::from_u8(34), Some(ExchangeType::IkeSaInit));
        assert_eq!(ExchangeType::from_u8(43), Some(ExchangeType::IkeIntermediate));
        assert_eq!(ExchangeType::from_u8(44), Some(ExchangeType::IkeFollowupKe));
        assert_eq!(ExchangeType::from_u8(99), None);

        assert_eq!(ExchangeType::IkeSaInit.to_u8(), 34);
        assert_eq!(ExchangeType::IkeFollowupKe.to_u8(), 44);
    }

    #[test]
    fn test_ike_flags() {
        let flags = IkeFlags::request(true);
        assert!(!flags.is_response());
        assert!(flags.is_initiator());

        let flags = IkeFlags::response(false);
        assert!(flags.is_response());
        assert!(!flags.is_initiator());

        let flags = IkeFlags::response(true);
        assert_eq!(flags.value(), IkeFlags::RESPONSE | IkeFlags::INITIATOR);
    }

    #[test]
    fn test_payload_type_conversion() {
        assert_eq!(PayloadType::from_u8(0), Some(PayloadType::None));
        assert_eq!(PayloadType::from_u8(33), Some(PayloadType::SA));
        assert_eq!(PayloadType::from_u8(41), Some(PayloadType::Notify));
        assert_eq!(PayloadType::from_u8(255), None);
    }

    #[test]
    fn test_notify_type_classification() {
        assert!(NotifyType::NoProposalChosen.is_error());
        assert!(NotifyType::InvalidKePayload.is_error());
        assert!(!NotifyType::Cookie.is_error());
        assert!(!NotifyType::SignatureHashAlgorithms.is_error());
    }

    #[test]
    fn test_notify_type_conversion() {
        assert_eq!(NotifyType::from_u16(16390), Some(NotifyType::Cookie));
        assert_eq!(NotifyType::from_u16(16431), Some(NotifyType::SignatureHashAlgorithms));
        assert_eq!(NotifyType::from_u16(12345), None);
        assert_eq!(NotifyType::Redirect.to_u16(), 16407);
    }
}
