//! IKEv2 Payload structures and parsing
//!
//! Implements the payloads consumed by the initial exchange (SA, KE, NONCE,
//! NOTIFY) as defined in RFC 7296 Section 3.

use super::constants::{NotifyType, PayloadType};
use super::proposal::{Proposal, ProtocolId, Transform, TransformAttribute, TransformType};
use crate::error::{Error, Result};

/// Generic IKE payload header (4 bytes)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Next payload type (raw; unknown types are skipped, not rejected)
    pub next_payload: u8,

    /// Critical bit (if set, the payload must be understood)
    pub critical: bool,

    /// Total payload length including header
    pub length: u16,
}

impl PayloadHeader {
    /// Payload header size
    pub const SIZE: usize = 4;

    /// Parse payload header from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::BufferTooShort {
                required: Self::SIZE,
                available: data.len(),
            });
        }

        let next_payload = data[0];
        let critical = (data[1] & 0x80) != 0;
        let length = u16::from_be_bytes([data[2], data[3]]);

        if (length as usize) < Self::SIZE {
            return Err(Error::InvalidLength {
                expected: Self::SIZE,
                actual: length as usize,
            });
        }

        Ok(PayloadHeader {
            next_payload,
            critical,
            length,
        })
    }

    /// Serialize payload header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.next_payload;
        bytes[1] = if self.critical { 0x80 } else { 0x00 };
        bytes[2..4].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }
}

/// IKE payloads handled by the initial exchange
#[derive(Debug, Clone, PartialEq)]
pub enum IkePayload {
    /// Security Association payload
    Sa(SaPayload),
    /// Key Exchange payload
    Ke(KePayload),
    /// Nonce payload
    Nonce(NoncePayload),
    /// Notify payload
    Notify(NotifyPayload),
}

impl IkePayload {
    /// Get payload type
    pub fn payload_type(&self) -> PayloadType {
        match self {
            IkePayload::Sa(_) => PayloadType::SA,
            IkePayload::Ke(_) => PayloadType::KE,
            IkePayload::Nonce(_) => PayloadType::Nonce,
            IkePayload::Notify(_) => PayloadType::Notify,
        }
    }

    /// Critical bit for the generic header
    pub fn critical(&self) -> bool {
        match self {
            IkePayload::Notify(n) => n.critical,
            _ => false,
        }
    }

    /// Parse a payload body of a known type
    pub fn from_payload_data(payload_type: PayloadType, data: &[u8]) -> Result<Self> {
        match payload_type {
            PayloadType::SA => Ok(IkePayload::Sa(SaPayload::from_payload_data(data)?)),
            PayloadType::KE => Ok(IkePayload::Ke(KePayload::from_payload_data(data)?)),
            PayloadType::Nonce => Ok(IkePayload::Nonce(NoncePayload::from_payload_data(data)?)),
            PayloadType::Notify => Ok(IkePayload::Notify(NotifyPayload::from_payload_data(data)?)),
            PayloadType::None => Err(Error::InvalidPayload(
                "cannot parse payload of type None".to_string(),
            )),
        }
    }

    /// Serialize the payload body (without the generic header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        match self {
            IkePayload::Sa(sa) => sa.to_payload_data(),
            IkePayload::Ke(ke) => ke.to_payload_data(),
            IkePayload::Nonce(nonce) => nonce.to_payload_data(),
            IkePayload::Notify(notify) => notify.to_payload_data(),
        }
    }
}

/// Security Association Payload (RFC 7296 Section 3.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaPayload {
    /// Offered or selected proposals
    pub proposals: Vec<Proposal>,
}

impl SaPayload {
    /// "More substructures follow" marker for proposals
    const MORE_PROPOSALS: u8 = 2;
    /// "More substructures follow" marker for transforms
    const MORE_TRANSFORMS: u8 = 3;

    /// Create new SA payload
    pub fn new(proposals: Vec<Proposal>) -> Self {
        SaPayload { proposals }
    }

    /// Parse SA payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        let mut proposals = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let rest = &data[offset..];
            if rest.len() < 8 {
                return Err(Error::BufferTooShort {
                    required: 8,
                    available: rest.len(),
                });
            }

            let more = rest[0];
            let length = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            if length < 8 || length > rest.len() {
                return Err(Error::InvalidPayload(format!(
                    "bad proposal length {}",
                    length
                )));
            }

            let proposal_num = rest[4];
            let protocol_id = ProtocolId::from_u8(rest[5])
                .ok_or_else(|| Error::InvalidPayload(format!("unknown protocol {}", rest[5])))?;
            let spi_size = rest[6] as usize;
            let transform_count = rest[7] as usize;

            if 8 + spi_size > length {
                return Err(Error::InvalidPayload("SPI exceeds proposal".to_string()));
            }
            let spi = rest[8..8 + spi_size].to_vec();

            let mut transforms = Vec::new();
            let mut t_offset = 8 + spi_size;
            for _ in 0..transform_count {
                let (transform, consumed) = Self::parse_transform(&rest[t_offset..length])?;
                transforms.push(transform);
                t_offset += consumed;
            }
            if t_offset != length {
                return Err(Error::InvalidPayload(
                    "trailing bytes in proposal".to_string(),
                ));
            }

            proposals.push(Proposal {
                proposal_num,
                protocol_id,
                spi,
                transforms,
            });

            offset += length;
            if more != Self::MORE_PROPOSALS && offset < data.len() {
                return Err(Error::InvalidPayload(
                    "data after last proposal".to_string(),
                ));
            }
        }

        Ok(SaPayload { proposals })
    }

    fn parse_transform(data: &[u8]) -> Result<(Transform, usize)> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if length < 8 || length > data.len() {
            return Err(Error::InvalidPayload(format!(
                "bad transform length {}",
                length
            )));
        }

        let transform_type = TransformType::from_u8(data[4])
            .ok_or_else(|| Error::InvalidPayload(format!("unknown transform type {}", data[4])))?;
        let transform_id = u16::from_be_bytes([data[6], data[7]]);

        let mut attributes = Vec::new();
        let mut offset = 8;
        while offset < length {
            let rest = &data[offset..length];
            if rest.len() < 4 {
                return Err(Error::BufferTooShort {
                    required: 4,
                    available: rest.len(),
                });
            }
            let raw_type = u16::from_be_bytes([rest[0], rest[1]]);
            if raw_type & 0x8000 != 0 {
                // TV format: two-byte value in place of the length
                attributes.push(TransformAttribute {
                    attr_type: raw_type & 0x7fff,
                    value: rest[2..4].to_vec(),
                });
                offset += 4;
            } else {
                let value_len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
                if 4 + value_len > rest.len() {
                    return Err(Error::InvalidPayload("attribute overruns".to_string()));
                }
                attributes.push(TransformAttribute {
                    attr_type: raw_type,
                    value: rest[4..4 + value_len].to_vec(),
                });
                offset += 4 + value_len;
            }
        }

        Ok((
            Transform {
                transform_type,
                transform_id,
                attributes,
            },
            length,
        ))
    }

    /// Serialize SA payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::new();

        for (p_idx, proposal) in self.proposals.iter().enumerate() {
            let mut body = Vec::new();
            body.push(proposal.proposal_num);
            body.push(proposal.protocol_id.to_u8());
            body.push(proposal.spi.len() as u8);
            body.push(proposal.transforms.len() as u8);
            body.extend_from_slice(&proposal.spi);

            for (t_idx, transform) in proposal.transforms.iter().enumerate() {
                let mut t_body = Vec::new();
                t_body.push(transform.transform_type.to_u8());
                t_body.push(0);
                t_body.extend_from_slice(&transform.transform_id.to_be_bytes());
                for attr in &transform.attributes {
                    if attr.value.len() == 2 {
                        t_body.extend_from_slice(&(attr.attr_type | 0x8000).to_be_bytes());
                        t_body.extend_from_slice(&attr.value);
                    } else {
                        t_body.extend_from_slice(&attr.attr_type.to_be_bytes());
                        t_body.extend_from_slice(&(attr.value.len() as u16).to_be_bytes());
                        t_body.extend_from_slice(&attr.value);
                    }
                }

                let more = if t_idx + 1 < proposal.transforms.len() {
                    Self::MORE_TRANSFORMS
                } else {
                    0
                };
                body.push(more);
                body.push(0);
                body.extend_from_slice(&((t_body.len() + 4) as u16).to_be_bytes());
                body.extend_from_slice(&t_body);
            }

            let more = if p_idx + 1 < self.proposals.len() {
                Self::MORE_PROPOSALS
            } else {
                0
            };
            data.push(more);
            data.push(0);
            data.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
            data.extend_from_slice(&body);
        }

        data
    }
}

/// Key Exchange Payload (RFC 7296 Section 3.4)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Key Exchange Method         |           RESERVED            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// ~                       Key Exchange Data                       ~
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KePayload {
    /// Key exchange method number
    pub method: u16,

    /// Key exchange data (public value)
    pub key_data: Vec<u8>,
}

impl KePayload {
    /// Create new KE payload
    pub fn new(method: u16, key_data: Vec<u8>) -> Self {
        KePayload { method, key_data }
    }

    /// Parse KE payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let method = u16::from_be_bytes([data[0], data[1]]);
        let key_data = data[4..].to_vec();

        Ok(KePayload { method, key_data })
    }

    /// Serialize KE payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.key_data.len());
        data.extend_from_slice(&self.method.to_be_bytes());
        data.extend_from_slice(&[0u8, 0u8]);
        data.extend_from_slice(&self.key_data);
        data
    }
}

/// Nonce Payload (RFC 7296 Section 3.9)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoncePayload {
    /// Nonce data
    pub nonce: Vec<u8>,
}

impl NoncePayload {
    /// Minimum nonce size (16 bytes)
    pub const MIN_SIZE: usize = 16;

    /// Maximum nonce size (256 bytes)
    pub const MAX_SIZE: usize = 256;

    /// Create new nonce payload
    pub fn new(nonce: Vec<u8>) -> Result<Self> {
        if nonce.len() < Self::MIN_SIZE {
            return Err(Error::InvalidPayload(format!(
                "Nonce too short: {} bytes (minimum {})",
                nonce.len(),
                Self::MIN_SIZE
            )));
        }

        if nonce.len() > Self::MAX_SIZE {
            return Err(Error::InvalidPayload(format!(
                "Nonce too long: {} bytes (maximum {})",
                nonce.len(),
                Self::MAX_SIZE
            )));
        }

        Ok(NoncePayload { nonce })
    }

    /// Parse nonce payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        Self::new(data.to_vec())
    }

    /// Serialize nonce payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        self.nonce.clone()
    }
}

/// Notify Payload (RFC 7296 Section 3.10)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Protocol ID  |   SPI Size    |      Notify Message Type      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                Security Parameter Index (SPI)                 ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                       Notification Data                       ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    /// Protocol the notify refers to (0 for the IKE SA itself)
    pub protocol_id: u8,

    /// SPI the notify refers to (empty for the IKE SA)
    pub spi: Vec<u8>,

    /// Raw notify message type; unknown values must survive round-trips
    pub notify_type: u16,

    /// Notification data
    pub data: Vec<u8>,

    /// Critical bit for the generic payload header
    pub critical: bool,
}

impl NotifyPayload {
    /// Create a notify of a known type
    pub fn new(notify_type: NotifyType, data: Vec<u8>) -> Self {
        Self::raw(notify_type.to_u16(), data)
    }

    /// Create a notify from a raw type value
    pub fn raw(notify_type: u16, data: Vec<u8>) -> Self {
        NotifyPayload {
            protocol_id: 0,
            spi: Vec::new(),
            notify_type,
            data,
            critical: false,
        }
    }

    /// Set the critical bit (builder form)
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// The notify type, when it is one we know
    pub fn known_type(&self) -> Option<NotifyType> {
        NotifyType::from_u16(self.notify_type)
    }

    /// Check if this notify signals an error
    pub fn is_error(&self) -> bool {
        self.notify_type <= super::constants::NOTIFY_ERROR_MAX
    }

    /// Parse notify payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let protocol_id = data[0];
        let spi_size = data[1] as usize;
        let notify_type = u16::from_be_bytes([data[2], data[3]]);

        if 4 + spi_size > data.len() {
            return Err(Error::InvalidPayload("SPI exceeds notify".to_string()));
        }
        let spi = data[4..4 + spi_size].to_vec();
        let payload_data = data[4 + spi_size..].to_vec();

        Ok(NotifyPayload {
            protocol_id,
            spi,
            notify_type,
            data: payload_data,
            critical: false,
        })
    }

    /// Serialize notify payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.spi.len() + self.data.len());
        data.push(self.protocol_id);
        data.push(self.spi.len() as u8);
        data.extend_from_slice(&self.notify_type.to_be_bytes());
        data.extend_from_slice(&self.spi);
        data.extend_from_slice(&self.data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kex::methods;

    #[test]
    fn test_payload_header_roundtrip() {
        let data = [
            40, // next payload (Nonce)
            0x80, // critical
            0, 50,
        ];

        let header = PayloadHeader::from_bytes(&data).unwrap();
        assert_eq!(header.next_payload, 40);
        assert!(header.critical);
        assert_eq!(header.length, 50);
        assert_eq!(header.to_bytes(), data);
    }

    #[test]
    fn test_payload_header_invalid_length() {
        let data = [33, 0, 0, 2];
        assert!(matches!(
            PayloadHeader::from_bytes(&data),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_nonce_payload_bounds() {
        assert!(NoncePayload::new(vec![1u8; 10]).is_err());
        assert!(NoncePayload::new(vec![1u8; 300]).is_err());

        let nonce = NoncePayload::new(vec![1u8; 32]).unwrap();
        let parsed = NoncePayload::from_payload_data(&nonce.to_payload_data()).unwrap();
        assert_eq!(parsed, nonce);
    }

    #[test]
    fn test_ke_payload_roundtrip() {
        let ke = KePayload::new(methods::ECP_256, vec![0xAA; 64]);
        let serialized = ke.to_payload_data();

        assert_eq!(&serialized[0..2], &methods::ECP_256.to_be_bytes());
        assert_eq!(&serialized[2..4], &[0, 0]);

        let parsed = KePayload::from_payload_data(&serialized).unwrap();
        assert_eq!(parsed, ke);
    }

    #[test]
    fn test_sa_payload_roundtrip() {
        let proposals = vec![
            Proposal::new(1, ProtocolId::Ike)
                .add_transform(Transform::encr(20).with_key_length(256))
                .add_transform(Transform::prf(5))
                .add_transform(Transform::ke(methods::ECP_256))
                .add_transform(Transform::additional_ke(1, methods::ML_KEM_768)),
            Proposal::new(2, ProtocolId::Ike)
                .add_transform(Transform::encr(12).with_key_length(128))
                .add_transform(Transform::prf(7))
                .add_transform(Transform::ke(methods::CURVE_25519))
                .with_spi(vec![1, 2, 3, 4, 5, 6, 7, 8]),
        ];
        let sa = SaPayload::new(proposals);

        let parsed = SaPayload::from_payload_data(&sa.to_payload_data()).unwrap();
        assert_eq!(parsed, sa);
        assert_eq!(parsed.proposals[0].transforms[0].key_length(), Some(256));
        assert_eq!(parsed.proposals[1].spi.len(), 8);
    }

    #[test]
    fn test_sa_payload_rejects_garbage() {
        assert!(SaPayload::from_payload_data(&[0u8; 3]).is_err());

        // proposal header claiming more data than present
        let bad = [0u8, 0, 0, 40, 1, 1, 0, 0];
        assert!(SaPayload::from_payload_data(&bad).is_err());
    }

    #[test]
    fn test_notify_payload_roundtrip() {
        let notify = NotifyPayload::new(NotifyType::Cookie, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let parsed = NotifyPayload::from_payload_data(&notify.to_payload_data()).unwrap();
        assert_eq!(parsed.known_type(), Some(NotifyType::Cookie));
        assert_eq!(parsed.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_notify_payload_unknown_type_survives() {
        let notify = NotifyPayload::raw(9000, vec![1, 2, 3]);
        let parsed = NotifyPayload::from_payload_data(&notify.to_payload_data()).unwrap();
        assert_eq!(parsed.notify_type, 9000);
        assert_eq!(parsed.known_type(), None);
        assert!(parsed.is_error());
    }

    #[test]
    fn test_ike_payload_dispatch() {
        let payload = IkePayload::Nonce(NoncePayload::new(vec![7u8; 32]).unwrap());
        assert_eq!(payload.payload_type(), PayloadType::Nonce);

        let body = payload.to_payload_data();
        let parsed = IkePayload::from_payload_data(PayloadType::Nonce, &body).unwrap();
        assert_eq!(parsed, payload);
    }
}
