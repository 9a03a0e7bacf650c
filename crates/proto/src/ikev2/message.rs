//! IKEv2 message structures and parsing
//!
//! Implements the IKE message format defined in RFC 7296 Section 3.1: the
//! fixed header plus the chained payload list. The task layer works on a
//! decoded [`IkeMessage`]; the scheduler is responsible for moving the bytes.

use std::net::SocketAddr;

use super::constants::*;
use super::payload::{IkePayload, NotifyPayload, PayloadHeader};
use crate::error::{Error, Result};

/// IKE message header (28 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeHeader {
    /// Initiator's Security Parameter Index (8 bytes)
    pub initiator_spi: [u8; 8],

    /// Responder's Security Parameter Index (8 bytes, zero in the first request)
    pub responder_spi: [u8; 8],

    /// Next payload type
    pub next_payload: u8,

    /// Protocol version (must be 0x20 for IKEv2)
    pub version: u8,

    /// Exchange type
    pub exchange_type: ExchangeType,

    /// Message flags
    pub flags: IkeFlags,

    /// Message ID (used for replay protection and matching)
    pub message_id: u32,

    /// Total message length in bytes (including header)
    pub length: u32,
}

impl IkeHeader {
    /// Create a new IKE header
    pub fn new(
        initiator_spi: [u8; 8],
        responder_spi: [u8; 8],
        exchange_type: ExchangeType,
        flags: IkeFlags,
        message_id: u32,
    ) -> Self {
        IkeHeader {
            initiator_spi,
            responder_spi,
            next_payload: PayloadType::None.to_u8(),
            version: IKE_VERSION,
            exchange_type,
            flags,
            message_id,
            length: IKE_HEADER_SIZE as u32,
        }
    }

    /// Parse IKE header from bytes
    ///
    /// # Errors
    ///
    /// Returns error if the buffer is too short, the version is not 2.0,
    /// the exchange type is unknown or the length field is implausible.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < IKE_HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: IKE_HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut initiator_spi = [0u8; 8];
        let mut responder_spi = [0u8; 8];
        initiator_spi.copy_from_slice(&data[0..8]);
        responder_spi.copy_from_slice(&data[8..16]);

        let next_payload = data[16];

        let version = data[17];
        if version != IKE_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let exchange_type =
            ExchangeType::from_u8(data[18]).ok_or(Error::UnsupportedExchangeType(data[18]))?;

        let flags = IkeFlags::new(data[19]);
        let message_id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let length = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

        if length > MAX_IKE_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(length));
        }
        if length < IKE_HEADER_SIZE as u32 {
            return Err(Error::InvalidLength {
                expected: IKE_HEADER_SIZE,
                actual: length as usize,
            });
        }

        Ok(IkeHeader {
            initiator_spi,
            responder_spi,
            next_payload,
            version,
            exchange_type,
            flags,
            message_id,
            length,
        })
    }

    /// Serialize IKE header to bytes
    pub fn to_bytes(&self) -> [u8; IKE_HEADER_SIZE] {
        let mut bytes = [0u8; IKE_HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.initiator_spi);
        bytes[8..16].copy_from_slice(&self.responder_spi);
        bytes[16] = self.next_payload;
        bytes[17] = self.version;
        bytes[18] = self.exchange_type.to_u8();
        bytes[19] = self.flags.value();
        bytes[20..24].copy_from_slice(&self.message_id.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }
}

/// A decoded IKE message: header plus payload list
#[derive(Debug, Clone, PartialEq)]
pub struct IkeMessage {
    /// Message header
    pub header: IkeHeader,

    /// Payloads in message order
    pub payloads: Vec<IkePayload>,

    source: Option<SocketAddr>,
    destination: Option<SocketAddr>,
}

impl IkeMessage {
    /// Create an empty message with the given header
    pub fn new(header: IkeHeader) -> Self {
        IkeMessage {
            header,
            payloads: Vec::new(),
            source: None,
            destination: None,
        }
    }

    /// Create an empty request message
    pub fn request(exchange_type: ExchangeType, from_initiator: bool) -> Self {
        IkeMessage::new(IkeHeader::new(
            [0u8; 8],
            [0u8; 8],
            exchange_type,
            IkeFlags::request(from_initiator),
            0,
        ))
    }

    /// Create an empty response message
    pub fn response(exchange_type: ExchangeType, from_initiator: bool) -> Self {
        IkeMessage::new(IkeHeader::new(
            [0u8; 8],
            [0u8; 8],
            exchange_type,
            IkeFlags::response(from_initiator),
            0,
        ))
    }

    /// The exchange type
    pub fn exchange_type(&self) -> ExchangeType {
        self.header.exchange_type
    }

    /// Change the exchange type
    pub fn set_exchange_type(&mut self, exchange_type: ExchangeType) {
        self.header.exchange_type = exchange_type;
    }

    /// Append a payload
    pub fn add_payload(&mut self, payload: IkePayload) {
        self.payloads.push(payload);
    }

    /// Append a notify payload
    pub fn add_notify(&mut self, critical: bool, notify_type: NotifyType, data: Vec<u8>) {
        self.payloads.push(IkePayload::Notify(
            NotifyPayload::new(notify_type, data).with_critical(critical),
        ));
    }

    /// First payload of the given type
    pub fn get_payload(&self, payload_type: PayloadType) -> Option<&IkePayload> {
        self.payloads
            .iter()
            .find(|p| p.payload_type() == payload_type)
    }

    /// First notify of the given type
    pub fn get_notify(&self, notify_type: NotifyType) -> Option<&NotifyPayload> {
        self.notifies()
            .find(|n| n.notify_type == notify_type.to_u16())
    }

    /// Iterate over all notify payloads
    pub fn notifies(&self) -> impl Iterator<Item = &NotifyPayload> {
        self.payloads.iter().filter_map(|p| match p {
            IkePayload::Notify(n) => Some(n),
            _ => None,
        })
    }

    /// Source address the message arrived from, if known
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    /// Destination address the message arrived on, if known
    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    /// Attach transport addresses
    pub fn set_endpoints(&mut self, source: SocketAddr, destination: SocketAddr) {
        self.source = Some(source);
        self.destination = Some(destination);
    }

    /// Serialize the message; fills in next-payload chaining and length
    pub fn to_bytes(&mut self) -> Vec<u8> {
        let mut body = Vec::new();
        for (i, payload) in self.payloads.iter().enumerate() {
            let next = self
                .payloads
                .get(i + 1)
                .map(|p| p.payload_type().to_u8())
                .unwrap_or(PayloadType::None.to_u8());

            let payload_data = payload.to_payload_data();
            let header = PayloadHeader {
                next_payload: next,
                critical: payload.critical(),
                length: (PayloadHeader::SIZE + payload_data.len()) as u16,
            };
            body.extend_from_slice(&header.to_bytes());
            body.extend_from_slice(&payload_data);
        }

        self.header.next_payload = self
            .payloads
            .first()
            .map(|p| p.payload_type().to_u8())
            .unwrap_or(PayloadType::None.to_u8());
        self.header.length = (IKE_HEADER_SIZE + body.len()) as u32;

        let mut out = Vec::with_capacity(self.header.length as usize);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Parse a message from bytes
    ///
    /// Unknown payload types are skipped when their critical bit is clear
    /// and rejected otherwise, as required by RFC 7296 Section 2.5.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = IkeHeader::from_bytes(data)?;
        if (header.length as usize) != data.len() {
            return Err(Error::InvalidLength {
                expected: header.length as usize,
                actual: data.len(),
            });
        }

        let mut payloads = Vec::new();
        let mut current_type = header.next_payload;
        let mut offset = IKE_HEADER_SIZE;

        while current_type != PayloadType::None.to_u8() {
            let payload_header = PayloadHeader::from_bytes(&data[offset..])?;
            let end = offset + payload_header.length as usize;
            if end > data.len() {
                return Err(Error::BufferTooShort {
                    required: payload_header.length as usize,
                    available: data.len() - offset,
                });
            }

            let body = &data[offset + PayloadHeader::SIZE..end];
            match PayloadType::from_u8(current_type) {
                Some(payload_type) if payload_type != PayloadType::None => {
                    let mut payload = IkePayload::from_payload_data(payload_type, body)?;
                    if let IkePayload::Notify(n) = &mut payload {
                        n.critical = payload_header.critical;
                    }
                    payloads.push(payload);
                }
                _ if payload_header.critical => {
                    return Err(Error::InvalidPayload(format!(
                        "unknown critical payload type {}",
                        current_type
                    )));
                }
                _ => {
                    // unknown but not critical: skip
                }
            }

            current_type = payload_header.next_payload;
            offset = end;
        }

        if offset != data.len() {
            return Err(Error::InvalidMessage(
                "trailing bytes after last payload".to_string(),
            ));
        }

        let mut message = IkeMessage::new(header);
        message.payloads = payloads;
        Ok(message)
    }
}
