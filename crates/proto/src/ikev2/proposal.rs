//! IKEv2 Proposal and Transform structures
//!
//! Implements SA proposal negotiation as defined in RFC 7296 Section 3.3,
//! extended with the additional key exchange transform types of RFC 9370.
//!
//! # Structure
//!
//! ```text
//! SA Payload
//!   └── Proposal(s)
//!         └── Transform(s)
//! ```

/// Transform Type (RFC 7296 Section 3.3.2, RFC 9370 Section 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransformType {
    /// Encryption Algorithm (ENCR)
    Encr = 1,
    /// Pseudo-random Function (PRF)
    Prf = 2,
    /// Integrity Algorithm (INTEG)
    Integ = 3,
    /// Key Exchange Method (formerly Diffie-Hellman Group)
    Ke = 4,
    /// Extended Sequence Numbers (ESN)
    Esn = 5,
    /// Additional Key Exchange 1
    AdditionalKe1 = 6,
    /// Additional Key Exchange 2
    AdditionalKe2 = 7,
    /// Additional Key Exchange 3
    AdditionalKe3 = 8,
    /// Additional Key Exchange 4
    AdditionalKe4 = 9,
    /// Additional Key Exchange 5
    AdditionalKe5 = 10,
    /// Additional Key Exchange 6
    AdditionalKe6 = 11,
    /// Additional Key Exchange 7
    AdditionalKe7 = 12,
}

/// The additional key exchange transform types, in numerical order
pub const ADDITIONAL_KE_TYPES: [TransformType; 7] = [
    TransformType::AdditionalKe1,
    TransformType::AdditionalKe2,
    TransformType::AdditionalKe3,
    TransformType::AdditionalKe4,
    TransformType::AdditionalKe5,
    TransformType::AdditionalKe6,
    TransformType::AdditionalKe7,
];

/// All transform types, in numerical order
const ALL_TYPES: [TransformType; 12] = [
    TransformType::Encr,
    TransformType::Prf,
    TransformType::Integ,
    TransformType::Ke,
    TransformType::Esn,
    TransformType::AdditionalKe1,
    TransformType::AdditionalKe2,
    TransformType::AdditionalKe3,
    TransformType::AdditionalKe4,
    TransformType::AdditionalKe5,
    TransformType::AdditionalKe6,
    TransformType::AdditionalKe7,
];

impl TransformType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        ALL_TYPES.iter().copied().find(|t| t.to_u8() == value)
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is one of the additional key exchange types
    pub fn is_additional_ke(self) -> bool {
        self.to_u8() >= TransformType::AdditionalKe1.to_u8()
    }
}

/// Transform IDs at or above this value are in the private-use range
const PRIVATE_USE_MIN: u16 = 1024;

/// Transform attribute (RFC 7296 Section 3.3.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformAttribute {
    /// Attribute type
    pub attr_type: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

impl TransformAttribute {
    /// Key Length attribute type (always TV format)
    pub const KEY_LENGTH: u16 = 14;
}

/// IKE Transform
///
/// Represents a single cryptographic algorithm choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    /// Transform type
    pub transform_type: TransformType,

    /// Transform ID
    pub transform_id: u16,

    /// Attributes (e.g., key length)
    pub attributes: Vec<TransformAttribute>,
}

impl Transform {
    /// Create new transform
    pub fn new(transform_type: TransformType, transform_id: u16) -> Self {
        Transform {
            transform_type,
            transform_id,
            attributes: Vec::new(),
        }
    }

    /// Create encryption transform
    pub fn encr(id: u16) -> Self {
        Transform::new(TransformType::Encr, id)
    }

    /// Create PRF transform
    pub fn prf(id: u16) -> Self {
        Transform::new(TransformType::Prf, id)
    }

    /// Create key exchange transform
    pub fn ke(id: u16) -> Self {
        Transform::new(TransformType::Ke, id)
    }

    /// Create an additional key exchange transform (`n` in 1..=7)
    pub fn additional_ke(n: usize, id: u16) -> Self {
        Transform::new(ADDITIONAL_KE_TYPES[n - 1], id)
    }

    /// Attach a key length attribute (bits)
    pub fn with_key_length(mut self, bits: u16) -> Self {
        self.attributes.push(TransformAttribute {
            attr_type: TransformAttribute::KEY_LENGTH,
            value: bits.to_be_bytes().to_vec(),
        });
        self
    }

    /// Key length attribute in bits, if present
    pub fn key_length(&self) -> Option<u16> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == TransformAttribute::KEY_LENGTH)
            .and_then(|a| a.value.as_slice().try_into().ok())
            .map(u16::from_be_bytes)
    }

    /// Check if this transform uses a private-use identifier
    pub fn is_private(&self) -> bool {
        self.transform_id >= PRIVATE_USE_MIN
    }
}

/// Protocol ID for proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// IKE SA
    Ike = 1,
    /// AH (Authentication Header)
    Ah = 2,
    /// ESP (Encapsulating Security Payload)
    Esp = 3,
}

impl ProtocolId {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ProtocolId::Ike),
            2 => Some(ProtocolId::Ah),
            3 => Some(ProtocolId::Esp),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Proposal selection flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionFlags {
    /// Skip supplied proposals containing private-use algorithm identifiers
    pub skip_private: bool,
    /// Prefer the supplied (peer) proposal order over the configured order
    pub prefer_supplied: bool,
}

/// IKE Proposal
///
/// Represents a single proposal containing one or more transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Proposal number (1-based)
    pub proposal_num: u8,

    /// Protocol ID (IKE, ESP, AH)
    pub protocol_id: ProtocolId,

    /// SPI - empty in an initial IKE_SA_INIT, 8 bytes when rekeying
    pub spi: Vec<u8>,

    /// List of transforms
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// Create new proposal
    pub fn new(proposal_num: u8, protocol_id: ProtocolId) -> Self {
        Proposal {
            proposal_num,
            protocol_id,
            spi: Vec::new(),
            transforms: Vec::new(),
        }
    }

    /// Add transform to proposal
    pub fn add_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Set SPI (builder form)
    pub fn with_spi(mut self, spi: Vec<u8>) -> Self {
        self.spi = spi;
        self
    }

    /// Replace the SPI in place
    pub fn set_spi(&mut self, spi: &[u8]) {
        self.spi = spi.to_vec();
    }

    /// First transform ID of the given type, if any
    pub fn get_algorithm(&self, transform_type: TransformType) -> Option<u16> {
        self.transforms
            .iter()
            .find(|t| t.transform_type == transform_type)
            .map(|t| t.transform_id)
    }

    /// Check whether a specific (type, id) transform is offered
    pub fn has_transform(&self, transform_type: TransformType, transform_id: u16) -> bool {
        self.transforms
            .iter()
            .any(|t| t.transform_type == transform_type && t.transform_id == transform_id)
    }

    /// Move the (type, id) transform to the front of its type group
    ///
    /// Returns false if the proposal does not offer the transform.
    pub fn promote_transform(&mut self, transform_type: TransformType, transform_id: u16) -> bool {
        let Some(pos) = self
            .transforms
            .iter()
            .position(|t| t.transform_type == transform_type && t.transform_id == transform_id)
        else {
            return false;
        };
        let transform = self.transforms.remove(pos);
        let insert_at = self
            .transforms
            .iter()
            .position(|t| t.transform_type == transform_type)
            .unwrap_or(self.transforms.len());
        self.transforms.insert(insert_at, transform);
        true
    }

    /// Check if any transform uses a private-use identifier
    pub fn has_private_transforms(&self) -> bool {
        self.transforms.iter().any(|t| t.is_private())
    }

    /// All transform IDs of one type, in offer order
    fn ids_for(&self, transform_type: TransformType) -> Vec<u16> {
        self.transforms
            .iter()
            .filter(|t| t.transform_type == transform_type)
            .map(|t| t.transform_id)
            .collect()
    }

    /// Intersect this proposal (the preferred side) with another
    ///
    /// For every transform type either proposal offers, both must offer it
    /// and share at least one identifier; the identifier chosen is the first
    /// of this proposal's offers the other side also supports. Returns the
    /// chosen transforms, or None if the proposals don't intersect.
    fn intersect(&self, other: &Proposal) -> Option<Vec<Transform>> {
        if self.protocol_id != other.protocol_id {
            return None;
        }

        let mut chosen = Vec::new();
        for transform_type in ALL_TYPES {
            let ours = self.ids_for(transform_type);
            let theirs = other.ids_for(transform_type);

            match (ours.is_empty(), theirs.is_empty()) {
                (true, true) => continue,
                (false, false) => {
                    let id = ours.iter().copied().find(|id| theirs.contains(id))?;
                    let template = self
                        .transforms
                        .iter()
                        .find(|t| t.transform_type == transform_type && t.transform_id == id)
                        .expect("id taken from this proposal");
                    chosen.push(template.clone());
                }
                // a type only one side offers can never be agreed on
                _ => return None,
            }
        }
        Some(chosen)
    }
}

/// Select a proposal from a supplied list against a configured list
///
/// Implements the selection algorithm of RFC 7296 Section 2.7. The result
/// carries the supplied proposal's number and SPI with exactly one transform
/// per negotiated type.
pub fn select_proposal(
    supplied: &[Proposal],
    configured: &[Proposal],
    flags: SelectionFlags,
) -> Option<Proposal> {
    let usable: Vec<&Proposal> = supplied
        .iter()
        .filter(|p| !(flags.skip_private && p.has_private_transforms()))
        .collect();

    if flags.prefer_supplied {
        for supplied_proposal in &usable {
            for configured_proposal in configured {
                if let Some(transforms) = supplied_proposal.intersect(configured_proposal) {
                    return Some(Proposal {
                        proposal_num: supplied_proposal.proposal_num,
                        protocol_id: supplied_proposal.protocol_id,
                        spi: supplied_proposal.spi.clone(),
                        transforms,
                    });
                }
            }
        }
    } else {
        for configured_proposal in configured {
            for supplied_proposal in &usable {
                if let Some(transforms) = configured_proposal.intersect(supplied_proposal) {
                    return Some(Proposal {
                        proposal_num: supplied_proposal.proposal_num,
                        protocol_id: supplied_proposal.protocol_id,
                        spi: supplied_proposal.spi.clone(),
                        transforms,
                    });
                }
            }
        }
    }
    None
}
