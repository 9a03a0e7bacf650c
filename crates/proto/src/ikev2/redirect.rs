//! IKEv2 redirect data (RFC 5685)
//!
//! The REDIRECT and REDIRECTED_FROM notifies carry a gateway identity,
//! optionally followed by the nonce the initiator sent (REDIRECT only):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | GW Ident Type |  GW Ident Len |                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                                 ~
//! ~                   New Responder GW Identity                   ~
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ~                         Nonce Data                            ~
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{Error, Result};

const GW_IDENT_IPV4: u8 = 1;
const GW_IDENT_IPV6: u8 = 2;
const GW_IDENT_FQDN: u8 = 3;

/// The identity of a gateway a client is redirected to or from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayIdentity {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// IPv6 address
    Ipv6(Ipv6Addr),
    /// Fully qualified domain name
    Fqdn(String),
}

impl GatewayIdentity {
    /// Derive a gateway identity from a socket address
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ip) => GatewayIdentity::Ipv4(ip),
            IpAddr::V6(ip) => GatewayIdentity::Ipv6(ip),
        }
    }

    /// The address this identity names, when it is an IP identity
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            GatewayIdentity::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            GatewayIdentity::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            GatewayIdentity::Fqdn(_) => None,
        }
    }
}

impl fmt::Display for GatewayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayIdentity::Ipv4(ip) => write!(f, "{}", ip),
            GatewayIdentity::Ipv6(ip) => write!(f, "{}", ip),
            GatewayIdentity::Fqdn(name) => write!(f, "{}", name),
        }
    }
}

/// Encode redirect data from a gateway identity and an optional nonce
pub fn redirect_data_create(gateway: &GatewayIdentity, nonce: &[u8]) -> Vec<u8> {
    let (ident_type, ident): (u8, Vec<u8>) = match gateway {
        GatewayIdentity::Ipv4(ip) => (GW_IDENT_IPV4, ip.octets().to_vec()),
        GatewayIdentity::Ipv6(ip) => (GW_IDENT_IPV6, ip.octets().to_vec()),
        GatewayIdentity::Fqdn(name) => (GW_IDENT_FQDN, name.as_bytes().to_vec()),
    };

    let mut data = Vec::with_capacity(2 + ident.len() + nonce.len());
    data.push(ident_type);
    data.push(ident.len() as u8);
    data.extend_from_slice(&ident);
    data.extend_from_slice(nonce);
    data
}

/// Parse redirect data; the trailing bytes (if any) are the echoed nonce
pub fn redirect_data_parse(data: &[u8]) -> Result<(GatewayIdentity, Vec<u8>)> {
    if data.len() < 2 {
        return Err(Error::BufferTooShort {
            required: 2,
            available: data.len(),
        });
    }

    let ident_type = data[0];
    let ident_len = data[1] as usize;
    if 2 + ident_len > data.len() {
        return Err(Error::InvalidPayload(
            "gateway identity exceeds notify data".to_string(),
        ));
    }

    let ident = &data[2..2 + ident_len];
    let nonce = data[2 + ident_len..].to_vec();

    let gateway = match ident_type {
        GW_IDENT_IPV4 => {
            let octets: [u8; 4] = ident.try_into().map_err(|_| {
                Error::InvalidPayload("IPv4 gateway identity must be 4 bytes".to_string())
            })?;
            GatewayIdentity::Ipv4(Ipv4Addr::from(octets))
        }
        GW_IDENT_IPV6 => {
            let octets: [u8; 16] = ident.try_into().map_err(|_| {
                Error::InvalidPayload("IPv6 gateway identity must be 16 bytes".to_string())
            })?;
            GatewayIdentity::Ipv6(Ipv6Addr::from(octets))
        }
        GW_IDENT_FQDN => {
            let name = std::str::from_utf8(ident)
                .map_err(|_| Error::InvalidPayload("FQDN identity not UTF-8".to_string()))?;
            if name.is_empty() {
                return Err(Error::InvalidPayload("empty FQDN identity".to_string()));
            }
            GatewayIdentity::Fqdn(name.to_string())
        }
        other => {
            return Err(Error::InvalidPayload(format!(
                "unknown gateway identity type {}",
                other
            )))
        }
    };

    Ok((gateway, nonce))
}
