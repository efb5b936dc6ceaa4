use bincode::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::PacketError;


/// Identifies the category of a packet
pub type PacketCode = u16;
/// Identifies the variant of a packet inside its category
pub type PacketType = u16;

/// Size in bytes of the fixed header (code and type) that precedes the payload
pub const HEADER_LEN: usize = 4;

/// Header layout as it travels on the wire, code first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct WireHeader {
    code: PacketCode,
    packet_type: PacketType,
}

#[inline]
fn wire_config() -> impl Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Unit of application level messaging.
///
/// The dispatch core only looks at [`Packet::code`] and [`Packet::packet_type`];
/// the payload is left for handlers to interpret.
///
/// On the wire a packet is laid out as:
/// ``` text
///     | code (u16, BE) | type (u16, BE) | payload ... |
/// ```
/// ```
/// # use brick_server::packet::Packet;
/// # fn main() {
/// let packet = Packet::new(1, 2, b"hi".to_vec());
/// let wire = packet.to_wire().unwrap();
/// assert_eq!(wire, vec![0, 1, 0, 2, b'h', b'i']);
/// assert_eq!(Packet::from_wire(&wire).unwrap(), packet);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    code: PacketCode,
    packet_type: PacketType,
    payload: Vec<u8>,
}

impl Packet {
    /// Builds an outbound packet
    #[inline]
    #[must_use]
    pub fn new(code: PacketCode, packet_type: PacketType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            packet_type,
            payload: payload.into(),
        }
    }

    /// Decodes a packet received from the transport.
    ///
    /// # Errors
    /// [`PacketError::Malformed`] if `data` is shorter than [`HEADER_LEN`]
    pub fn from_wire(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_LEN {
            return Err(PacketError::Malformed { len: data.len() });
        }
        let (header, read): (WireHeader, usize) =
            bincode::serde::decode_from_slice(data, wire_config())
                .map_err(|_| PacketError::Malformed { len: data.len() })?;

        Ok(Self {
            code: header.code,
            packet_type: header.packet_type,
            payload: data[read..].to_vec(),
        })
    }

    /// Serializes code, type and payload, in this order.
    ///
    /// # Errors
    /// [`PacketError::Encode`] if the header cannot be encoded
    pub fn to_wire(&self) -> Result<Vec<u8>, PacketError> {
        let header = WireHeader {
            code: self.code,
            packet_type: self.packet_type,
        };
        let mut data: Vec<u8> = bincode::serde::encode_to_vec(header, wire_config())?;
        data.extend_from_slice(&self.payload);
        Ok(data)
    }

    /// message category
    #[inline]
    #[must_use]
    pub fn code(&self) -> PacketCode {
        self.code
    }

    /// message variant within [`Packet::code`]
    #[inline]
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// opaque payload
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the dispatch key of the packet
    #[inline]
    #[must_use]
    pub fn key(&self) -> (PacketCode, PacketType) {
        (self.code, self.packet_type)
    }
}
