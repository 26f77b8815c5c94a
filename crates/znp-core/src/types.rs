//! Core types for the ZNP command protocol
//!
//! Headers identify a command independently of its payload: the frame type
//! (synchronous request, asynchronous request/indication, synchronous
//! response), the subsystem and the command id within that subsystem.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Command Type
// ----------------------------------------------------------------------------

/// Frame type carried in the upper bits of the first command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandType {
    /// Polled frame, unused by this client
    POLL = 0,
    /// Synchronous request, always answered by an `SRSP`
    SREQ = 1,
    /// Asynchronous request or device-originated indication
    AREQ = 2,
    /// Synchronous response to an `SREQ`
    SRSP = 3,
}

impl CommandType {
    /// Decode from the three type bits of `cmd0`
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::POLL),
            1 => Some(Self::SREQ),
            2 => Some(Self::AREQ),
            3 => Some(Self::SRSP),
            _ => None,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::POLL => "POLL",
            CommandType::SREQ => "SREQ",
            CommandType::AREQ => "AREQ",
            CommandType::SRSP => "SRSP",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Subsystem
// ----------------------------------------------------------------------------

/// Z-Stack subsystem, the lower five bits of `cmd0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Subsystem {
    RPCError = 0x00,
    SYS = 0x01,
    MAC = 0x02,
    NWK = 0x03,
    AF = 0x04,
    ZDO = 0x05,
    SAPI = 0x06,
    UTIL = 0x07,
    DEBUG = 0x08,
    APP = 0x09,
    APPConfig = 0x0F,
    ZGP = 0x15,
}

impl Subsystem {
    /// Decode from the five subsystem bits of `cmd0`
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(Self::RPCError),
            0x01 => Some(Self::SYS),
            0x02 => Some(Self::MAC),
            0x03 => Some(Self::NWK),
            0x04 => Some(Self::AF),
            0x05 => Some(Self::ZDO),
            0x06 => Some(Self::SAPI),
            0x07 => Some(Self::UTIL),
            0x08 => Some(Self::DEBUG),
            0x09 => Some(Self::APP),
            0x0F => Some(Self::APPConfig),
            0x15 => Some(Self::ZGP),
            _ => None,
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ----------------------------------------------------------------------------
// Command Header
// ----------------------------------------------------------------------------

/// Identity of a command, independent of its field values
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandHeader {
    pub kind: CommandType,
    pub subsystem: Subsystem,
    pub id: u8,
}

impl CommandHeader {
    /// Create a header from its three components
    pub const fn new(kind: CommandType, subsystem: Subsystem, id: u8) -> Self {
        Self {
            kind,
            subsystem,
            id,
        }
    }

    /// Pack into the two command bytes used on the wire
    pub fn to_bytes(self) -> [u8; 2] {
        let cmd0 = ((self.kind as u8) << 5) | (self.subsystem as u8 & 0x1F);
        [cmd0, self.id]
    }

    /// Unpack the two command bytes, `None` for unknown types or subsystems
    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        let kind = CommandType::from_bits(bytes[0] >> 5)?;
        let subsystem = Subsystem::from_bits(bytes[0] & 0x1F)?;
        Some(Self::new(kind, subsystem, bytes[1]))
    }
}

impl fmt::Display for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} 0x{:02X}", self.kind, self.subsystem, self.id)
    }
}

// ----------------------------------------------------------------------------
// Command Class
// ----------------------------------------------------------------------------

/// Role a command plays in the request/response protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandClass {
    /// Sent by the host
    Request,
    /// Solicited reply to a synchronous request
    Response,
    /// Unsolicited indication emitted by the device
    Callback,
}

impl CommandClass {
    /// Whether listeners may wait on commands of this class
    pub fn is_listenable(self) -> bool {
        !matches!(self, CommandClass::Request)
    }
}

impl fmt::Display for CommandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandClass::Request => "Req",
            CommandClass::Response => "Rsp",
            CommandClass::Callback => "Callback",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_byte_packing() {
        let header = CommandHeader::new(CommandType::SRSP, Subsystem::ZDO, 0x40);
        let bytes = header.to_bytes();

        assert_eq!(bytes, [0x65, 0x40]);
        assert_eq!(CommandHeader::from_bytes(bytes), Some(header));
    }

    #[test]
    fn test_header_rejects_unknown_subsystem() {
        assert_eq!(CommandHeader::from_bytes([0x3E, 0x00]), None);
    }

    #[test]
    fn test_header_display() {
        let header = CommandHeader::new(CommandType::SREQ, Subsystem::SYS, 0x01);
        assert_eq!(header.to_string(), "SREQ SYS 0x01");
    }

    #[test]
    fn test_only_requests_are_not_listenable() {
        assert!(!CommandClass::Request.is_listenable());
        assert!(CommandClass::Response.is_listenable());
        assert!(CommandClass::Callback.is_listenable());
    }
}
