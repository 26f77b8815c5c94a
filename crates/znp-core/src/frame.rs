//! General frame exchanged with the transport
//!
//! The transport owns start-of-frame detection and checksums. What crosses
//! the boundary is the header plus raw payload; [`GeneralFrame::to_bytes`]
//! and [`GeneralFrame::from_bytes`] give the length-prefixed body the
//! transport wraps in its own framing.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::{DecodeError, EncodeError};
use crate::types::CommandHeader;

/// Maximum payload carried by a single frame
pub const MAX_PAYLOAD_SIZE: usize = 250;

/// Header and undecoded payload of one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralFrame {
    pub header: CommandHeader,
    pub data: Vec<u8>,
}

impl GeneralFrame {
    pub fn new(header: CommandHeader, data: Vec<u8>) -> Self {
        Self { header, data }
    }

    /// Encode as `length, cmd0, cmd1, payload...`
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let length = u8::try_from(self.data.len())
            .ok()
            .filter(|_| self.data.len() <= MAX_PAYLOAD_SIZE)
            .ok_or(EncodeError::PayloadTooLong {
                command: "GeneralFrame",
                length: self.data.len(),
            })?;

        let mut out = Vec::with_capacity(3 + self.data.len());
        out.push(length);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Decode a `length, cmd0, cmd1, payload...` body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let truncated = DecodeError::Truncated {
            command: "GeneralFrame",
            field: "header",
        };

        let (&length, rest) = bytes.split_first().ok_or(truncated.clone())?;
        if rest.len() < 2 {
            return Err(truncated);
        }
        let (cmd, payload) = rest.split_at(2);
        let header = CommandHeader::from_bytes([cmd[0], cmd[1]]).ok_or(DecodeError::Truncated {
            command: "GeneralFrame",
            field: "cmd0",
        })?;

        let length = usize::from(length);
        if payload.len() < length {
            return Err(DecodeError::Truncated {
                command: "GeneralFrame",
                field: "data",
            });
        }
        if payload.len() > length {
            return Err(DecodeError::TrailingBytes {
                command: "GeneralFrame",
                count: payload.len() - length,
            });
        }

        Ok(Self::new(header, payload.to_vec()))
    }
}

impl fmt::Display for GeneralFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.header, hex::encode(&self.data))
    }
}
