//! Command schema definitions
//!
//! A [`CommandDef`] is the static description of one command: its header,
//! its protocol class, the ordered list of typed fields it carries and, for
//! requests, the response it solicits. Definitions live in `static` items so
//! commands and match specs can hold `&'static CommandDef` handles.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::{DecodeError, EncodeError};
use crate::types::{CommandClass, CommandHeader};

// ----------------------------------------------------------------------------
// Field Kinds and Values
// ----------------------------------------------------------------------------

/// Wire representation of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    /// Byte string prefixed by a one-byte length
    Bytes,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::Bytes => "bytes",
        }
    }
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Kind this value encodes as
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::U8(_) => FieldKind::U8,
            FieldValue::U16(_) => FieldKind::U16,
            FieldValue::U32(_) => FieldKind::U32,
            FieldValue::U64(_) => FieldKind::U64,
            FieldValue::Bytes(_) => FieldKind::Bytes,
        }
    }

    /// Widen any integer value, `None` for byte strings
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            FieldValue::U8(v) => Some(u64::from(v)),
            FieldValue::U16(v) => Some(u64::from(v)),
            FieldValue::U32(v) => Some(u64::from(v)),
            FieldValue::U64(v) => Some(v),
            FieldValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(data) => Some(data),
            _ => None,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            FieldValue::U8(_) => 1,
            FieldValue::U16(_) => 2,
            FieldValue::U32(_) => 4,
            FieldValue::U64(_) => 8,
            FieldValue::Bytes(data) => 1 + data.len(),
        }
    }

    /// Append the little-endian encoding of this value to `out`
    pub(crate) fn encode_into(
        &self,
        command: &'static str,
        field: &'static str,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        match self {
            FieldValue::U8(v) => out.push(*v),
            FieldValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Bytes(data) => {
                let length = u8::try_from(data.len()).map_err(|_| EncodeError::FieldTooLong {
                    command,
                    field,
                    length: data.len(),
                })?;
                out.push(length);
                out.extend_from_slice(data);
            }
        }
        Ok(())
    }

    /// Decode one value of `kind` from the front of `data`, returning the rest
    pub(crate) fn decode<'a>(
        kind: FieldKind,
        command: &'static str,
        field: &'static str,
        data: &'a [u8],
    ) -> Result<(Self, &'a [u8]), DecodeError> {
        let truncated = || DecodeError::Truncated { command, field };

        match kind {
            FieldKind::U8 => {
                let (&byte, rest) = data.split_first().ok_or_else(truncated)?;
                Ok((FieldValue::U8(byte), rest))
            }
            FieldKind::U16 => {
                let (bytes, rest) = split_array::<2>(data).ok_or_else(truncated)?;
                Ok((FieldValue::U16(u16::from_le_bytes(bytes)), rest))
            }
            FieldKind::U32 => {
                let (bytes, rest) = split_array::<4>(data).ok_or_else(truncated)?;
                Ok((FieldValue::U32(u32::from_le_bytes(bytes)), rest))
            }
            FieldKind::U64 => {
                let (bytes, rest) = split_array::<8>(data).ok_or_else(truncated)?;
                Ok((FieldValue::U64(u64::from_le_bytes(bytes)), rest))
            }
            FieldKind::Bytes => {
                let (&length, rest) = data.split_first().ok_or_else(truncated)?;
                let length = usize::from(length);
                if rest.len() < length {
                    return Err(truncated());
                }
                let (payload, rest) = rest.split_at(length);
                Ok((FieldValue::Bytes(payload.to_vec()), rest))
            }
        }
    }
}

fn split_array<const N: usize>(data: &[u8]) -> Option<([u8; N], &[u8])> {
    if data.len() < N {
        return None;
    }
    let (head, rest) = data.split_at(N);
    let mut array = [0u8; N];
    array.copy_from_slice(head);
    Some((array, rest))
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::U8(v) => write!(f, "0x{v:02X}"),
            FieldValue::U16(v) => write!(f, "0x{v:04X}"),
            FieldValue::U32(v) => write!(f, "0x{v:08X}"),
            FieldValue::U64(v) => write!(f, "0x{v:016X}"),
            FieldValue::Bytes(data) => write!(f, "b'{}'", hex::encode(data)),
        }
    }
}

impl From<u8> for FieldValue {
    fn from(value: u8) -> Self {
        FieldValue::U8(value)
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::U16(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::U32(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::U64(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        FieldValue::Bytes(value.to_vec())
    }
}

// ----------------------------------------------------------------------------
// Definitions
// ----------------------------------------------------------------------------

/// One named field of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Static description of a command
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CommandDef {
    /// Qualified name such as `SYS.Ping.Req`
    pub name: &'static str,
    pub header: CommandHeader,
    pub class: CommandClass,
    pub fields: &'static [FieldDef],
    /// Synchronous response solicited by this request, if any
    pub response: Option<&'static CommandDef>,
}

impl CommandDef {
    /// Position of a field in declaration order
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn is_request(&self) -> bool {
        self.class == CommandClass::Request
    }

    /// Total encoded payload size for a set of values in declaration order
    pub(crate) fn encoded_len(values: &[FieldValue]) -> usize {
        values.iter().map(FieldValue::encoded_len).sum()
    }
}

impl fmt::Display for CommandDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
