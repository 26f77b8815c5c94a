//! Concrete commands and partial match specifications
//!
//! A [`Command`] is a fully-populated instance of a [`CommandDef`]. A
//! [`MatchSpec`] is the same shape with every field optional: constrained
//! fields must be equal for a command to match, unconstrained fields accept
//! anything.

use core::fmt;
use smallvec::SmallVec;

use crate::errors::{CommandError, DecodeError, EncodeError};
use crate::frame::{GeneralFrame, MAX_PAYLOAD_SIZE};
use crate::schema::{CommandDef, FieldValue};
use crate::types::{CommandClass, CommandHeader};

/// Per-field constraint storage, inline for the common short field lists
pub type Constraints = SmallVec<[Option<FieldValue>; 8]>;

// ----------------------------------------------------------------------------
// Command
// ----------------------------------------------------------------------------

/// A concrete command with every declared field populated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    def: &'static CommandDef,
    values: Vec<FieldValue>,
}

impl Command {
    /// Build a command, validating field names, kinds and completeness
    pub fn new<'a, I>(def: &'static CommandDef, fields: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = (&'a str, FieldValue)>,
    {
        let constraints = collect_fields(def, fields)?;
        let values = constraints
            .into_iter()
            .zip(def.fields)
            .map(|(value, field)| {
                value.ok_or(CommandError::MissingField {
                    command: def.name,
                    field: field.name,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { def, values })
    }

    /// Build a command with no fields
    pub fn empty(def: &'static CommandDef) -> Result<Self, CommandError> {
        Self::new(def, core::iter::empty())
    }

    pub fn def(&self) -> &'static CommandDef {
        self.def
    }

    pub fn header(&self) -> CommandHeader {
        self.def.header
    }

    pub fn class(&self) -> CommandClass {
        self.def.class
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    /// Field values in declaration order
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Look up a field value by name
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.def
            .field_index(field)
            .and_then(|index| self.values.get(index))
    }

    /// Serialize into a frame for the transport
    pub fn to_frame(&self) -> Result<GeneralFrame, EncodeError> {
        let mut data = Vec::with_capacity(CommandDef::encoded_len(&self.values));
        for (value, field) in self.values.iter().zip(self.def.fields) {
            value.encode_into(self.def.name, field.name, &mut data)?;
        }
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::PayloadTooLong {
                command: self.def.name,
                length: data.len(),
            });
        }
        Ok(GeneralFrame::new(self.def.header, data))
    }

    /// Decode an inbound frame into the response or callback it carries
    pub fn from_frame(frame: &GeneralFrame) -> Result<Self, DecodeError> {
        let def = crate::catalog::lookup_inbound(frame.header).ok_or(DecodeError::UnknownCommand {
            header: frame.header,
        })?;
        Self::decode(def, &frame.data)
    }

    /// Decode a payload against a specific definition
    pub fn decode(def: &'static CommandDef, data: &[u8]) -> Result<Self, DecodeError> {
        let mut rest = data;
        let mut values = Vec::with_capacity(def.fields.len());

        for field in def.fields {
            let (value, remaining) = FieldValue::decode(field.kind, def.name, field.name, rest)?;
            values.push(value);
            rest = remaining;
        }

        if !rest.is_empty() {
            return Err(DecodeError::TrailingBytes {
                command: def.name,
                count: rest.len(),
            });
        }

        Ok(Self { def, values })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.def.name)?;
        for (i, (field, value)) in self.def.fields.iter().zip(&self.values).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", field.name, value)?;
        }
        f.write_str(")")
    }
}

// ----------------------------------------------------------------------------
// Match Specification
// ----------------------------------------------------------------------------

/// A command shape with optional per-field constraints
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    def: &'static CommandDef,
    constraints: Constraints,
}

impl MatchSpec {
    /// Match any instance of `def`
    pub fn any(def: &'static CommandDef) -> Self {
        Self {
            def,
            constraints: def.fields.iter().map(|_| None).collect(),
        }
    }

    /// Build from named constraints; fields not mentioned stay unconstrained
    pub fn from_constraints<'a, I>(def: &'static CommandDef, fields: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = (&'a str, FieldValue)>,
    {
        let constraints = collect_fields(def, fields)?;
        Ok(Self { def, constraints })
    }

    /// Add or replace one field constraint
    pub fn with<V: Into<FieldValue>>(mut self, field: &str, value: V) -> Result<Self, CommandError> {
        let value = value.into();
        let index = checked_index(self.def, field, &value)?;
        if let Some(slot) = self.constraints.get_mut(index) {
            *slot = Some(value);
        }
        Ok(self)
    }

    pub fn def(&self) -> &'static CommandDef {
        self.def
    }

    pub fn header(&self) -> CommandHeader {
        self.def.header
    }

    pub fn class(&self) -> CommandClass {
        self.def.class
    }

    /// Constraint slots in declaration order
    pub fn constraints(&self) -> &[Option<FieldValue>] {
        &self.constraints
    }

    /// Constraint on a named field, `None` when unknown or unconstrained
    pub fn constraint(&self, field: &str) -> Option<&FieldValue> {
        self.def
            .field_index(field)
            .and_then(|index| self.constraints.get(index))
            .and_then(Option::as_ref)
    }

    /// Whether `command` satisfies this spec
    pub fn matches(&self, command: &Command) -> bool {
        crate::matcher::matches(self, command)
    }

    /// Whether every command matched by `other` is also matched by `self`
    pub fn subsumes(&self, other: &MatchSpec) -> bool {
        crate::matcher::subsumes(self, other)
    }
}

impl From<&Command> for MatchSpec {
    fn from(command: &Command) -> Self {
        Self {
            def: command.def,
            constraints: command.values.iter().cloned().map(Some).collect(),
        }
    }
}

impl From<Command> for MatchSpec {
    fn from(command: Command) -> Self {
        Self {
            def: command.def,
            constraints: command.values.into_iter().map(Some).collect(),
        }
    }
}

impl From<&'static CommandDef> for MatchSpec {
    fn from(def: &'static CommandDef) -> Self {
        Self::any(def)
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.def.name)?;
        let mut first = true;
        for (field, constraint) in self.def.fields.iter().zip(&self.constraints) {
            if let Some(value) = constraint {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{}={}", field.name, value)?;
                first = false;
            }
        }
        f.write_str(")")
    }
}

// ----------------------------------------------------------------------------
// Field Collection Helpers
// ----------------------------------------------------------------------------

fn checked_index(
    def: &'static CommandDef,
    field: &str,
    value: &FieldValue,
) -> Result<usize, CommandError> {
    let index = def
        .field_index(field)
        .ok_or_else(|| CommandError::UnknownField {
            command: def.name,
            field: field.to_string(),
        })?;
    let declared = def.fields[index];

    if declared.kind != value.kind() {
        return Err(CommandError::TypeMismatch {
            command: def.name,
            field: declared.name,
            expected: declared.kind.name(),
            actual: value.kind().name(),
        });
    }

    Ok(index)
}

fn collect_fields<'a, I>(def: &'static CommandDef, fields: I) -> Result<Constraints, CommandError>
where
    I: IntoIterator<Item = (&'a str, FieldValue)>,
{
    let mut slots: Constraints = def.fields.iter().map(|_| None).collect();

    for (name, value) in fields {
        let index = checked_index(def, name, &value)?;
        let slot = &mut slots[index];
        if slot.is_some() {
            return Err(CommandError::DuplicateField {
                command: def.name,
                field: def.fields[index].name,
            });
        }
        *slot = Some(value);
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{af, sys};

    fn data_request() -> Command {
        Command::new(
            &af::DATA_REQUEST,
            [
                ("DstAddr", FieldValue::U16(0x1234)),
                ("DstEndpoint", FieldValue::U8(1)),
                ("SrcEndpoint", FieldValue::U8(1)),
                ("ClusterId", FieldValue::U16(0x0006)),
                ("TSN", FieldValue::U8(7)),
                ("Options", FieldValue::U8(0)),
                ("Radius", FieldValue::U8(30)),
                ("Data", FieldValue::Bytes(vec![0x01, 0x07, 0x01])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_command_requires_every_field() {
        let result = Command::new(&sys::VERSION_RSP, [("TransportRev", FieldValue::U8(2))]);
        assert!(matches!(result, Err(CommandError::MissingField { .. })));
    }

    #[test]
    fn test_command_rejects_unknown_field() {
        let result = Command::new(&sys::PING_RSP, [("Bogus", FieldValue::U8(2))]);
        assert!(matches!(result, Err(CommandError::UnknownField { .. })));
    }

    #[test]
    fn test_command_rejects_kind_mismatch() {
        let result = Command::new(&sys::PING_RSP, [("Capabilities", FieldValue::U8(2))]);
        assert_eq!(
            result.unwrap_err(),
            CommandError::TypeMismatch {
                command: "SYS.Ping.Rsp",
                field: "Capabilities",
                expected: "u16",
                actual: "u8",
            }
        );
    }

    #[test]
    fn test_command_rejects_duplicate_field() {
        let result = MatchSpec::from_constraints(
            &af::DATA_CONFIRM,
            [("TSN", FieldValue::U8(1)), ("TSN", FieldValue::U8(2))],
        );
        assert!(matches!(result, Err(CommandError::DuplicateField { .. })));
    }

    #[test]
    fn test_frame_round_trip() {
        let command = data_request();
        let frame = command.to_frame().unwrap();

        assert_eq!(frame.header, af::DATA_REQUEST.header);
        assert_eq!(
            Command::decode(&af::DATA_REQUEST, &frame.data).unwrap(),
            command
        );
    }

    #[test]
    fn test_from_frame_rejects_trailing_bytes() {
        let frame = GeneralFrame::new(sys::PING_RSP.header, vec![0x59, 0x06, 0xFF]);
        assert_eq!(
            Command::from_frame(&frame).unwrap_err(),
            DecodeError::TrailingBytes {
                command: "SYS.Ping.Rsp",
                count: 1
            }
        );
    }

    #[test]
    fn test_from_frame_rejects_requests() {
        // Outbound-only headers never decode as inbound traffic
        let frame = GeneralFrame::new(sys::PING_REQ.header, vec![]);
        assert!(matches!(
            Command::from_frame(&frame),
            Err(DecodeError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_to_frame_reports_oversized_payload_as_encode_error() {
        let mut fields = data_request().values;
        fields[7] = FieldValue::Bytes(vec![0; 245]);
        let command = Command {
            def: &af::DATA_REQUEST,
            values: fields,
        };

        assert_eq!(
            command.to_frame().unwrap_err(),
            EncodeError::PayloadTooLong {
                command: "AF.DataRequest.Req",
                length: 255
            }
        );
    }

    #[test]
    fn test_to_frame_rejects_unencodable_field() {
        let mut fields = data_request().values;
        fields[7] = FieldValue::Bytes(vec![0; 300]);
        let command = Command {
            def: &af::DATA_REQUEST,
            values: fields,
        };

        assert!(matches!(
            command.to_frame(),
            Err(EncodeError::FieldTooLong { field: "Data", length: 300, .. })
        ));
    }

    #[test]
    fn test_field_accessors() {
        let command = data_request();

        assert_eq!(command.get("DstAddr").and_then(FieldValue::as_u64), Some(0x1234));
        assert_eq!(command.get("Data").and_then(FieldValue::as_u64), None);
        assert_eq!(
            command.get("Data").and_then(FieldValue::as_bytes),
            Some(&[0x01, 0x07, 0x01][..])
        );
        assert_eq!(command.get("TSN").and_then(FieldValue::as_bytes), None);
    }

    #[test]
    fn test_get_and_display() {
        let command = Command::new(&sys::PING_RSP, [("Capabilities", FieldValue::U16(0x0659))])
            .unwrap();

        assert_eq!(command.get("Capabilities"), Some(&FieldValue::U16(0x0659)));
        assert_eq!(command.get("Missing"), None);
        assert_eq!(command.to_string(), "SYS.Ping.Rsp(Capabilities=0x0659)");
    }

    #[test]
    fn test_spec_display_lists_constraints_only() {
        let spec = MatchSpec::any(&af::DATA_CONFIRM).with("TSN", 5u8).unwrap();
        assert_eq!(spec.to_string(), "AF.DataConfirm.Callback(TSN=0x05)");
        assert_eq!(spec.constraint("TSN"), Some(&FieldValue::U8(5)));
        assert_eq!(spec.constraint("Status"), None);
    }
}
