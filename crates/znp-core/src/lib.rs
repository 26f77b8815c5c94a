//! ZNP Core
//!
//! This crate provides the command model, frame codec, listener matching and
//! the header-indexed listener registry for clients of Texas Instruments
//! Z-Stack coprocessors speaking the ZNP (Zigbee Network Processor) protocol.
//! It knows nothing about serial ports; transports plug in through the traits
//! in [`transport`].

extern crate alloc;

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod catalog;
pub mod command;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod frame;
pub mod listener;
pub mod matcher;
pub mod registry;
pub mod schema;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use command::{Command, Constraints, MatchSpec};
pub use config::{DeviceConfig, ZnpConfig, DEFAULT_BAUDRATE};
pub use dedup::deduplicate;
pub use errors::{
    CommandError, DecodeError, EncodeError, LinkError, Result, StateTransitionError, ZnpError,
    ZnpResult,
};
pub use frame::{GeneralFrame, MAX_PAYLOAD_SIZE};
pub use listener::{ListenerCallback, ListenerId, ResponseListener};
pub use registry::{ListenerRegistry, ResponseFuture};
pub use schema::{CommandDef, FieldDef, FieldKind, FieldValue};
pub use transport::{Transport, TransportConnector, TransportListener};
pub use types::{CommandClass, CommandHeader, CommandType, Subsystem};
