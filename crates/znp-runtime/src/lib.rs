//! ZNP Runtime
//!
//! This crate contains the dispatcher that drives a Z-Stack coprocessor:
//! - `Znp`: request/response correlation, listener registration and inbound
//!   frame routing
//! - `ConnectionState`: the guarded connection lifecycle
//! - Automatic reconnection with application startup re-run
//! - Dispatch statistics
//!
//! `znp-core` provides the command model and listener machinery this crate
//! orchestrates.

pub mod application;
pub mod state;
pub mod stats;
mod znp;

pub use application::ApplicationHandler;
pub use state::{ConnectionEvent, ConnectionState};
pub use stats::{StatsSnapshot, ZnpStats};
pub use znp::{RequestOptions, Znp};

// Re-export core types for convenience
pub use znp_core::{
    catalog, Command, CommandDef, DeviceConfig, FieldValue, LinkError, ListenerCallback,
    MatchSpec, ResponseFuture, ZnpConfig, ZnpError, ZnpResult,
};
