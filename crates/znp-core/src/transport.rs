//! Transport Collaborator Traits
//!
//! The dispatcher never touches a serial port directly. A
//! [`TransportConnector`] opens the link and hands back a [`Transport`] for
//! writes; inbound traffic and link failures flow back through the
//! [`TransportListener`] supplied at connect time.
//!
//! ## Contract
//!
//! - `frame_received` is called for every frame the transport decodes, in the
//!   order the bytes arrived
//! - `connection_lost` is called at most once per opened transport
//! - `close` is idempotent and never reports `connection_lost`

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::config::DeviceConfig;
use crate::errors::LinkError;
use crate::frame::GeneralFrame;

/// An open link to the coprocessor
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Write one frame; failures surface as link errors
    async fn send(&self, frame: GeneralFrame) -> Result<(), LinkError>;

    /// Tear the link down
    async fn close(&self);
}

/// Opens transports for a device
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        device: &DeviceConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn Transport>, LinkError>;
}

/// Receives inbound events from an open transport
pub trait TransportListener: Send + Sync {
    fn frame_received(&self, frame: GeneralFrame);

    /// `None` when the link closed without a specific error
    fn connection_lost(&self, error: Option<LinkError>);
}
