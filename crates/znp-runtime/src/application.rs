//! Application hook
//!
//! The dispatcher only restores the link. Whatever the application set up on
//! the device, and every callback listener it registered, is gone after a
//! reconnect, so the reconnect loop hands control back through
//! [`ApplicationHandler::startup`] before reporting the link as connected.

use async_trait::async_trait;
use znp_core::{LinkError, ZnpResult};

use crate::znp::Znp;

/// Application logic layered on top of the dispatcher
#[async_trait]
pub trait ApplicationHandler: Send + Sync {
    /// Bring the device into the state the application needs
    ///
    /// Runs after [`Znp::start`] connects and again after every successful
    /// reconnect. An error fails that connect or reconnect attempt.
    async fn startup(&self, znp: &Znp) -> ZnpResult<()>;

    /// Called once per lost link, after pending waits were cancelled
    fn connection_lost(&self, _error: Option<&LinkError>) {}
}
