//! Listener registry
//!
//! Maps each command header to the listeners interested in it, in
//! registration order. Every operation takes the table lock, mutates and
//! releases it without yielding; listener code runs on a snapshot taken
//! outside the lock so a callback may register new listeners.

use alloc::sync::{Arc, Weak};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Mutex;

use hashbrown::{HashMap, HashSet};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::command::{Command, MatchSpec};
use crate::errors::{ZnpError, ZnpResult};
use crate::listener::{lock, ListenerCallback, ListenerId, ResponseListener};
use crate::types::CommandHeader;

type ListenerTable = HashMap<CommandHeader, Vec<Arc<ResponseListener>>>;

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Header-indexed table of active listeners
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    table: Mutex<ListenerTable>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `listener` under every header it matches
    pub fn register(&self, listener: Arc<ResponseListener>) {
        let mut table = lock(&self.table);
        for header in listener.matching_headers() {
            table.entry(*header).or_default().push(listener.clone());
        }
        debug!(listener = listener.id(), "Registered {:?}", listener.matching_headers());
    }

    /// Drop `listener` from every header list, pruning emptied headers
    pub fn remove(&self, listener: &ResponseListener) -> bool {
        let mut table = lock(&self.table);
        let mut removed = false;

        for header in listener.matching_headers() {
            let Some(listeners) = table.get_mut(header) else {
                continue;
            };
            let before = listeners.len();
            listeners.retain(|other| other.id() != listener.id());
            removed |= listeners.len() != before;

            if listeners.is_empty() {
                table.remove(header);
            }
        }

        removed
    }

    /// Resolve every listener registered for the command's header
    ///
    /// Returns how many listeners took the command. Commands nobody waits for
    /// are logged and otherwise ignored.
    pub fn dispatch(&self, command: &Command) -> usize {
        let snapshot = lock(&self.table).get(&command.header()).cloned();
        let Some(listeners) = snapshot else {
            warn!("Received an unsolicited and unhandled command: {}", command);
            return 0;
        };

        let mut resolved = 0;
        for listener in listeners {
            if listener.resolve(command) {
                resolved += 1;
            }
            if listener.is_one_shot() && listener.is_done() {
                self.remove(&listener);
            }
        }

        resolved
    }

    /// Cancel and forget every listener, returning how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let table = core::mem::take(&mut *lock(&self.table));

        let mut seen: HashSet<ListenerId> = HashSet::new();
        let mut cancelled = 0;
        for listener in table.values().flatten() {
            if seen.insert(listener.id()) && listener.cancel() {
                cancelled += 1;
            }
        }

        debug!(listeners = seen.len(), cancelled, "Cancelled all listeners");
        cancelled
    }

    /// Register a one-shot listener and return the future it resolves
    pub fn wait_for<I>(self: &Arc<Self>, specs: I) -> ZnpResult<ResponseFuture>
    where
        I: IntoIterator<Item = MatchSpec>,
    {
        let (listener, receiver) = ResponseListener::one_shot(specs)?;
        let listener = Arc::new(listener);
        self.register(listener.clone());

        Ok(ResponseFuture {
            receiver,
            listener,
            registry: Arc::downgrade(self),
        })
    }

    /// Register a persistent callback listener
    pub fn subscribe<I>(&self, specs: I, callback: ListenerCallback) -> ZnpResult<()>
    where
        I: IntoIterator<Item = MatchSpec>,
    {
        let listener = ResponseListener::callback(specs, callback)?;
        self.register(Arc::new(listener));
        Ok(())
    }

    /// Number of headers with at least one listener
    pub fn header_count(&self) -> usize {
        lock(&self.table).len()
    }

    /// Number of listeners registered under `header`
    pub fn listener_count(&self, header: CommandHeader) -> usize {
        lock(&self.table).get(&header).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.table).is_empty()
    }
}

// ----------------------------------------------------------------------------
// Response Future
// ----------------------------------------------------------------------------

/// Pending one-shot wait
///
/// Resolves with the matching command, or `ZnpError::Cancelled` when the
/// listener is cancelled. Dropping it before completion deregisters the
/// listener from every header it was indexed under.
#[derive(Debug)]
pub struct ResponseFuture {
    receiver: oneshot::Receiver<Command>,
    listener: Arc<ResponseListener>,
    registry: Weak<ListenerRegistry>,
}

impl ResponseFuture {
    pub fn listener(&self) -> &ResponseListener {
        &self.listener
    }
}

impl Future for ResponseFuture {
    type Output = ZnpResult<Command>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| ZnpError::Cancelled))
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.listener);
        }
    }
}
