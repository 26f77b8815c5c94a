//! Response listeners
//!
//! A [`ResponseListener`] owns a de-duplicated set of [`MatchSpec`]s and
//! reacts to matching commands in one of two ways:
//!
//! - **one-shot**: completes a single-assignment channel with the first
//!   matching command, then is done
//! - **callback**: invokes a subscriber callback on every matching command
//!   until the registry drops it
//!
//! Listeners never run user code while the registry table is locked; the
//! registry snapshots a header's listeners before resolving them.

use alloc::sync::Arc;
use core::fmt;
use core::future::Future;
use core::sync::atomic::{AtomicU64, Ordering};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use smallvec::SmallVec;
use tokio::sync::oneshot;
use tracing::{error, trace, warn};

use crate::command::{Command, MatchSpec};
use crate::dedup::deduplicate;
use crate::errors::{ZnpError, ZnpResult};
use crate::types::CommandHeader;

/// Process-unique listener identifier
pub type ListenerId = u64;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Callbacks
// ----------------------------------------------------------------------------

pub type SyncCallback = Arc<dyn Fn(&Command) + Send + Sync>;
pub type AsyncCallback = Arc<dyn Fn(Command) -> BoxFuture<'static, ()> + Send + Sync>;

/// Subscriber code attached to a callback listener
#[derive(Clone)]
pub enum ListenerCallback {
    /// Runs inline on the dispatch path; panics are caught and logged
    Sync(SyncCallback),
    /// Produces a future that is spawned as its own task
    Async(AsyncCallback),
}

impl ListenerCallback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Command) + Send + Sync + 'static,
    {
        ListenerCallback::Sync(Arc::new(f))
    }

    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ListenerCallback::Async(Arc::new(move |command| f(command).boxed()))
    }
}

impl fmt::Debug for ListenerCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerCallback::Sync(_) => f.write_str("ListenerCallback::Sync"),
            ListenerCallback::Async(_) => f.write_str("ListenerCallback::Async"),
        }
    }
}

// ----------------------------------------------------------------------------
// Response Listener
// ----------------------------------------------------------------------------

enum ListenerKind {
    OneShot(Mutex<Option<oneshot::Sender<Command>>>),
    Callback(ListenerCallback),
}

/// A registered interest in one or more response or callback shapes
pub struct ResponseListener {
    id: ListenerId,
    specs: Vec<MatchSpec>,
    headers: SmallVec<[CommandHeader; 2]>,
    kind: ListenerKind,
}

impl ResponseListener {
    /// Listener resolved by the first matching command
    pub fn one_shot<I>(specs: I) -> ZnpResult<(Self, oneshot::Receiver<Command>)>
    where
        I: IntoIterator<Item = MatchSpec>,
    {
        let (sender, receiver) = oneshot::channel();
        let listener = Self::build(specs, ListenerKind::OneShot(Mutex::new(Some(sender))))?;
        Ok((listener, receiver))
    }

    /// Persistent listener invoking `callback` on every matching command
    pub fn callback<I>(specs: I, callback: ListenerCallback) -> ZnpResult<Self>
    where
        I: IntoIterator<Item = MatchSpec>,
    {
        Self::build(specs, ListenerKind::Callback(callback))
    }

    fn build<I>(specs: I, kind: ListenerKind) -> ZnpResult<Self>
    where
        I: IntoIterator<Item = MatchSpec>,
    {
        let specs = deduplicate(specs)?;

        if let Some(request) = specs.iter().find(|spec| !spec.class().is_listenable()) {
            return Err(ZnpError::InvalidListenerTarget {
                command: request.def().name,
            });
        }

        let mut headers: SmallVec<[CommandHeader; 2]> = SmallVec::new();
        for spec in &specs {
            if !headers.contains(&spec.header()) {
                headers.push(spec.header());
            }
        }

        Ok(Self {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            specs,
            headers,
            kind,
        })
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The de-duplicated specs this listener was built from
    pub fn specs(&self) -> &[MatchSpec] {
        &self.specs
    }

    /// Distinct headers the registry indexes this listener under
    pub fn matching_headers(&self) -> &[CommandHeader] {
        &self.headers
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self.kind, ListenerKind::OneShot(_))
    }

    /// One-shot listeners are done once resolved, cancelled or abandoned
    pub fn is_done(&self) -> bool {
        match &self.kind {
            ListenerKind::OneShot(slot) => lock(slot)
                .as_ref()
                .map_or(true, oneshot::Sender::is_closed),
            ListenerKind::Callback(_) => false,
        }
    }

    /// Whether any spec accepts `command`
    pub fn matches(&self, command: &Command) -> bool {
        self.specs.iter().any(|spec| spec.matches(command))
    }

    /// Deliver `command`, returning whether resolution took effect
    pub fn resolve(&self, command: &Command) -> bool {
        if !self.matches(command) {
            return false;
        }

        match &self.kind {
            ListenerKind::OneShot(slot) => {
                // A second match in the same pass, or a cancelled waiter, is a no-op
                let Some(sender) = lock(slot).take() else {
                    return false;
                };
                let delivered = sender.send(command.clone()).is_ok();
                trace!(listener = self.id, delivered, "Resolved one-shot listener with {}", command);
                delivered
            }
            ListenerKind::Callback(callback) => {
                self.invoke(callback, command);
                true
            }
        }
    }

    fn invoke(&self, callback: &ListenerCallback, command: &Command) {
        match callback {
            ListenerCallback::Sync(f) => {
                if catch_unwind(AssertUnwindSafe(|| f(command))).is_err() {
                    error!(listener = self.id, "Callback panicked while handling {}", command);
                }
            }
            ListenerCallback::Async(f) => {
                let future = match catch_unwind(AssertUnwindSafe(|| f(command.clone()))) {
                    Ok(future) => future,
                    Err(_) => {
                        error!(listener = self.id, "Callback panicked while handling {}", command);
                        return;
                    }
                };

                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(future);
                    }
                    Err(_) => {
                        warn!(listener = self.id, "No runtime to spawn callback for {}", command);
                    }
                }
            }
        }
    }

    /// Cancel a pending one-shot wait; callbacks cannot be cancelled this way
    pub fn cancel(&self) -> bool {
        match &self.kind {
            ListenerKind::OneShot(slot) => {
                // Dropping the sender wakes the waiter with a cancellation
                lock(slot).take();
                true
            }
            ListenerKind::Callback(_) => false,
        }
    }
}

impl fmt::Debug for ResponseListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ListenerKind::OneShot(_) => "OneShot",
            ListenerKind::Callback(_) => "Callback",
        };
        f.debug_struct("ResponseListener")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("specs", &self.specs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{af, sys, zdo};
    use crate::schema::FieldValue;
    use std::sync::atomic::AtomicUsize;

    fn state_change(state: u8) -> Command {
        Command::new(&zdo::STATE_CHANGE_IND, [("State", FieldValue::U8(state))]).unwrap()
    }

    fn data_confirm() -> Command {
        Command::new(
            &af::DATA_CONFIRM,
            [
                ("Status", FieldValue::U8(0)),
                ("Endpoint", FieldValue::U8(1)),
                ("TSN", FieldValue::U8(1)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_request_target_rejected() {
        let result = ResponseListener::one_shot([MatchSpec::any(&sys::PING_REQ)]);
        assert!(matches!(
            result,
            Err(ZnpError::InvalidListenerTarget {
                command: "SYS.Ping.Req"
            })
        ));
    }

    #[test]
    fn test_empty_specs_rejected() {
        let result = ResponseListener::callback(Vec::new(), ListenerCallback::sync(|_| {}));
        assert!(matches!(result, Err(ZnpError::Configuration { .. })));
    }

    #[test]
    fn test_matching_headers_are_distinct() {
        let (listener, _rx) = ResponseListener::one_shot([
            MatchSpec::any(&zdo::STATE_CHANGE_IND).with("State", 9u8).unwrap(),
            MatchSpec::any(&af::DATA_CONFIRM),
            MatchSpec::any(&zdo::STATE_CHANGE_IND).with("State", 8u8).unwrap(),
        ])
        .unwrap();

        assert_eq!(
            listener.matching_headers(),
            &[zdo::STATE_CHANGE_IND.header, af::DATA_CONFIRM.header]
        );
        assert_eq!(listener.specs().len(), 3);
    }

    #[test]
    fn test_one_shot_resolves_once() {
        let (listener, mut rx) = ResponseListener::one_shot([
            MatchSpec::any(&zdo::STATE_CHANGE_IND),
            MatchSpec::any(&zdo::STATE_CHANGE_IND).with("State", 9u8).unwrap(),
        ])
        .unwrap();

        assert!(!listener.resolve(&data_confirm()));
        assert!(listener.resolve(&state_change(9)));
        assert!(!listener.resolve(&state_change(9)));
        assert!(listener.is_done());
        assert_eq!(rx.try_recv().unwrap(), state_change(9));
    }

    #[test]
    fn test_one_shot_cancel() {
        let (listener, mut rx) =
            ResponseListener::one_shot([MatchSpec::any(&zdo::STATE_CHANGE_IND)]).unwrap();

        assert!(listener.cancel());
        assert!(listener.is_done());
        assert!(rx.try_recv().is_err());
        assert!(!listener.resolve(&state_change(1)));
    }

    #[test]
    fn test_resolve_after_receiver_dropped_is_silent() {
        let (listener, rx) =
            ResponseListener::one_shot([MatchSpec::any(&zdo::STATE_CHANGE_IND)]).unwrap();
        drop(rx);

        assert!(listener.is_done());
        assert!(!listener.resolve(&state_change(1)));
    }

    #[test]
    fn test_callback_fires_every_time_and_survives_panics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener = ResponseListener::callback(
            [MatchSpec::any(&zdo::STATE_CHANGE_IND)],
            ListenerCallback::sync(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first invocation fails");
                }
            }),
        )
        .unwrap();

        assert!(listener.resolve(&state_change(1)));
        assert!(listener.resolve(&state_change(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!listener.cancel());
        assert!(!listener.is_done());
    }

    #[tokio::test]
    async fn test_async_callback_is_spawned() {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let listener = ResponseListener::callback(
            [MatchSpec::any(&zdo::STATE_CHANGE_IND)],
            ListenerCallback::spawn(move |command| {
                let tx = lock(&tx).take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(command);
                    }
                }
            }),
        )
        .unwrap();

        assert!(listener.resolve(&state_change(3)));
        assert_eq!(rx.await.unwrap(), state_change(3));
    }
}
