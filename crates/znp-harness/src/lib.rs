//! ZNP Harness
//!
//! An in-memory stand-in for a Z-Stack coprocessor. [`MockConnector`] hands
//! out [`MockTransport`]s that record every frame the client writes and answer
//! requests from scripted responders, so dispatcher behaviour can be tested
//! without a serial port.
//!
//! Inbound frames are delivered synchronously on the caller's task and never
//! while the harness state is locked, which lets the client send from inside
//! its own listener callbacks.

extern crate alloc;

use alloc::sync::Arc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;
use tokio::sync::Notify;
use tracing::{debug, trace};
use znp_core::catalog::{self, sys};
use znp_core::{
    Command, CommandDef, CommandHeader, DeviceConfig, FieldValue, GeneralFrame, LinkError,
    Transport, TransportConnector, TransportListener,
};

/// Produces the frames the device sends back for one request
pub type Responder = Arc<dyn Fn(&Command) -> Vec<Command> + Send + Sync>;

/// Capabilities bitmap the scripted device reports to `SYS.Ping`
pub const DEFAULT_CAPABILITIES: u16 = 0x0659;

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

#[derive(Default)]
struct DeviceState {
    /// Incremented on every successful connect
    session: u64,
    listener: Option<Arc<dyn TransportListener>>,
    open: bool,
    responders: HashMap<CommandHeader, Responder>,
    sent: Vec<GeneralFrame>,
    failing_connects: usize,
    failing_sends: bool,
    connect_attempts: usize,
    closes: usize,
    devices: Vec<DeviceConfig>,
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Mock Connector
// ----------------------------------------------------------------------------

/// Scripted device and the connector that opens it
///
/// Clones share the same device.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<DeviceState>>,
    sent_signal: Arc<Notify>,
}

impl MockConnector {
    /// A device that answers `SYS.Ping` and nothing else
    pub fn new() -> Self {
        let connector = Self::silent();
        connector.respond_to(&sys::PING_REQ, |_| {
            vec![ping_response(DEFAULT_CAPABILITIES)]
        });
        connector
    }

    /// A device that never answers anything
    pub fn silent() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            sent_signal: Arc::new(Notify::new()),
        }
    }

    /// Answer every `request` with the commands `responder` returns
    pub fn respond_to<F>(&self, request: &'static CommandDef, responder: F)
    where
        F: Fn(&Command) -> Vec<Command> + Send + Sync + 'static,
    {
        lock(&self.state)
            .responders
            .insert(request.header, Arc::new(responder));
    }

    /// Stop answering `request`
    pub fn ignore(&self, request: &'static CommandDef) {
        lock(&self.state).responders.remove(&request.header);
    }

    /// Reject the next `count` connect attempts
    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.state).failing_connects = count;
    }

    /// Make every write fail until switched off again
    pub fn fail_sends(&self, failing: bool) {
        lock(&self.state).failing_sends = failing;
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    /// Successful connects so far
    pub fn sessions(&self) -> u64 {
        lock(&self.state).session
    }

    /// Times the client closed a transport
    pub fn closes(&self) -> usize {
        lock(&self.state).closes
    }

    /// Device configurations passed to `connect`, in order
    pub fn devices(&self) -> Vec<DeviceConfig> {
        lock(&self.state).devices.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Raw frames written by the client
    pub fn sent_frames(&self) -> Vec<GeneralFrame> {
        lock(&self.state).sent.clone()
    }

    /// Written frames decoded as requests; unknown frames are skipped
    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent_frames().iter().filter_map(decode_request).collect()
    }

    /// Names of the requests written so far
    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent_commands().iter().map(Command::name).collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    /// Wait until at least `count` frames have been written
    pub async fn wait_for_sent(&self, count: usize) {
        loop {
            let notified = self.sent_signal.notified();
            if lock(&self.state).sent.len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Deliver `command` to the client as if the device sent it
    ///
    /// Returns `false` when no transport is open.
    pub fn inject(&self, command: &Command) -> bool {
        match command.to_frame() {
            Ok(frame) => self.inject_frame(frame),
            Err(_) => false,
        }
    }

    /// Deliver a raw frame, which need not decode
    pub fn inject_frame(&self, frame: GeneralFrame) -> bool {
        let listener = {
            let state = lock(&self.state);
            if !state.open {
                return false;
            }
            state.listener.clone()
        };

        match listener {
            Some(listener) => {
                trace!("Injecting {}", frame);
                listener.frame_received(frame);
                true
            }
            None => false,
        }
    }

    /// Simulate the device disappearing
    ///
    /// The open transport is marked dead and its listener told once.
    pub fn drop_connection(&self, error: Option<LinkError>) -> bool {
        let listener = {
            let mut state = lock(&self.state);
            if !state.open {
                return false;
            }
            state.open = false;
            state.listener.take()
        };

        debug!("Dropping mock connection: {:?}", error);
        if let Some(listener) = listener {
            listener.connection_lost(error);
        }
        true
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        device: &DeviceConfig,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn Transport>, LinkError> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        state.devices.push(device.clone());

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(LinkError::OpenFailed {
                device: device.path.clone(),
                reason: "scripted connect failure".into(),
            });
        }

        state.session += 1;
        state.open = true;
        state.listener = Some(listener);
        debug!(session = state.session, "Opened mock device {}", device.path);

        Ok(Box::new(MockTransport {
            session: state.session,
            state: self.state.clone(),
            sent_signal: self.sent_signal.clone(),
        }))
    }
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// One session with the scripted device
pub struct MockTransport {
    session: u64,
    state: Arc<Mutex<DeviceState>>,
    sent_signal: Arc<Notify>,
}

impl MockTransport {
    fn is_current(state: &DeviceState, session: u64) -> bool {
        state.open && state.session == session
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: GeneralFrame) -> Result<(), LinkError> {
        let (listener, replies) = {
            let mut state = lock(&self.state);
            if !Self::is_current(&state, self.session) {
                return Err(LinkError::NotConnected);
            }
            if state.failing_sends {
                return Err(LinkError::WriteFailed {
                    reason: "scripted write failure".into(),
                });
            }

            state.sent.push(frame.clone());
            let responder = state.responders.get(&frame.header).cloned();
            (state.listener.clone(), responder)
        };
        self.sent_signal.notify_waiters();

        let replies = match (replies, decode_request(&frame)) {
            (Some(responder), Some(request)) => responder(&request),
            _ => Vec::new(),
        };

        if let Some(listener) = listener {
            for reply in replies {
                match reply.to_frame() {
                    Ok(frame) => listener.frame_received(frame),
                    Err(e) => debug!("Scripted reply {} does not encode: {}", reply, e),
                }
            }
        }

        Ok(())
    }

    async fn close(&self) {
        let mut state = lock(&self.state);
        if Self::is_current(&state, self.session) {
            state.open = false;
            state.listener = None;
            state.closes += 1;
        }
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn decode_request(frame: &GeneralFrame) -> Option<Command> {
    let def = catalog::lookup_outbound(frame.header)?;
    Command::decode(def, &frame.data).ok()
}

/// `SYS.Ping` response carrying `capabilities`
pub fn ping_response(capabilities: u16) -> Command {
    command(&sys::PING_RSP, [("Capabilities", FieldValue::U16(capabilities))])
}

/// Build a catalog command from known-good fields
///
/// Panics when the fields do not fit the definition; meant for test scripts.
pub fn command<'a, I>(def: &'static CommandDef, fields: I) -> Command
where
    I: IntoIterator<Item = (&'a str, FieldValue)>,
{
    match Command::new(def, fields) {
        Ok(command) => command,
        Err(e) => panic!("invalid scripted command {}: {}", def.name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use znp_core::catalog::zdo;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<GeneralFrame>>,
        losses: AtomicUsize,
    }

    impl TransportListener for Recorder {
        fn frame_received(&self, frame: GeneralFrame) {
            self.frames.lock().unwrap().push(frame);
        }

        fn connection_lost(&self, _error: Option<LinkError>) {
            self.losses.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn ping() -> GeneralFrame {
        Command::empty(&sys::PING_REQ).unwrap().to_frame().unwrap()
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        init_tracing();
        let connector = MockConnector::new();
        let recorder = Arc::new(Recorder::default());
        let transport = connector
            .connect(&DeviceConfig::new("mock://znp"), recorder.clone())
            .await
            .unwrap();

        transport.send(ping()).await.unwrap();

        assert_eq!(connector.sent_names(), vec!["SYS.Ping.Req"]);
        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames, vec![ping_response(DEFAULT_CAPABILITIES).to_frame().unwrap()]);
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        init_tracing();
        let connector = MockConnector::new();
        connector.fail_next_connects(2);
        let device = DeviceConfig::new("mock://znp");

        for _ in 0..2 {
            let result = connector.connect(&device, Arc::new(Recorder::default())).await;
            assert!(matches!(result, Err(LinkError::OpenFailed { .. })));
        }
        assert!(connector.connect(&device, Arc::new(Recorder::default())).await.is_ok());
        assert_eq!(connector.connect_attempts(), 3);
        assert_eq!(connector.sessions(), 1);
    }

    #[tokio::test]
    async fn test_drop_connection_notifies_once() {
        init_tracing();
        let connector = MockConnector::new();
        let recorder = Arc::new(Recorder::default());
        let transport = connector
            .connect(&DeviceConfig::new("mock://znp"), recorder.clone())
            .await
            .unwrap();

        assert!(connector.drop_connection(None));
        assert!(!connector.drop_connection(None));
        assert_eq!(recorder.losses.load(Ordering::SeqCst), 1);
        assert!(matches!(transport.send(ping()).await, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_stale_transport_close_is_ignored() {
        init_tracing();
        let connector = MockConnector::new();
        let device = DeviceConfig::new("mock://znp");
        let first = connector.connect(&device, Arc::new(Recorder::default())).await.unwrap();
        connector.drop_connection(None);
        let recorder = Arc::new(Recorder::default());
        let _second = connector.connect(&device, recorder.clone()).await.unwrap();

        first.close().await;
        assert!(connector.is_open());

        let state = command(&zdo::STATE_CHANGE_IND, [("State", FieldValue::U8(9))]);
        assert!(connector.inject(&state));
        assert_eq!(recorder.frames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_sent() {
        init_tracing();
        let connector = MockConnector::silent();
        let transport = connector
            .connect(&DeviceConfig::new("mock://znp"), Arc::new(Recorder::default()))
            .await
            .unwrap();

        let waiter = {
            let connector = connector.clone();
            tokio::spawn(async move { connector.wait_for_sent(2).await })
        };
        transport.send(ping()).await.unwrap();
        transport.send(ping()).await.unwrap();

        waiter.await.unwrap();
        assert_eq!(connector.sent_frames().len(), 2);
    }
}
