//! ZNP Dispatcher
//!
//! [`Znp`] owns the listener registry and the transport of the current
//! connection. It correlates requests with their responses, routes every
//! inbound frame to the listeners waiting for it and reopens the link when
//! the transport reports it lost.
//!
//! ## Generations
//!
//! Each opened transport gets a [`TransportListener`] tagged with a
//! generation number. Opening or closing bumps the generation, so frames and
//! loss reports from a superseded transport are ignored.

use core::fmt;
use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use znp_core::catalog::sys;
use znp_core::{
    Command, DeviceConfig, FieldValue, GeneralFrame, LinkError, ListenerCallback,
    ListenerRegistry, MatchSpec, ResponseFuture, StateTransitionError, Transport,
    TransportConnector, TransportListener, ZnpConfig, ZnpError, ZnpResult,
};

use crate::application::ApplicationHandler;
use crate::state::{ConnectionEvent, ConnectionState};
use crate::stats::{StatsSnapshot, ZnpStats};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Request Options
// ----------------------------------------------------------------------------

/// How [`Znp::command_with`] treats the response to a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Send without waiting for the response the request normally gets
    pub ignore_response: bool,
    /// Field values the awaited response must carry
    pub response_constraints: Vec<(&'static str, FieldValue)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget a request that has a response
    pub fn ignore_response() -> Self {
        Self {
            ignore_response: true,
            ..Self::default()
        }
    }

    /// Only accept a response whose `field` equals `value`
    pub fn with_response_constraint<V: Into<FieldValue>>(
        mut self,
        field: &'static str,
        value: V,
    ) -> Self {
        self.response_constraints.push((field, value.into()));
        self
    }
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Link {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    generation: u64,
    /// Device of the last successful connect, reused by reconnects
    device: Option<DeviceConfig>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl Link {
    fn apply(&mut self, event: ConnectionEvent) -> Result<ConnectionState, StateTransitionError> {
        let next = self.state.transition(event)?;
        debug!("Connection {} -> {} on {:?}", self.state, next, event);
        self.state = next;
        Ok(next)
    }
}

struct Inner {
    config: ZnpConfig,
    connector: Arc<dyn TransportConnector>,
    registry: Arc<ListenerRegistry>,
    link: Mutex<Link>,
    application: Mutex<Option<Arc<dyn ApplicationHandler>>>,
    stats: ZnpStats,
}

/// Request/response dispatcher for one coprocessor
///
/// Cheap to clone; clones share the connection and the registry.
#[derive(Clone)]
pub struct Znp {
    inner: Arc<Inner>,
}

impl Znp {
    pub fn new(config: ZnpConfig, connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                registry: Arc::new(ListenerRegistry::new()),
                link: Mutex::new(Link::default()),
                application: Mutex::new(None),
                stats: ZnpStats::default(),
            }),
        }
    }

    pub fn with_application(self, application: Arc<dyn ApplicationHandler>) -> Self {
        self.set_application(application);
        self
    }

    pub fn set_application(&self, application: Arc<dyn ApplicationHandler>) {
        *lock(&self.inner.application) = Some(application);
    }

    pub fn config(&self) -> &ZnpConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.link).state
    }

    pub fn is_connected(&self) -> bool {
        self.state().can_send()
    }

    /// Device recorded by the last successful connect
    pub fn device(&self) -> Option<DeviceConfig> {
        lock(&self.inner.link).device.clone()
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn application(&self) -> Option<Arc<dyn ApplicationHandler>> {
        lock(&self.inner.application).clone()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Connect to the configured device and run application startup
    pub async fn start(&self) -> ZnpResult<()> {
        self.connect().await?;

        if let Some(application) = self.application() {
            if let Err(e) = application.startup(self).await {
                error!("Application startup failed: {}", e);
                self.close().await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Connect to the configured device
    pub async fn connect(&self) -> ZnpResult<()> {
        self.connect_to(self.inner.config.device.clone()).await
    }

    /// Open `device` and check it answers a ping
    ///
    /// The device is recorded for reconnects only once the ping succeeds.
    pub async fn connect_to(&self, device: DeviceConfig) -> ZnpResult<()> {
        self.apply(ConnectionEvent::Connect)?;
        info!("Connecting to {} at {} baud", device.path, device.baudrate);

        match self.open(&device).await {
            Ok(generation) => self.finish_connect(generation, device),
            Err(e) => {
                // Fails only when close() already moved the link on
                let failed = lock(&self.inner.link).apply(ConnectionEvent::ConnectFailed);
                if let Err(closed) = failed {
                    debug!("{}", closed);
                }
                Err(e)
            }
        }
    }

    /// Tear down the transport, stop reconnecting and cancel every listener
    ///
    /// Idempotent.
    pub async fn close(&self) {
        let (previous, transport, reconnect_task) = {
            let mut link = lock(&self.inner.link);
            let previous = link.state;
            if let Err(e) = link.apply(ConnectionEvent::Close) {
                error!("{}", e);
            }
            link.generation += 1;
            (previous, link.transport.take(), link.reconnect_task.take())
        };

        if let Some(task) = reconnect_task {
            task.abort();
        }
        let cancelled = self.inner.registry.cancel_all();
        if let Some(transport) = transport {
            transport.close().await;
        }

        if previous != ConnectionState::Disconnected {
            info!(cancelled, "Closed connection");
        }
    }

    fn apply(&self, event: ConnectionEvent) -> ZnpResult<ConnectionState> {
        Ok(lock(&self.inner.link).apply(event)?)
    }

    /// Open a transport under a new generation and ping the device
    async fn open(&self, device: &DeviceConfig) -> ZnpResult<u64> {
        let generation = {
            let mut link = lock(&self.inner.link);
            link.generation += 1;
            link.generation
        };

        let listener: Arc<dyn TransportListener> = Arc::new(ZnpLink {
            inner: Arc::downgrade(&self.inner),
            generation,
        });
        let transport: Arc<dyn Transport> =
            Arc::from(self.inner.connector.connect(device, listener).await?);

        let superseded = {
            let mut link = lock(&self.inner.link);
            if link.generation == generation {
                link.transport = Some(transport.clone());
                false
            } else {
                true
            }
        };
        if superseded {
            transport.close().await;
            return Err(ZnpError::Cancelled);
        }

        let timeout = self.inner.config.connect_ping_timeout;
        let ping = Command::empty(&sys::PING_REQ)?;
        match self.command_timeout(ping, RequestOptions::new(), timeout).await {
            Ok(response) => {
                if let Some(response) = response {
                    debug!("Device answered {}", response);
                }
                Ok(generation)
            }
            Err(e) => {
                warn!("Device at {} did not answer ping: {}", device.path, e);
                self.release_transport(generation).await;
                Err(e)
            }
        }
    }

    fn finish_connect(&self, generation: u64, device: DeviceConfig) -> ZnpResult<()> {
        let mut link = lock(&self.inner.link);
        if link.generation != generation {
            // Closed while connecting
            return Err(ZnpError::Cancelled);
        }

        link.apply(ConnectionEvent::Established)?;
        link.reconnect_task = None;
        info!("Connected to {}", device.path);
        link.device = Some(device);
        Ok(())
    }

    async fn release_transport(&self, generation: u64) {
        let transport = {
            let mut link = lock(&self.inner.link);
            if link.generation == generation {
                link.transport.take()
            } else {
                None
            }
        };

        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Send `request` and wait for its response, if it has one
    pub async fn command(&self, request: Command) -> ZnpResult<Option<Command>> {
        self.command_with(request, RequestOptions::new()).await
    }

    /// Send `request`, honouring `options`
    ///
    /// Returns `None` when the request has no response or the response is
    /// ignored. The response listener is registered before the request is
    /// written and is deregistered if this future is dropped.
    pub async fn command_with(
        &self,
        request: Command,
        options: RequestOptions,
    ) -> ZnpResult<Option<Command>> {
        let def = request.def();
        if !def.is_request() {
            return Err(ZnpError::InvalidRequest { command: def.name });
        }

        let Some(response) = def.response else {
            if options.ignore_response {
                return Err(ZnpError::config_error(format!(
                    "{} has no response to ignore",
                    def.name
                )));
            }
            if !options.response_constraints.is_empty() {
                return Err(ZnpError::config_error(format!(
                    "{} has no response to constrain",
                    def.name
                )));
            }
            self.send(&request).await?;
            return Ok(None);
        };

        if options.ignore_response {
            if !options.response_constraints.is_empty() {
                return Err(ZnpError::config_error(format!(
                    "cannot constrain the ignored response to {}",
                    def.name
                )));
            }
            self.send(&request).await?;
            return Ok(None);
        }

        let spec = MatchSpec::from_constraints(response, options.response_constraints)?;
        let pending = self.inner.registry.wait_for([spec])?;
        self.send(&request).await?;
        pending.await.map(Some)
    }

    /// [`Znp::command_with`] bounded by `timeout`
    pub async fn command_timeout(
        &self,
        request: Command,
        options: RequestOptions,
        timeout: Duration,
    ) -> ZnpResult<Option<Command>> {
        tokio::time::timeout(timeout, self.command_with(request, options))
            .await
            .map_err(|_| ZnpError::timeout(timeout))?
    }

    /// Synchronous request bounded by the configured SREQ timeout
    pub async fn request(&self, request: Command) -> ZnpResult<Option<Command>> {
        let timeout = self.inner.config.sreq_timeout;
        self.command_timeout(request, RequestOptions::new(), timeout).await
    }

    /// Send `request` and wait for the asynchronous `callback` it triggers
    ///
    /// The callback wait is registered before the request is written, so a
    /// callback arriving right behind the synchronous response is not missed.
    /// `timeout` bounds the callback wait and defaults to the configured
    /// ARSP timeout.
    pub async fn request_callback_rsp(
        &self,
        request: Command,
        options: RequestOptions,
        callback: MatchSpec,
        timeout: Option<Duration>,
    ) -> ZnpResult<Command> {
        let pending = self.wait_for_response(callback)?;

        let sreq_timeout = self.inner.config.sreq_timeout;
        if let Some(response) = self.command_timeout(request, options, sreq_timeout).await? {
            trace!("Awaiting callback after {}", response);
        }

        let timeout = timeout.unwrap_or(self.inner.config.arsp_timeout);
        tokio::time::timeout(timeout, pending)
            .await
            .map_err(|_| ZnpError::timeout(timeout))?
    }

    async fn send(&self, command: &Command) -> ZnpResult<()> {
        let transport = lock(&self.inner.link)
            .transport
            .clone()
            .ok_or(LinkError::NotConnected)?;

        let frame = command.to_frame()?;
        debug!("Sending {}", command);
        transport.send(frame).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    /// Wait once for a command matching `spec`, without sending anything
    pub fn wait_for_response<S: Into<MatchSpec>>(&self, spec: S) -> ZnpResult<ResponseFuture> {
        self.wait_for_responses([spec.into()])
    }

    /// Wait once for the first command matching any of `specs`
    pub fn wait_for_responses<I>(&self, specs: I) -> ZnpResult<ResponseFuture>
    where
        I: IntoIterator<Item = MatchSpec>,
    {
        self.inner.registry.wait_for(specs)
    }

    /// Run `callback` on every command matching `spec`
    ///
    /// The subscription lasts until the connection is lost or closed.
    pub fn callback_for_response<S, F>(&self, spec: S, callback: F) -> ZnpResult<()>
    where
        S: Into<MatchSpec>,
        F: Fn(&Command) + Send + Sync + 'static,
    {
        self.callback_for_responses([spec.into()], ListenerCallback::sync(callback))
    }

    /// Run `callback` on every command matching any of `specs`
    pub fn callback_for_responses<I>(&self, specs: I, callback: ListenerCallback) -> ZnpResult<()>
    where
        I: IntoIterator<Item = MatchSpec>,
    {
        self.inner.registry.subscribe(specs, callback)
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Decode `frame` and resolve every listener it matches
    ///
    /// Frames that do not decode are logged and dropped.
    pub fn frame_received(&self, frame: GeneralFrame) {
        self.inner.stats.record_frame();

        let command = match Command::from_frame(&frame) {
            Ok(command) => command,
            Err(e) => {
                error!("Failed to decode {}: {}", frame, e);
                self.inner.stats.record_decode_error();
                return;
            }
        };

        trace!("Received {}", command);
        let resolved = self.inner.registry.dispatch(&command);
        self.inner.stats.record_dispatch(resolved);
    }

    /// Handle loss of the current transport
    pub fn connection_lost(&self, error: Option<LinkError>) {
        let generation = lock(&self.inner.link).generation;
        self.link_lost(generation, error);
    }

    /// Loss of a link still being set up cancels every pending wait, so the
    /// ping or startup blocked on it fails and its attempt ends. Only loss of
    /// an operational link notifies the application and may start a
    /// reconnect loop.
    fn link_lost(&self, generation: u64, error: Option<LinkError>) {
        let (operational, reconnect) = {
            let mut link = lock(&self.inner.link);
            if link.generation != generation {
                debug!("Ignoring loss of a superseded transport");
                return;
            }
            if link.transport.take().is_none() {
                debug!("Link already released while {}", link.state);
                return;
            }

            if link.state == ConnectionState::Connected {
                let reconnect = self.inner.config.auto_reconnect && link.device.is_some();
                if let Err(e) = link.apply(ConnectionEvent::ConnectionLost { reconnect }) {
                    error!("{}", e);
                    return;
                }
                (true, reconnect)
            } else {
                (false, false)
            }
        };

        self.inner.stats.record_connection_lost();
        match (&error, operational) {
            (Some(e), true) => warn!("Connection lost: {}", e),
            (None, true) => warn!("Connection lost"),
            (Some(e), false) => warn!("Connection lost while connecting: {}", e),
            (None, false) => warn!("Connection lost while connecting"),
        }

        let cancelled = self.inner.registry.cancel_all();
        debug!(cancelled, "Cancelled pending waits");

        if !operational {
            return;
        }
        if let Some(application) = self.application() {
            application.connection_lost(error.as_ref());
        }
        if reconnect {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(&self) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!("No runtime to reconnect on, giving up");
                if let Err(e) = lock(&self.inner.link).apply(ConnectionEvent::Close) {
                    error!("{}", e);
                }
                return;
            }
        };

        self.inner.stats.record_reconnect_started();
        let task = handle.spawn(reconnect_loop(Arc::downgrade(&self.inner)));

        let mut link = lock(&self.inner.link);
        if link.state == ConnectionState::Reconnecting {
            link.reconnect_task = Some(task);
        }
    }

    async fn reconnect_once(&self, device: DeviceConfig) -> ZnpResult<()> {
        let generation = self.open(&device).await?;

        if let Some(application) = self.application() {
            if let Err(e) = application.startup(self).await {
                self.release_transport(generation).await;
                self.inner.registry.cancel_all();
                return Err(e);
            }
        }

        self.finish_connect(generation, device)
    }
}

impl fmt::Debug for Znp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Znp")
            .field("state", &self.state())
            .field("device", &self.device())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Retry until the link is back or the dispatcher leaves `Reconnecting`
async fn reconnect_loop(weak: Weak<Inner>) {
    let mut attempt: u32 = 0;

    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let znp = Znp { inner };

        let device = {
            let link = lock(&znp.inner.link);
            if link.state != ConnectionState::Reconnecting {
                return;
            }
            link.device.clone()
        };
        let Some(device) = device else {
            return;
        };

        attempt += 1;
        znp.inner.stats.record_reconnect_attempt();
        info!(attempt, "Reconnecting to {}", device.path);

        match znp.reconnect_once(device).await {
            Ok(()) => {
                info!(attempt, "Reconnected");
                return;
            }
            Err(e) => {
                warn!(attempt, "Failed to reconnect: {}", e);
                if lock(&znp.inner.link).apply(ConnectionEvent::ConnectFailed).is_err() {
                    // Closed during the attempt
                    return;
                }
            }
        }

        let delay = znp.inner.config.auto_reconnect_retry_delay;
        drop(znp);
        tokio::time::sleep(delay).await;
    }
}

// ----------------------------------------------------------------------------
// Transport Listener
// ----------------------------------------------------------------------------

/// Listener handed to one transport generation
struct ZnpLink {
    inner: Weak<Inner>,
    generation: u64,
}

impl ZnpLink {
    fn znp(&self) -> Option<Znp> {
        self.inner.upgrade().map(|inner| Znp { inner })
    }
}

impl TransportListener for ZnpLink {
    fn frame_received(&self, frame: GeneralFrame) {
        let Some(znp) = self.znp() else {
            return;
        };

        if lock(&znp.inner.link).generation != self.generation {
            trace!("Dropping frame from a superseded transport");
            return;
        }
        znp.frame_received(frame);
    }

    fn connection_lost(&self, error: Option<LinkError>) {
        if let Some(znp) = self.znp() {
            znp.link_lost(self.generation, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use znp_core::catalog::{af, util, zdo};
    use znp_harness::{command, MockConnector};

    fn znp() -> Znp {
        Znp::new(ZnpConfig::testing(), Arc::new(MockConnector::new()))
    }

    fn led_control() -> Command {
        command(
            &util::LED_CONTROL,
            [("LED", FieldValue::U8(1)), ("Mode", FieldValue::U8(1))],
        )
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new().with_response_constraint("Status", 0u8);
        assert!(!options.ignore_response);
        assert_eq!(options.response_constraints, vec![("Status", FieldValue::U8(0))]);
        assert!(RequestOptions::ignore_response().ignore_response);
    }

    #[tokio::test]
    async fn test_non_request_is_rejected_before_sending() {
        let znp = znp();
        let response = command(&sys::PING_RSP, [("Capabilities", FieldValue::U16(1))]);

        let result = znp.command(response).await;
        assert!(matches!(result, Err(ZnpError::InvalidRequest { command: "SYS.Ping.Rsp" })));
    }

    #[tokio::test]
    async fn test_constraints_on_responseless_request_are_rejected() {
        let znp = znp();
        let reset = command(&sys::RESET_REQ, [("Type", FieldValue::U8(1))]);
        let options = RequestOptions::new().with_response_constraint("Status", 0u8);

        let result = znp.command_with(reset, options).await;
        assert!(matches!(result, Err(ZnpError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_ignoring_a_missing_response_is_rejected() {
        let znp = znp();
        let reset = command(&sys::RESET_REQ, [("Type", FieldValue::U8(1))]);

        let result = znp.command_with(reset, RequestOptions::ignore_response()).await;
        assert!(matches!(result, Err(ZnpError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_unknown_response_constraint_is_rejected() {
        let znp = znp();
        let options = RequestOptions::new().with_response_constraint("Bogus", 0u8);

        let result = znp.command_with(led_control(), options).await;
        assert!(matches!(result, Err(ZnpError::Command(_))));
        assert!(znp.registry().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_transport_leaves_no_listener() {
        let znp = znp();

        let result = znp.command(led_control()).await;
        assert!(matches!(result, Err(ZnpError::Link(LinkError::NotConnected))));
        assert!(znp.registry().is_empty());
    }

    #[test]
    fn test_waiting_on_a_request_is_rejected() {
        let znp = znp();
        assert!(matches!(
            znp.wait_for_response(&af::DATA_REQUEST),
            Err(ZnpError::InvalidListenerTarget { .. })
        ));
        assert!(matches!(
            znp.callback_for_response(&zdo::STARTUP_FROM_APP, |_| {}),
            Err(ZnpError::InvalidListenerTarget { .. })
        ));
    }

    #[test]
    fn test_undecodable_frame_is_dropped() {
        let znp = znp();
        let mut frame = command(&zdo::STATE_CHANGE_IND, [("State", FieldValue::U8(9))])
            .to_frame()
            .unwrap();
        frame.data.clear();

        znp.frame_received(frame);

        let stats = znp.stats();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.frames_unmatched, 0);
    }

    #[test]
    fn test_connection_lost_while_disconnected_is_ignored() {
        let znp = znp();
        znp.connection_lost(None);

        assert_eq!(znp.state(), ConnectionState::Disconnected);
        assert_eq!(znp.stats().connections_lost, 0);
    }
}
