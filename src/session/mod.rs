//! Device sessions.
//!
//! A [`DeviceSession`] owns one transport and supervises the link to one
//! controller:
//!
//! ```text
//! Disconnected -> Connecting -> Identifying -> TimeSyncing -> Ready
//!       ^                                                      |
//!       +------------------ disconnect / link failure ---------+
//! ```
//!
//! While `Ready`, three tasks run against the link: the read loop (bytes to
//! lines), the router (lines to status and events) and the dispatcher
//! (queued commands to the wire). Any transport failure tears all of them
//! down and resets the status. Sessions never reconnect on their own.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dispatch::{CommandQueue, DEFAULT_REQUEST_TIMEOUT, Dispatcher};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, Subscription};
use crate::protocol::{Command, ResponseTag, parse_identity, parse_rtc_time};
use crate::router::Router;
use crate::scheduler::Actuator;
use crate::status::StatusStore;
use crate::transport::{LineReader, SerialConfig, SerialTransport, Transport};
use crate::types::{
    DeviceIdentity, DeviceKind, DeviceStatus, PumpRegistration, SamplerDirection,
};

/// Default bound on the identification and time-sync replies.
pub const DEFAULT_IDENTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on the safe-state command sent before closing.
pub const DEFAULT_SAFE_STATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No link.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Waiting for the identification banner.
    Identifying,
    /// Waiting for the RTC sync acknowledgement.
    TimeSyncing,
    /// Identified, synced and queried; commands are accepted.
    Ready,
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on the identification and time-sync replies.
    pub identify_timeout: Duration,
    /// Bound on every request/await command.
    pub request_timeout: Duration,
    /// Bound on the safe-state command sent by `disconnect`.
    pub safe_state_timeout: Duration,
    /// Periodic RTC query while ready. `None` disables polling.
    pub rtc_poll_interval: Option<Duration>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identify_timeout: DEFAULT_IDENTIFY_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            safe_state_timeout: DEFAULT_SAFE_STATE_TIMEOUT,
            rtc_poll_interval: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identification timeout.
    #[must_use]
    pub const fn identify_timeout(mut self, timeout: Duration) -> Self {
        self.identify_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the safe-state timeout.
    #[must_use]
    pub const fn safe_state_timeout(mut self, timeout: Duration) -> Self {
        self.safe_state_timeout = timeout;
        self
    }

    /// Enables periodic RTC polling.
    #[must_use]
    pub const fn rtc_poll_interval(mut self, interval: Duration) -> Self {
        self.rtc_poll_interval = Some(interval);
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Background tasks of one established link.
struct Link {
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
}

struct SessionInner<T> {
    kind: DeviceKind,
    port: String,
    config: SessionConfig,
    transport: Arc<Mutex<T>>,
    status: StatusStore,
    events: EventDispatcher,
    state: watch::Sender<SessionState>,
    queue: watch::Sender<Option<CommandQueue>>,
    link: Mutex<Option<Link>>,
    lifecycle: Mutex<()>,
    generation: AtomicU64,
}

/// Session with one pump controller or autosampler.
pub struct DeviceSession<T> {
    inner: Arc<SessionInner<T>>,
}

impl<T> Clone for DeviceSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl DeviceSession<SerialTransport> {
    /// Creates a session for a pump controller on a serial port.
    #[must_use]
    pub fn pump(port: impl Into<String>) -> Self {
        Self::serial(DeviceKind::Pump, port)
    }

    /// Creates a session for an autosampler on a serial port.
    #[must_use]
    pub fn autosampler(port: impl Into<String>) -> Self {
        Self::serial(DeviceKind::Autosampler, port)
    }

    /// Creates a session on a serial port with default settings.
    #[must_use]
    pub fn serial(kind: DeviceKind, port: impl Into<String>) -> Self {
        Self::with_serial_config(kind, SerialConfig::new(port), SessionConfig::default())
    }

    /// Creates a session with custom serial and session configuration.
    #[must_use]
    pub fn with_serial_config(kind: DeviceKind, serial: SerialConfig, config: SessionConfig) -> Self {
        Self::new(kind, SerialTransport::new(serial), config)
    }
}

impl<T: Transport + 'static> DeviceSession<T> {
    /// Creates a session over any transport. The session starts disconnected.
    #[must_use]
    pub fn new(kind: DeviceKind, transport: T, config: SessionConfig) -> Self {
        let port = transport.port_name().to_string();
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (queue, _) = watch::channel(None);

        let inner = SessionInner {
            kind,
            status: StatusStore::new(kind, port.clone()),
            events: EventDispatcher::new(config.event_capacity),
            port,
            config,
            transport: Arc::new(Mutex::new(transport)),
            state,
            queue,
            link: Mutex::new(None),
            lifecycle: Mutex::new(()),
            generation: AtomicU64::new(0),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Connects, identifies and synchronises the controller.
    ///
    /// This will:
    /// 1. Close any existing link (sending the safe-state command)
    /// 2. Open the transport and send the identification ping
    /// 3. Check the banner for the expected identity marker
    /// 4. Sync the controller RTC to host local time
    /// 5. Start the background tasks and query RTC, configuration and status
    ///
    /// # Errors
    ///
    /// `DeviceMismatch` when another device answers, a transport error when
    /// the link fails, `Timeout` when the device stays silent. On error the
    /// transport is closed again.
    pub async fn connect(&self) -> Result<DeviceIdentity> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.inner.link.lock().await.is_some() {
            tracing::info!("{} on {} already connected, reconnecting", self.inner.kind, self.inner.port);
            self.inner.teardown(true).await;
        }

        match SessionInner::establish(&self.inner).await {
            Ok(identity) => Ok(identity),
            Err(e) => {
                tracing::warn!("failed to connect {} on {}: {}", self.inner.kind, self.inner.port, e);
                self.inner.teardown(false).await;
                Err(e)
            }
        }
    }

    /// Disconnects from the controller.
    ///
    /// Sends the safe-state command first if the session is connected, then
    /// drops queued commands, closes the transport and resets the status.
    /// Disconnecting a disconnected session is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.teardown(true).await;
        Ok(())
    }

    /// Returns the controller kind.
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.inner.kind
    }

    /// Returns the port name.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.inner.port
    }

    /// Returns a snapshot of the status.
    pub async fn status(&self) -> DeviceStatus {
        self.inner.status.snapshot().await
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watches lifecycle state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Returns true once the session is ready for commands.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Subscribes to line and lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    fn ready_queue(&self) -> Result<CommandQueue> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner.queue.borrow().clone().ok_or(Error::NotConnected)
    }

    fn require_kind(&self, kind: DeviceKind, operation: &str) -> Result<()> {
        if self.inner.kind == kind {
            Ok(())
        } else {
            Err(Error::InvalidArgument {
                reason: format!(
                    "{operation} needs a {kind}, this session drives a {}",
                    self.inner.kind
                ),
            })
        }
    }

    // ==================== Generic Commands ====================

    /// Queues a command without waiting for its reply.
    pub fn issue_command(&self, command: Command) -> Result<()> {
        self.ready_queue()?.enqueue(command)
    }

    /// Sends a command and waits for the line carrying its keyword.
    pub async fn request(&self, command: Command) -> Result<String> {
        self.ready_queue()?.request(command).await
    }

    /// Queries and returns the controller RTC time.
    pub async fn query_rtc_time(&self) -> Result<NaiveDateTime> {
        let reply = self.request(self.inner.kind.rtc_query()).await?;
        Ok(parse_rtc_time(&reply)?)
    }

    /// Re-reads the full configuration into the status.
    pub async fn query_configuration(&self) -> Result<()> {
        self.request(self.inner.kind.configuration_query()).await?;
        Ok(())
    }

    /// Re-reads the actuator state into the status.
    pub async fn query_status(&self) -> Result<()> {
        self.request(self.inner.kind.status_query()).await?;
        Ok(())
    }

    // ==================== Pump Controller ====================

    /// Toggles the power of a pump.
    pub async fn toggle_power(&self, pump: u32) -> Result<()> {
        self.require_kind(DeviceKind::Pump, "toggle_power")?;
        self.request(Command::toggle_power(pump)).await?;
        Ok(())
    }

    /// Toggles the valve direction of a pump.
    pub async fn toggle_direction(&self, pump: u32) -> Result<()> {
        self.require_kind(DeviceKind::Pump, "toggle_direction")?;
        self.request(Command::toggle_direction(pump)).await?;
        Ok(())
    }

    /// Registers a pump.
    ///
    /// The new pump is merged into the status right away; the full
    /// configuration is then re-queried.
    pub async fn register_pump(&self, registration: PumpRegistration) -> Result<()> {
        self.require_kind(DeviceKind::Pump, "register_pump")?;
        if registration.id == 0 {
            return Err(Error::InvalidArgument {
                reason: "pump id 0 addresses the whole controller".into(),
            });
        }
        self.request(Command::register_pump(&registration)).await?;
        self.inner
            .status
            .merge_pump(registration.id, registration.to_info())
            .await;
        tracing::info!("pump {} registered", registration.id);
        self.query_configuration().await
    }

    /// Removes a pump; id 0 removes every pump.
    pub async fn remove_pump(&self, pump: u32) -> Result<()> {
        self.require_kind(DeviceKind::Pump, "remove_pump")?;
        self.request(Command::remove_pump(pump)).await?;
        self.query_configuration().await
    }

    /// Persists the configuration of a pump; id 0 saves all.
    pub async fn save_config(&self, pump: u32) -> Result<()> {
        self.require_kind(DeviceKind::Pump, "save_config")?;
        self.request(Command::save_config(pump)).await?;
        Ok(())
    }

    /// Switches every pump off.
    pub async fn shutdown(&self) -> Result<()> {
        self.require_kind(DeviceKind::Pump, "shutdown")?;
        self.request(Command::shutdown()).await?;
        Ok(())
    }

    /// Resets the controller and closes the session.
    ///
    /// No safe-state command is sent: the controller is restarting.
    pub async fn reset(&self) -> Result<()> {
        self.require_kind(DeviceKind::Pump, "reset")?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        let queue = self.ready_queue()?;

        let result = queue.request(Command::reset()).await.map(drop);
        self.inner.teardown(false).await;
        result
    }

    // ==================== Autosampler ====================

    /// Moves the carriage to an absolute position.
    pub fn goto_position(&self, position: i64) -> Result<()> {
        self.require_kind(DeviceKind::Autosampler, "goto_position")?;
        if position < 0 {
            return Err(Error::InvalidArgument {
                reason: format!("position {position} is negative"),
            });
        }
        self.issue_command(Command::goto_position(position))
    }

    /// Moves the carriage to a configured slot.
    pub async fn goto_slot(&self, slot: &str) -> Result<()> {
        self.require_kind(DeviceKind::Autosampler, "goto_slot")?;
        let known = self
            .inner
            .status
            .read(|s| s.slot_positions.contains_key(slot))
            .await;
        if !known {
            return Err(Error::InvalidArgument {
                reason: format!("unknown slot `{slot}`"),
            });
        }
        self.issue_command(Command::goto_slot(slot))
    }

    /// Adds or moves a slot, then re-reads the configuration.
    pub async fn add_slot(&self, slot: &str, position: i64) -> Result<()> {
        self.require_kind(DeviceKind::Autosampler, "add_slot")?;
        validate_slot_name(slot)?;
        if position < 0 {
            return Err(Error::InvalidArgument {
                reason: format!("position {position} is negative"),
            });
        }
        self.issue_command(Command::add_slot(slot, position))?;
        self.query_configuration().await
    }

    /// Removes a slot, then re-reads the configuration.
    pub async fn remove_slot(&self, slot: &str) -> Result<()> {
        self.require_kind(DeviceKind::Autosampler, "remove_slot")?;
        validate_slot_name(slot)?;
        self.issue_command(Command::remove_slot(slot))?;
        self.query_configuration().await
    }

    /// Moves the carriage one step in a direction.
    pub fn move_direction(&self, direction: SamplerDirection) -> Result<()> {
        self.require_kind(DeviceKind::Autosampler, "move_direction")?;
        self.issue_command(Command::move_direction(direction))
    }
}

fn validate_slot_name(slot: &str) -> Result<()> {
    if slot.is_empty() || slot.contains(':') || slot.chars().any(char::is_whitespace) {
        return Err(Error::InvalidArgument {
            reason: format!("invalid slot name `{slot}`"),
        });
    }
    Ok(())
}

impl<T: Transport + 'static> SessionInner<T> {
    fn set_state(&self, state: SessionState) {
        tracing::debug!("{} on {}: {:?}", self.kind, self.port, state);
        self.state.send_replace(state);
    }

    /// Writes a handshake line directly, before the dispatcher exists.
    async fn send_raw(&self, command: &Command) -> Result<()> {
        tracing::debug!("tx: {}", command);
        let mut transport = self.transport.lock().await;
        transport.send_line(command.text().to_string()).await
    }

    async fn establish(self: &Arc<Self>) -> Result<DeviceIdentity> {
        let kind = self.kind;
        self.set_state(SessionState::Connecting);

        let mut reader = {
            let mut transport = self.transport.lock().await;
            transport.connect().await?;
            transport.take_reader().ok_or_else(|| Error::Transport {
                reason: "transport has no receive side".into(),
            })?
        };

        self.set_state(SessionState::Identifying);
        self.send_raw(&Command::ping()).await?;
        let banner = reader.read_line_timeout(self.config.identify_timeout).await?;
        let identity = parse_identity(&banner, kind).ok_or_else(|| Error::DeviceMismatch {
            expected: kind.identity_marker().to_string(),
            received: banner.clone(),
        })?;
        tracing::info!("identified {} on {}: {}", kind, self.port, identity.banner);

        self.set_state(SessionState::TimeSyncing);
        self.send_raw(&Command::sync_time(Local::now().naive_local()))
            .await?;
        let ack = reader.read_line_timeout(self.config.identify_timeout).await?;
        if ResponseTag::classify(&ack) == ResponseTag::Error {
            return Err(Error::Device { message: ack });
        }
        tracing::debug!("time sync reply: {}", ack);

        let queue = self.spawn_link(reader).await;
        let version = identity.version.clone();
        self.status.update(|s| s.firmware_version = version).await;

        for command in [
            kind.rtc_query(),
            kind.configuration_query(),
            kind.status_query(),
        ] {
            let text = command.text().to_string();
            if let Err(e) = queue.request(command).await {
                if e.is_transport() || matches!(e, Error::NotConnected) {
                    return Err(e);
                }
                tracing::warn!("{} initial query `{}` failed: {}", kind, text, e);
            }
        }

        self.status.update(|s| s.connected = true).await;
        self.set_state(SessionState::Ready);
        self.events.dispatch(Event::Connected { kind });
        tracing::info!("{} on {} ready", kind, self.port);

        Ok(identity)
    }

    /// Starts the read, route and dispatch tasks for a fresh link.
    async fn spawn_link(self: &Arc<Self>, reader: LineReader) -> CommandQueue {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (queue, queue_rx) = CommandQueue::new();
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let mut tasks = Vec::with_capacity(4);

        let weak = Arc::downgrade(self);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = reader.run(line_tx).await {
                Self::link_failed(&weak, generation, &e);
            }
        }));

        let router = Router::new(
            self.kind,
            self.status.clone(),
            self.events.clone(),
            queue.clone(),
        );
        tasks.push(tokio::spawn(router.run(line_rx)));

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transport),
            self.events.clone(),
            self.config.request_timeout,
        );
        let weak = Arc::downgrade(self);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = dispatcher.run(queue_rx).await {
                Self::link_failed(&weak, generation, &e);
            }
        }));

        if let Some(interval) = self.config.rtc_poll_interval {
            let queue = queue.clone();
            let command = self.kind.rtc_query();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if queue.enqueue(command.clone()).is_err() {
                        break;
                    }
                }
            }));
        }

        *self.link.lock().await = Some(Link { generation, tasks });
        self.queue.send_replace(Some(queue.clone()));
        queue
    }

    /// Reports a dead link and schedules its teardown.
    fn link_failed(weak: &Weak<Self>, generation: u64, error: &Error) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        tracing::error!("{} on {} link failed: {}", inner.kind, inner.port, error);
        inner.events.dispatch(Event::TransportLost {
            reason: error.to_string(),
        });

        // Runs outside the link tasks, which the teardown aborts.
        tokio::spawn(async move {
            let _lifecycle = inner.lifecycle.lock().await;
            let current = inner.link.lock().await.as_ref().map(|link| link.generation);
            if current == Some(generation) {
                inner.teardown(false).await;
            }
        });
    }

    /// Closes the link and returns to `Disconnected`.
    ///
    /// Callers hold the lifecycle lock.
    async fn teardown(&self, safe_state: bool) {
        let connected = self.status.read(|s| s.connected).await;
        if safe_state && connected {
            self.send_safe_state().await;
        }

        self.queue.send_replace(None);
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            for task in &link.tasks {
                task.abort();
            }
            for task in link.tasks {
                let _ = task.await;
            }
        }

        if let Err(e) = self.transport.lock().await.disconnect().await {
            tracing::warn!("closing {} failed: {}", self.port, e);
        }
        self.status.reset().await;

        let previous = self.state.send_replace(SessionState::Disconnected);
        if previous != SessionState::Disconnected {
            tracing::info!("{} on {} disconnected", self.kind, self.port);
            self.events.dispatch(Event::Disconnected);
        }
    }

    async fn send_safe_state(&self) {
        let Some(command) = self.kind.safe_state_command() else {
            return;
        };
        let Some(queue) = self.queue.borrow().clone() else {
            return;
        };

        match tokio::time::timeout(self.config.safe_state_timeout, queue.request(command)).await {
            Ok(Ok(_)) => tracing::info!("{} on {} in safe state", self.kind, self.port),
            Ok(Err(e)) => tracing::warn!("safe-state command failed: {}", e),
            Err(_) => tracing::warn!("safe-state command timed out"),
        }
    }
}

impl<T> Drop for SessionInner<T> {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            for task in link.tasks {
                task.abort();
            }
        }
    }
}

impl<T: Transport + 'static> Actuator for DeviceSession<T> {
    fn device_kind(&self) -> DeviceKind {
        self.inner.kind
    }

    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn snapshot(&self) -> Pin<Box<dyn Future<Output = DeviceStatus> + Send + '_>> {
        Box::pin(self.inner.status.snapshot())
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.issue_command(command)
    }

    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.query_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{
        AutosamplerFirmware, MockHandle, MockTransport, PumpFirmware, init_tracing,
    };
    use crate::types::{Direction, PowerState};

    fn test_config() -> SessionConfig {
        SessionConfig::new()
            .identify_timeout(Duration::from_millis(500))
            .request_timeout(Duration::from_millis(500))
            .safe_state_timeout(Duration::from_millis(500))
    }

    fn pump_session(
        firmware: PumpFirmware,
    ) -> (DeviceSession<MockTransport>, MockHandle<PumpFirmware>) {
        init_tracing();
        let (transport, handle) = MockTransport::new("/dev/ttyACM0", firmware);
        (
            DeviceSession::new(DeviceKind::Pump, transport, test_config()),
            handle,
        )
    }

    fn autosampler_session() -> (
        DeviceSession<MockTransport>,
        MockHandle<AutosamplerFirmware>,
    ) {
        init_tracing();
        let firmware = AutosamplerFirmware::new()
            .with_slot("1", 100)
            .with_slot("2", 200)
            .with_slot("waste", 0);
        let (transport, handle) = MockTransport::new("/dev/ttyACM1", firmware);
        (
            DeviceSession::new(DeviceKind::Autosampler, transport, test_config()),
            handle,
        )
    }

    async fn eventually<T, F>(session: &DeviceSession<T>, check: F)
    where
        T: Transport + 'static,
        F: Fn(&DeviceStatus) -> bool,
    {
        for _ in 0..400 {
            if check(&session.status().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("status condition not reached: {:?}", session.status().await);
    }

    #[tokio::test]
    async fn test_connect_pump() {
        let firmware = PumpFirmware::new()
            .with_pump(1, PowerState::Off, Direction::Cw)
            .with_pump(2, PowerState::On, Direction::Ccw);
        let (session, handle) = pump_session(firmware);

        let identity = session.connect().await.unwrap();
        assert_eq!(identity.version.as_deref(), Some("2.0"));
        assert!(session.is_connected());

        let status = session.status().await;
        assert!(status.connected);
        assert_eq!(status.firmware_version.as_deref(), Some("2.0"));
        assert_eq!(status.pumps.len(), 2);
        assert_eq!(status.pumps[&2].power, PowerState::On);
        assert!(status.rtc_time.is_some());

        let sent = handle.sent();
        assert_eq!(sent[0], "0:ping");
        assert!(sent[1].starts_with("0:stime:"));
        assert_eq!(&sent[2..], ["0:time", "0:info", "0:st"]);
    }

    #[tokio::test]
    async fn test_wrong_device_is_rejected() {
        let mut firmware = PumpFirmware::new();
        firmware.banner = "Pico Autosampler Control Version 1.3".into();
        let (session, handle) = pump_session(firmware);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::DeviceMismatch { .. }));
        assert!(!err.is_transport());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.status().await.connected);
        // Nothing after the ping.
        assert_eq!(handle.sent(), ["0:ping"]);
    }

    #[tokio::test]
    async fn test_disconnect_sends_safe_state_and_resets() {
        let firmware = PumpFirmware::new().with_pump(1, PowerState::On, Direction::Cw);
        let (session, handle) = pump_session(firmware);
        let mut events = session.subscribe();

        session.connect().await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(handle.sent().last().map(String::as_str), Some("0:shutdown"));
        assert_eq!(
            handle.firmware.lock().unwrap().pumps[&1].power,
            PowerState::Off
        );

        let status = session.status().await;
        let mut fresh = DeviceStatus::new(DeviceKind::Pump, "/dev/ttyACM0");
        fresh.created_at = status.created_at;
        assert_eq!(status, fresh);

        let mut saw_disconnect = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), events.recv()).await
        {
            saw_disconnect |= matches!(event, Event::Disconnected);
        }
        assert!(saw_disconnect);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, handle) = pump_session(PumpFirmware::new());
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert!(handle.sent().is_empty());
        assert!(matches!(
            session.issue_command(Command::pump_status()),
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_twice_reconnects() {
        let (session, handle) = pump_session(PumpFirmware::new());
        session.connect().await.unwrap();
        session.connect().await.unwrap();

        let sent = handle.sent();
        let shutdown = sent.iter().position(|l| l == "0:shutdown").unwrap();
        assert_eq!(sent[shutdown + 1], "0:ping");
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_toggle_and_status() {
        let firmware = PumpFirmware::new().with_pump(1, PowerState::Off, Direction::Cw);
        let (session, _handle) = pump_session(firmware);
        session.connect().await.unwrap();

        session.toggle_power(1).await.unwrap();
        session.toggle_direction(1).await.unwrap();
        session.query_status().await.unwrap();

        let pump = session.status().await.pumps[&1];
        assert_eq!(pump.power, PowerState::On);
        assert_eq!(pump.direction, Direction::Ccw);

        let err = session.toggle_power(5).await.unwrap_err();
        assert!(matches!(err, Error::Device { .. }));
    }

    #[tokio::test]
    async fn test_register_and_remove_pump() {
        let (session, handle) = pump_session(PumpFirmware::new());
        session.connect().await.unwrap();
        handle.clear_sent();

        session
            .register_pump(PumpRegistration {
                id: 3,
                power_pin: 6,
                direction_pin: 7,
                initial_power_value: 0,
                initial_direction_value: 0,
                initial_power: PowerState::Off,
                initial_direction: Direction::Cw,
            })
            .await
            .unwrap();

        assert_eq!(handle.sent(), ["3:reg:6:7:0:0:OFF:CW", "0:info"]);
        assert_eq!(session.status().await.pumps[&3].power_pin, 6);

        session.remove_pump(3).await.unwrap();
        assert!(session.status().await.pumps.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_pump_requeries_configuration() {
        let firmware = PumpFirmware::new().with_pump(1, PowerState::Off, Direction::Cw);
        let (session, handle) = pump_session(firmware);
        session.connect().await.unwrap();
        handle.clear_sent();

        handle.inject("Pump1 Status: Power: ON, Direction: CW, Pump3 Status: Power: ON, Direction: CW");
        eventually(&session, |s| s.pumps[&1].power == PowerState::On).await;

        for _ in 0..100 {
            if !handle.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.sent(), ["0:info"]);
        assert!(!session.status().await.pumps.contains_key(&3));
    }

    #[tokio::test]
    async fn test_link_loss_disconnects() {
        let firmware = PumpFirmware::new().with_pump(1, PowerState::On, Direction::Cw);
        let (session, handle) = pump_session(firmware);
        let mut state = session.watch_state();
        let mut events = session.subscribe();
        session.connect().await.unwrap();

        handle.drop_link();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == SessionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!session.status().await.connected);
        assert!(session.status().await.pumps.is_empty());

        let mut lost = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), events.recv()).await
        {
            lost |= matches!(event, Event::TransportLost { .. });
        }
        assert!(lost);
    }

    #[tokio::test]
    async fn test_reset_skips_safe_state() {
        let (session, handle) = pump_session(PumpFirmware::new());
        session.connect().await.unwrap();
        handle.clear_sent();

        session.reset().await.unwrap();
        assert_eq!(handle.sent(), ["0:reset"]);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_wrong_kind_operation() {
        let (session, _handle) = autosampler_session();
        let err = session.toggle_power(1).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_autosampler_session() {
        let (session, handle) = autosampler_session();
        session.connect().await.unwrap();

        let status = session.status().await;
        assert_eq!(status.slots, vec!["1", "2", "waste"]);
        assert_eq!(status.position, Some(0));
        assert_eq!(status.direction, Some(SamplerDirection::Left));
        assert_eq!(&handle.sent()[2..], ["time", "config", "status"]);

        assert!(matches!(
            session.goto_slot("9").await,
            Err(Error::InvalidArgument { .. })
        ));
        session.goto_slot("2").await.unwrap();
        eventually(&session, |s| s.position == Some(200)).await;

        session.goto_position(150).unwrap();
        eventually(&session, |s| s.position == Some(150)).await;
        assert!(session.goto_position(-1).is_err());

        session.add_slot("5", 500).await.unwrap();
        assert_eq!(session.status().await.slot_position("5"), Some(500));
        session.remove_slot("5").await.unwrap();
        assert_eq!(session.status().await.slot_position("5"), None);
        assert!(session.add_slot("bad:name", 1).await.is_err());

        // No safe-state command for the autosampler.
        handle.clear_sent();
        session.disconnect().await.unwrap();
        assert!(handle.sent().is_empty());
    }

    #[tokio::test]
    async fn test_query_rtc_time() {
        let (session, _handle) = pump_session(PumpFirmware::new());
        session.connect().await.unwrap();

        let rtc = session.query_rtc_time().await.unwrap();
        assert_eq!(rtc.to_string(), "2024-09-26 11:47:39");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtc_polling() {
        let (transport, handle) = MockTransport::new("p", PumpFirmware::new());
        let config = test_config().rtc_poll_interval(Duration::from_secs(1));
        let session = DeviceSession::new(DeviceKind::Pump, transport, config);
        session.connect().await.unwrap();
        handle.clear_sent();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let polls = handle.sent().iter().filter(|l| *l == "0:time").count();
        assert_eq!(polls, 3);
    }
}
