//! The session: one device connection's protocol state, without any I/O.
//!
//! A [`Session`] is fed three kinds of input: bytes from the socket
//! ([`receive`](Session::receive)), fired timers
//! ([`on_timer`](Session::on_timer)) and requests from the owner
//! ([`open`](Session::open), [`disconnect`](Session::disconnect),
//! [`command`](Session::command), transport status). Each call returns
//! the [`Action`]s the caller must carry out, in order. The session
//! never touches a socket or a clock deadline itself, so every
//! transition can be driven synchronously in tests.
//!
//! ```text
//!  Disconnected ──open──→ Connecting ──ConnectResponse──→ Connected
//!       ↑                     │                               │
//!       │                 (fatal)                        disconnect()
//!       │                     ▼                               ▼
//!       └────teardown─────────┴─────────────────────── Disconnecting
//! ```
//!
//! Every way out (local disconnect, peer disconnect, fatal protocol
//! error, transport failure) goes through one teardown path: cancel all
//! timers, report `Disconnected`, close the transport.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nodelink_protocol::{
    API_VERSION_MAJOR, CameraImageChunk, CameraImageRequest, Command, ConnectResponse,
    DeviceInfo, EntityInfo, EntityKey, EntityState, Frame, FrameDecoder, HelloRequest,
    HelloResponse, Inbound, LogEntry, MAX_PAYLOAD_LEN, MESSAGE_TYPE_RANGE, MessageType,
    Outbound, ProtocolError, SubscribeLogsRequest, TagMap,
};
use serde::{Serialize, Serializer};
use tracing::{debug, error, info, warn};

use crate::{EntityRegistry, SessionConfig, SessionError};

/// Largest camera image reassembled from chunks. A larger image is
/// dropped and its later chunks start a fresh buffer.
pub const MAX_CAMERA_IMAGE_LEN: usize = 8 * MAX_PAYLOAD_LEN;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle. Exactly one per device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Socket open, handshake in progress.
    Connecting,
    /// Handshake accepted; listing and streaming.
    Connected,
    /// Local disconnect sent, waiting for the node to acknowledge.
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        })
    }
}

// ---------------------------------------------------------------------------
// Timers, events, actions
// ---------------------------------------------------------------------------

/// The named timers a session asks its driver to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Settle delay between socket open and hello.
    Handshake,
    /// Next keepalive ping.
    Keepalive,
    /// Watchdog for an outstanding keepalive ping.
    PingTimeout,
    /// Bound on waiting for the node to acknowledge a local disconnect.
    DisconnectGrace,
    /// Turns frame tracing back off.
    DebugLogExpiry,
}

impl TimerKind {
    pub const ALL: [TimerKind; 5] = [
        Self::Handshake,
        Self::Keepalive,
        Self::PingTimeout,
        Self::DisconnectGrace,
        Self::DebugLogExpiry,
    ];
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The owner asked for it (acknowledged by the node or not).
    Requested,
    /// The node sent a disconnect request.
    Peer,
    /// The socket closed without either side asking.
    TransportClosed,
    /// The transport reported an error.
    TransportError(String),
    /// A fatal protocol or handshake error.
    Fatal(#[serde(serialize_with = "serialize_display")] SessionError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Peer => f.write_str("node requested disconnect"),
            Self::TransportClosed => f.write_str("transport closed"),
            Self::TransportError(detail) => write!(f, "transport error: {detail}"),
            Self::Fatal(err) => write!(f, "{err}"),
        }
    }
}

fn serialize_display<S: Serializer>(
    value: &SessionError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Something the owner of a session should know about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: ConnectionState },
    DeviceInfo(DeviceInfo),
    EntitiesListed { entities: Vec<EntityInfo> },
    /// A state report, paired with the descriptor of its entity if the
    /// node listed one.
    EntityState {
        state: EntityState,
        info: Option<EntityInfo>,
    },
    Log(LogEntry),
    CameraImage { key: EntityKey, data: Vec<u8> },
    Disconnected { reason: DisconnectReason },
}

/// One thing the session needs its driver to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Encode and write a message.
    Send(Outbound),
    /// Deliver an event to the owner.
    Emit(SessionEvent),
    /// Start (or restart) a named timer. `jitter` is a random extra
    /// delay bound; zero means exact.
    Schedule {
        timer: TimerKind,
        after: Duration,
        jitter: Duration,
    },
    Cancel(TimerKind),
    /// Close the transport.
    Close,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Protocol state for one device connection.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    decoder: FrameDecoder,
    registry: EntityRegistry,
    server: Option<HelloResponse>,
    device_info: Option<DeviceInfo>,
    /// Camera images still receiving chunks.
    images: HashMap<EntityKey, Vec<u8>>,
    /// A keepalive ping has been sent and not yet answered.
    ping_outstanding: bool,
    frame_trace: bool,
    actions: Vec<Action>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            decoder: FrameDecoder::new(),
            registry: EntityRegistry::new(),
            server: None,
            device_info: None,
            images: HashMap::new(),
            ping_outstanding: false,
            frame_trace: false,
            actions: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Entities listed on the current (or most recent) connection.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// The node's hello, once received.
    pub fn server_info(&self) -> Option<&HelloResponse> {
        self.server.as_ref()
    }

    pub fn is_frame_trace_active(&self) -> bool {
        self.frame_trace
    }

    // -- Owner requests ----------------------------------------------------

    /// The transport has just opened. Starts a fresh handshake.
    ///
    /// Anything left over from a previous connection (pending timers,
    /// buffered bytes, the entity registry) is superseded.
    ///
    /// # Errors
    /// [`SessionError::InvalidState`] unless the session is disconnected.
    pub fn open(&mut self) -> Result<Vec<Action>, SessionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "open",
                state: self.state,
            });
        }

        for timer in TimerKind::ALL {
            self.push(Action::Cancel(timer));
        }
        let previous = self.registry.replace();
        if !previous.is_empty() {
            debug!(entities = previous.len(), "previous entity registry superseded");
        }
        self.decoder.clear();
        self.images.clear();
        self.server = None;
        self.device_info = None;
        self.ping_outstanding = false;

        self.set_state(ConnectionState::Connecting);

        if let Some(window) = self.config.frame_trace {
            self.frame_trace = true;
            info!(window_ms = window.as_millis() as u64, "frame trace enabled");
            self.schedule(TimerKind::DebugLogExpiry, window);
        }
        self.schedule(TimerKind::Handshake, self.config.settle_delay);
        Ok(self.take())
    }

    /// Starts a cooperative disconnect: ask the node to disconnect and
    /// wait at most `disconnect_grace` for it to acknowledge.
    ///
    /// A no-op if the session is already disconnected or disconnecting.
    pub fn disconnect(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                debug!(state = %self.state, "disconnect requested, nothing to do");
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                info!("disconnecting");
                for timer in [
                    TimerKind::Handshake,
                    TimerKind::Keepalive,
                    TimerKind::PingTimeout,
                ] {
                    self.push(Action::Cancel(timer));
                }
                self.ping_outstanding = false;
                self.set_state(ConnectionState::Disconnecting);
                self.send(Outbound::DisconnectRequest);
                self.schedule(TimerKind::DisconnectGrace, self.config.disconnect_grace);
            }
        }
        self.take()
    }

    /// The transport reported an error. Tears the session down.
    pub fn transport_error(&mut self, detail: impl Into<String>) -> Vec<Action> {
        let detail = detail.into();
        if self.state != ConnectionState::Disconnected {
            warn!(error = %detail, "transport error");
            self.teardown(DisconnectReason::TransportError(detail));
        }
        self.take()
    }

    /// The transport closed. If a local disconnect was in progress this
    /// completes it; otherwise the closure was unexpected.
    pub fn transport_closed(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Disconnecting => self.teardown(DisconnectReason::Requested),
            ConnectionState::Connecting | ConnectionState::Connected => {
                warn!(state = %self.state, "transport closed unexpectedly");
                self.teardown(DisconnectReason::TransportClosed);
            }
        }
        self.take()
    }

    /// Sends a command to an entity.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] before the handshake completes.
    pub fn command(&mut self, command: Command) -> Result<Vec<Action>, SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if self.registry.lookup(command.key()).is_none() {
            warn!(key = %command.key(), "command for an entity the node never listed");
        }
        self.send(Outbound::Command(command));
        Ok(self.take())
    }

    /// Asks camera entities for an image (`single`) or to start streaming.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] before the handshake completes.
    pub fn request_camera_image(
        &mut self,
        single: bool,
        stream: bool,
    ) -> Result<Vec<Action>, SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.send(Outbound::CameraImageRequest(CameraImageRequest { single, stream }));
        Ok(self.take())
    }

    // -- Inputs ------------------------------------------------------------

    /// Processes bytes received from the transport.
    ///
    /// Every complete frame in the buffer is dispatched, in order, before
    /// this returns; a trailing partial frame waits for the next call.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<Action> {
        if self.state == ConnectionState::Disconnected {
            debug!(len = bytes.len(), "bytes received while disconnected, ignored");
            return Vec::new();
        }

        self.decoder.push(bytes);
        while self.state != ConnectionState::Disconnected {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => self.dispatch(frame),
                Ok(None) => break,
                Err(ProtocolError::EncryptionUnsupported) => {
                    self.fail(ProtocolError::EncryptionUnsupported.into());
                }
                Err(e) => {
                    warn!(error = %e, "framing error, receive buffer dropped");
                    break;
                }
            }
        }
        self.take()
    }

    /// Handles a timer the driver scheduled on this session's behalf.
    pub fn on_timer(&mut self, timer: TimerKind) -> Vec<Action> {
        debug!(?timer, state = %self.state, "timer fired");
        match timer {
            TimerKind::Handshake => {
                if self.state == ConnectionState::Connecting {
                    let hello = HelloRequest::new(self.config.client_info.clone());
                    self.send(Outbound::Hello(hello));
                }
            }
            TimerKind::Keepalive => {
                if self.state == ConnectionState::Connected {
                    self.send(Outbound::PingRequest);
                    if let Some(timeout) = self.config.ping_timeout {
                        if !self.ping_outstanding {
                            self.schedule(TimerKind::PingTimeout, timeout);
                        }
                        self.ping_outstanding = true;
                    }
                    self.schedule_keepalive();
                }
            }
            TimerKind::PingTimeout => {
                if self.state == ConnectionState::Connected {
                    let timeout = self.config.ping_timeout.unwrap_or_default();
                    self.fail(SessionError::PingTimeout(timeout));
                }
            }
            TimerKind::DisconnectGrace => {
                if self.state == ConnectionState::Disconnecting {
                    warn!("node did not acknowledge disconnect, closing");
                    self.teardown(DisconnectReason::Requested);
                }
            }
            TimerKind::DebugLogExpiry => {
                if self.frame_trace {
                    self.frame_trace = false;
                    info!("frame trace disabled");
                }
            }
        }
        self.take()
    }

    // -- Dispatch ----------------------------------------------------------

    fn dispatch(&mut self, frame: Frame) {
        if self.frame_trace {
            info!(
                direction = "rx",
                message_type = frame.message_type,
                payload = %Hex(&frame.payload),
                "frame"
            );
        }

        let Some(message_type) = MessageType::from_u32(frame.message_type) else {
            if MESSAGE_TYPE_RANGE.contains(&frame.message_type) {
                warn!(message_type = frame.message_type, "unimplemented message type skipped");
            } else {
                warn!(message_type = frame.message_type, "message type out of range, skipped");
            }
            return;
        };

        let fields = match TagMap::decode(&frame.payload) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(%message_type, error = %e, "undecodable message skipped");
                return;
            }
        };

        match Inbound::decode(message_type, &fields) {
            Ok(Some(inbound)) => {
                debug!(%message_type, "dispatching");
                self.handle(inbound);
            }
            Ok(None) => {
                warn!(%message_type, "client-bound message received from node, ignored");
            }
            Err(e) => {
                warn!(%message_type, error = %e, "malformed message skipped");
            }
        }
    }

    fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::HelloResponse(hello) => self.on_hello(hello),
            Inbound::ConnectResponse(response) => self.on_connect(response),
            Inbound::DeviceInfo(info) => self.on_device_info(info),
            Inbound::EntityListed(info) => {
                if self.expect_state(ConnectionState::Connected, "entity listing") {
                    self.registry.upsert(info);
                }
            }
            Inbound::ListEntitiesDone => self.on_listing_done(),
            Inbound::State(state) => {
                let info = self.registry.lookup(state.key()).cloned();
                if info.is_none() {
                    debug!(key = %state.key(), kind = %state.kind(), "state for unlisted entity");
                }
                self.emit(SessionEvent::EntityState { state, info });
            }
            Inbound::Log(entry) => self.emit(SessionEvent::Log(entry)),
            Inbound::PingRequest => self.send(Outbound::PingResponse),
            Inbound::PingResponse => {
                if self.ping_outstanding {
                    self.ping_outstanding = false;
                    self.push(Action::Cancel(TimerKind::PingTimeout));
                }
            }
            Inbound::DisconnectRequest => {
                info!("node requested disconnect");
                self.send(Outbound::DisconnectResponse);
                self.teardown(DisconnectReason::Peer);
            }
            Inbound::DisconnectResponse => {
                if self.state == ConnectionState::Disconnecting {
                    self.teardown(DisconnectReason::Requested);
                } else {
                    debug!(state = %self.state, "unsolicited disconnect response ignored");
                }
            }
            Inbound::GetTimeRequest => {
                let epoch_seconds = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
                    .unwrap_or(0);
                self.send(Outbound::GetTimeResponse { epoch_seconds });
            }
            Inbound::CameraImage(chunk) => self.on_camera_chunk(chunk),
        }
    }

    fn on_hello(&mut self, hello: HelloResponse) {
        if !self.expect_state(ConnectionState::Connecting, "hello response") {
            return;
        }
        if self.server.is_some() {
            warn!("duplicate hello response, ignored");
            return;
        }
        if hello.api_version_major != API_VERSION_MAJOR {
            self.fail(SessionError::UnsupportedApiVersion {
                major: hello.api_version_major,
                minor: hello.api_version_minor,
            });
            return;
        }

        info!(
            server = %hello.server_info,
            name = %hello.name,
            api_major = hello.api_version_major,
            api_minor = hello.api_version_minor,
            "hello accepted"
        );
        self.server = Some(hello);
        self.send(Outbound::Connect {
            password: self.config.password.clone(),
        });
    }

    fn on_connect(&mut self, response: ConnectResponse) {
        if !self.expect_state(ConnectionState::Connecting, "connect response") {
            return;
        }
        if self.server.is_none() {
            warn!("connect response before hello response, ignored");
            return;
        }
        if response.invalid_password {
            self.fail(SessionError::InvalidPassword);
            return;
        }
        self.set_state(ConnectionState::Connected);
        self.send(Outbound::DeviceInfoRequest);
    }

    fn on_device_info(&mut self, info: DeviceInfo) {
        if !self.expect_state(ConnectionState::Connected, "device info") {
            return;
        }
        info!(
            name = %info.name,
            model = %info.model,
            version = %info.esphome_version,
            mac = %info.mac_address,
            "device info received"
        );
        self.device_info = Some(info.clone());
        self.emit(SessionEvent::DeviceInfo(info));
        self.send(Outbound::ListEntitiesRequest);
    }

    fn on_listing_done(&mut self) {
        if !self.expect_state(ConnectionState::Connected, "listing done") {
            return;
        }
        info!(entities = self.registry.len(), "entity listing complete");
        self.emit(SessionEvent::EntitiesListed {
            entities: self.registry.to_vec(),
        });
        self.schedule_keepalive();
        if let Some(level) = self.config.subscribe_logs {
            self.send(Outbound::SubscribeLogs(SubscribeLogsRequest {
                level,
                dump_config: self.config.dump_config,
            }));
        }
        self.send(Outbound::SubscribeStates);
    }

    fn on_camera_chunk(&mut self, chunk: CameraImageChunk) {
        let buf = self.images.entry(chunk.key).or_default();
        if buf.len() + chunk.data.len() > MAX_CAMERA_IMAGE_LEN {
            warn!(
                key = %chunk.key,
                buffered = buf.len(),
                limit = MAX_CAMERA_IMAGE_LEN,
                "camera image too large, dropped"
            );
            self.images.remove(&chunk.key);
            return;
        }
        buf.extend_from_slice(&chunk.data);
        if chunk.done {
            let data = self.images.remove(&chunk.key).unwrap_or_default();
            debug!(key = %chunk.key, len = data.len(), "camera image complete");
            self.emit(SessionEvent::CameraImage {
                key: chunk.key,
                data,
            });
        }
    }

    // -- Helpers -----------------------------------------------------------

    fn expect_state(&self, expected: ConnectionState, what: &str) -> bool {
        if self.state == expected {
            return true;
        }
        warn!(state = %self.state, expected = %expected, "unexpected {what}, ignored");
        false
    }

    fn fail(&mut self, err: SessionError) {
        error!(error = %err, "fatal session error");
        self.teardown(DisconnectReason::Fatal(err));
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        for timer in TimerKind::ALL {
            self.push(Action::Cancel(timer));
        }
        self.frame_trace = false;
        self.ping_outstanding = false;
        self.images.clear();
        self.set_state(ConnectionState::Disconnected);
        info!(%reason, "session closed");
        self.emit(SessionEvent::Disconnected { reason });
        self.push(Action::Close);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "connection state changed");
        self.state = state;
        self.emit(SessionEvent::StateChanged { state });
    }

    fn schedule_keepalive(&mut self) {
        self.push(Action::Schedule {
            timer: TimerKind::Keepalive,
            after: self.config.keepalive_interval,
            jitter: self.config.keepalive_jitter,
        });
    }

    fn schedule(&mut self, timer: TimerKind, after: Duration) {
        self.push(Action::Schedule {
            timer,
            after,
            jitter: Duration::ZERO,
        });
    }

    fn send(&mut self, message: Outbound) {
        if self.frame_trace {
            info!(
                direction = "tx",
                message_type = %message.message_type(),
                payload = %Hex(&message.to_fields().encode()),
                "frame"
            );
        } else {
            debug!(message_type = %message.message_type(), "sending");
        }
        self.push(Action::Send(message));
    }

    fn emit(&mut self, event: SessionEvent) {
        self.push(Action::Emit(event));
    }

    fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    fn take(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelink_protocol::{EntityKind, LogLevel, encode_frame};

    // =====================================================================
    // Helpers
    // =====================================================================

    fn frame(message_type: MessageType, fields: TagMap) -> Vec<u8> {
        encode_frame(message_type.as_u32(), &fields.encode())
    }

    fn hello_response(major: u64, minor: u64) -> Vec<u8> {
        frame(
            MessageType::HelloResponse,
            TagMap::new()
                .with_uint(1, major)
                .with_uint(2, minor)
                .with_string(3, "node 2024.6.0"),
        )
    }

    fn connect_response(invalid_password: bool) -> Vec<u8> {
        frame(
            MessageType::ConnectResponse,
            TagMap::new().with_bool(1, invalid_password),
        )
    }

    fn device_info_response() -> Vec<u8> {
        frame(
            MessageType::DeviceInfoResponse,
            TagMap::new()
                .with_string(2, "kitchen")
                .with_string(3, "AA:BB:CC:DD:EE:FF")
                .with_string(6, "esp32dev"),
        )
    }

    fn switch_listing(key: u32, name: &str) -> Vec<u8> {
        frame(
            MessageType::ListEntitiesSwitchResponse,
            TagMap::new()
                .with_string(1, &name.to_lowercase())
                .with_fixed32(2, key)
                .with_string(3, name),
        )
    }

    fn empty(message_type: MessageType) -> Vec<u8> {
        frame(message_type, TagMap::new())
    }

    fn sent(actions: &[Action]) -> Vec<MessageType> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(m) => Some(m.message_type()),
                _ => None,
            })
            .collect()
    }

    fn events(actions: &[Action]) -> Vec<SessionEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn disconnect_reason(actions: &[Action]) -> Option<DisconnectReason> {
        events(actions).into_iter().find_map(|e| match e {
            SessionEvent::Disconnected { reason } => Some(reason),
            _ => None,
        })
    }

    fn scheduled(actions: &[Action], timer: TimerKind) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            Action::Schedule { timer: t, after, .. } if *t == timer => Some(*after),
            _ => None,
        })
    }

    fn opened() -> Session {
        let mut session = Session::new(SessionConfig::default());
        session.open().unwrap();
        session.on_timer(TimerKind::Handshake);
        session
    }

    fn connected() -> Session {
        let mut session = opened();
        let mut bytes = hello_response(1, 9);
        bytes.extend(connect_response(false));
        bytes.extend(device_info_response());
        session.receive(&bytes);
        assert_eq!(session.state(), ConnectionState::Connected);
        session
    }

    fn listed() -> Session {
        let mut session = connected();
        let mut bytes = switch_listing(0x10, "Pump");
        bytes.extend(empty(MessageType::ListEntitiesDoneResponse));
        session.receive(&bytes);
        session
    }

    // =====================================================================
    // Open and handshake
    // =====================================================================

    #[test]
    fn test_open_schedules_settle_delay_then_hello() {
        let mut session = Session::new(SessionConfig::default());

        let actions = session.open().unwrap();

        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(sent(&actions).is_empty(), "hello waits for the settle delay");
        assert_eq!(
            scheduled(&actions, TimerKind::Handshake),
            Some(Duration::from_millis(100))
        );
        assert!(actions.contains(&Action::Cancel(TimerKind::Keepalive)));

        let actions = session.on_timer(TimerKind::Handshake);
        assert_eq!(sent(&actions), [MessageType::HelloRequest]);
        match &actions[0] {
            Action::Send(Outbound::Hello(hello)) => {
                assert_eq!(hello.api_version_major, 1);
                assert!(hello.client_info.starts_with("nodelink"));
            }
            other => panic!("expected hello, got {other:?}"),
        }
    }

    #[test]
    fn test_open_twice_is_invalid_state() {
        let mut session = opened();
        assert_eq!(
            session.open(),
            Err(SessionError::InvalidState {
                operation: "open",
                state: ConnectionState::Connecting,
            })
        );
    }

    #[test]
    fn test_receive_handshake_in_one_buffer_runs_steps_in_order() {
        let mut session = opened();
        let mut bytes = hello_response(1, 7);
        bytes.extend(connect_response(false));
        bytes.extend(device_info_response());

        let actions = session.receive(&bytes);

        assert_eq!(
            sent(&actions),
            [
                MessageType::ConnectRequest,
                MessageType::DeviceInfoRequest,
                MessageType::ListEntitiesRequest,
            ]
        );
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.device_info().unwrap().name, "kitchen");
        assert_eq!(session.server_info().unwrap().api_version_minor, 7);
    }

    #[test]
    fn test_hello_response_carries_configured_password() {
        let mut session = Session::new(SessionConfig {
            password: "hunter2".into(),
            ..Default::default()
        });
        session.open().unwrap();

        let actions = session.receive(&hello_response(1, 9));

        assert_eq!(
            actions,
            [Action::Send(Outbound::Connect {
                password: "hunter2".into()
            })]
        );
    }

    #[test]
    fn test_hello_response_wrong_major_version_is_fatal() {
        let mut session = opened();

        let actions = session.receive(&hello_response(2, 0));

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            disconnect_reason(&actions),
            Some(DisconnectReason::Fatal(SessionError::UnsupportedApiVersion {
                major: 2,
                minor: 0
            }))
        );
        assert_eq!(actions.last(), Some(&Action::Close));
        assert!(!sent(&actions).contains(&MessageType::ConnectRequest));
    }

    #[test]
    fn test_teardown_cancels_timers_before_state_and_close() {
        let mut session = opened();

        let actions = session.receive(&hello_response(2, 0));

        let first_emit = actions
            .iter()
            .position(|a| matches!(a, Action::Emit(_)))
            .unwrap();
        let cancels = actions
            .iter()
            .position(|a| matches!(a, Action::Cancel(_)))
            .unwrap();
        assert!(cancels < first_emit);
        assert_eq!(
            actions[first_emit],
            Action::Emit(SessionEvent::StateChanged {
                state: ConnectionState::Disconnected
            })
        );
        assert_eq!(actions.last(), Some(&Action::Close));
    }

    #[test]
    fn test_invalid_password_is_fatal() {
        let mut session = opened();
        let mut bytes = hello_response(1, 9);
        bytes.extend(connect_response(true));
        bytes.extend(device_info_response());

        let actions = session.receive(&bytes);

        assert_eq!(
            disconnect_reason(&actions),
            Some(DisconnectReason::Fatal(SessionError::InvalidPassword))
        );
        assert!(
            !sent(&actions).contains(&MessageType::DeviceInfoRequest),
            "frames after the fatal error are not processed"
        );
    }

    #[test]
    fn test_device_info_before_connect_is_ignored() {
        let mut session = opened();
        let mut bytes = hello_response(1, 9);
        bytes.extend(device_info_response());

        let actions = session.receive(&bytes);

        assert_eq!(sent(&actions), [MessageType::ConnectRequest]);
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.device_info().is_none());
    }

    #[test]
    fn test_connect_response_before_hello_response_is_ignored() {
        let mut session = opened();

        let actions = session.receive(&connect_response(false));

        assert!(sent(&actions).is_empty());
        assert_eq!(session.state(), ConnectionState::Connecting);

        // The real handshake still goes through afterwards.
        let mut bytes = hello_response(1, 9);
        bytes.extend(connect_response(false));
        let actions = session.receive(&bytes);
        assert_eq!(
            sent(&actions),
            [MessageType::ConnectRequest, MessageType::DeviceInfoRequest]
        );
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_duplicate_hello_response_is_ignored() {
        let mut session = opened();
        session.receive(&hello_response(1, 9));

        let actions = session.receive(&hello_response(2, 0));

        assert!(actions.is_empty());
        assert_eq!(session.server_info().unwrap().api_version_major, 1);
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    // =====================================================================
    // Listing and streaming
    // =====================================================================

    #[test]
    fn test_listing_done_schedules_keepalive_and_subscribes() {
        let mut session = connected();
        let mut bytes = switch_listing(0x10, "Pump");
        bytes.extend(switch_listing(0x20, "Fan"));
        bytes.extend(empty(MessageType::ListEntitiesDoneResponse));

        let actions = session.receive(&bytes);

        assert_eq!(session.registry().len(), 2);
        assert_eq!(
            sent(&actions),
            [
                MessageType::SubscribeLogsRequest,
                MessageType::SubscribeStatesRequest
            ]
        );
        assert_eq!(
            scheduled(&actions, TimerKind::Keepalive),
            Some(Duration::from_secs(15))
        );
        match &events(&actions)[0] {
            SessionEvent::EntitiesListed { entities } => {
                assert_eq!(entities.len(), 2);
                assert_eq!(entities[0].name, "Pump");
                assert_eq!(entities[1].kind(), EntityKind::Switch);
            }
            other => panic!("expected listing event, got {other:?}"),
        }
    }

    #[test]
    fn test_listing_done_without_log_subscription() {
        let mut session = Session::new(SessionConfig {
            subscribe_logs: None,
            ..Default::default()
        });
        session.open().unwrap();
        let mut bytes = hello_response(1, 9);
        bytes.extend(connect_response(false));
        bytes.extend(empty(MessageType::ListEntitiesDoneResponse));

        let actions = session.receive(&bytes);

        assert!(!sent(&actions).contains(&MessageType::SubscribeLogsRequest));
        assert!(sent(&actions).contains(&MessageType::SubscribeStatesRequest));
    }

    #[test]
    fn test_subscribe_logs_uses_configured_level() {
        let mut session = Session::new(SessionConfig {
            subscribe_logs: Some(LogLevel::Verbose),
            dump_config: true,
            ..Default::default()
        });
        session.open().unwrap();
        let mut bytes = hello_response(1, 9);
        bytes.extend(connect_response(false));
        bytes.extend(empty(MessageType::ListEntitiesDoneResponse));

        let actions = session.receive(&bytes);

        assert!(actions.contains(&Action::Send(Outbound::SubscribeLogs(
            SubscribeLogsRequest {
                level: LogLevel::Verbose,
                dump_config: true,
            }
        ))));
    }

    #[test]
    fn test_state_report_pairs_with_listed_descriptor() {
        let mut session = listed();
        let state = frame(
            MessageType::SwitchStateResponse,
            TagMap::new().with_fixed32(1, 0x10).with_bool(2, true),
        );

        let actions = session.receive(&state);

        match &events(&actions)[..] {
            [SessionEvent::EntityState { state, info }] => {
                assert_eq!(
                    *state,
                    EntityState::Switch {
                        key: EntityKey(0x10),
                        state: true
                    }
                );
                assert_eq!(info.as_ref().unwrap().name, "Pump");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_state_report_for_unlisted_key_has_no_descriptor() {
        let mut session = listed();
        let state = frame(
            MessageType::SensorStateResponse,
            TagMap::new().with_fixed32(1, 0x99).with_float(2, 3.5),
        );

        let actions = session.receive(&state);

        match &events(&actions)[..] {
            [SessionEvent::EntityState { info, .. }] => assert!(info.is_none()),
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_log_entry_is_emitted() {
        let mut session = listed();
        let log = frame(
            MessageType::SubscribeLogsResponse,
            TagMap::new().with_uint(1, 3).with_string(3, "[I][app]: ready"),
        );

        let actions = session.receive(&log);

        assert_eq!(
            events(&actions),
            [SessionEvent::Log(LogEntry {
                level: LogLevel::Info,
                message: "[I][app]: ready".into(),
                send_failed: false,
            })]
        );
    }

    #[test]
    fn test_camera_chunks_accumulate_until_done() {
        let mut session = listed();
        let chunk = |data: &str, done: bool| {
            frame(
                MessageType::CameraImageResponse,
                TagMap::new()
                    .with_fixed32(1, 0x77)
                    .with_string(2, data)
                    .with_bool(3, done),
            )
        };

        assert!(events(&session.receive(&chunk("abc", false))).is_empty());
        let actions = session.receive(&chunk("def", true));

        assert_eq!(
            events(&actions),
            [SessionEvent::CameraImage {
                key: EntityKey(0x77),
                data: b"abcdef".to_vec(),
            }]
        );
    }

    #[test]
    fn test_oversized_camera_image_is_dropped() {
        let mut session = listed();
        let chunk = |data: &str, done: bool| {
            frame(
                MessageType::CameraImageResponse,
                TagMap::new()
                    .with_fixed32(1, 0x77)
                    .with_string(2, data)
                    .with_bool(3, done),
            )
        };
        let block = "x".repeat(1_000_000);
        let blocks = MAX_CAMERA_IMAGE_LEN / block.len() + 1;

        for _ in 0..blocks {
            assert!(events(&session.receive(&chunk(&block, false))).is_empty());
        }
        assert!(session.images.is_empty(), "oversized buffer is released");

        let actions = session.receive(&chunk("tail", true));
        assert_eq!(
            events(&actions),
            [SessionEvent::CameraImage {
                key: EntityKey(0x77),
                data: b"tail".to_vec(),
            }]
        );
    }

    #[test]
    fn test_get_time_request_is_answered() {
        let mut session = listed();

        let actions = session.receive(&empty(MessageType::GetTimeRequest));

        match &actions[..] {
            [Action::Send(Outbound::GetTimeResponse { epoch_seconds })] => {
                assert!(*epoch_seconds > 1_600_000_000);
            }
            other => panic!("unexpected actions {other:?}"),
        }
    }

    // =====================================================================
    // Framing robustness
    // =====================================================================

    #[test]
    fn test_two_frames_in_one_chunk_are_dispatched_in_order() {
        let mut session = opened();
        let mut bytes = hello_response(1, 9);
        bytes.extend(empty(MessageType::PingRequest));

        let actions = session.receive(&bytes);

        assert_eq!(
            sent(&actions),
            [MessageType::ConnectRequest, MessageType::PingResponse]
        );
    }

    #[test]
    fn test_unknown_type_between_valid_frames_is_skipped() {
        let mut session = listed();
        let mut bytes = empty(MessageType::PingRequest);
        bytes.extend(encode_frame(66, &[0x08, 0x01]));
        bytes.extend(encode_frame(46, &[]));
        bytes.extend(empty(MessageType::PingRequest));

        let actions = session.receive(&bytes);

        assert_eq!(
            sent(&actions),
            [MessageType::PingResponse, MessageType::PingResponse]
        );
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_invalid_marker_drops_buffer_but_keeps_session() {
        let mut session = listed();
        let mut bytes = vec![0x02, 0x00, 0x07];
        bytes.extend(empty(MessageType::PingRequest));

        let actions = session.receive(&bytes);

        assert!(actions.is_empty(), "rest of the buffer is discarded");
        assert_eq!(session.state(), ConnectionState::Connected);

        let actions = session.receive(&empty(MessageType::PingRequest));
        assert_eq!(sent(&actions), [MessageType::PingResponse]);
    }

    #[test]
    fn test_encrypted_frame_is_fatal() {
        let mut session = opened();

        let actions = session.receive(&[0x01, 0x00, 0x02]);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            disconnect_reason(&actions),
            Some(DisconnectReason::Fatal(SessionError::Protocol(
                ProtocolError::EncryptionUnsupported
            )))
        );
    }

    #[test]
    fn test_frame_split_across_receives_is_reassembled() {
        let mut session = opened();
        let bytes = hello_response(1, 9);
        let (head, tail) = bytes.split_at(3);

        assert!(session.receive(head).is_empty());
        let actions = session.receive(tail);

        assert_eq!(sent(&actions), [MessageType::ConnectRequest]);
    }

    #[test]
    fn test_bytes_after_disconnect_are_ignored() {
        let mut session = Session::new(SessionConfig::default());
        assert!(session.receive(&empty(MessageType::PingRequest)).is_empty());
    }

    // =====================================================================
    // Keepalive
    // =====================================================================

    #[test]
    fn test_keepalive_sends_ping_and_arms_watchdog() {
        let mut session = listed();

        let actions = session.on_timer(TimerKind::Keepalive);

        assert_eq!(sent(&actions), [MessageType::PingRequest]);
        assert_eq!(
            scheduled(&actions, TimerKind::PingTimeout),
            Some(Duration::from_secs(10))
        );
        assert!(scheduled(&actions, TimerKind::Keepalive).is_some());
    }

    #[test]
    fn test_ping_response_cancels_watchdog() {
        let mut session = listed();
        session.on_timer(TimerKind::Keepalive);

        let actions = session.receive(&empty(MessageType::PingResponse));

        assert_eq!(actions, [Action::Cancel(TimerKind::PingTimeout)]);
    }

    #[test]
    fn test_unanswered_ping_does_not_rearm_watchdog() {
        let mut session = listed();
        session.on_timer(TimerKind::Keepalive);

        let actions = session.on_timer(TimerKind::Keepalive);

        assert_eq!(sent(&actions), [MessageType::PingRequest]);
        assert_eq!(scheduled(&actions, TimerKind::PingTimeout), None);
    }

    #[test]
    fn test_ping_timeout_is_fatal() {
        let mut session = listed();
        session.on_timer(TimerKind::Keepalive);

        let actions = session.on_timer(TimerKind::PingTimeout);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            disconnect_reason(&actions),
            Some(DisconnectReason::Fatal(SessionError::PingTimeout(
                Duration::from_secs(10)
            )))
        );
    }

    #[test]
    fn test_keepalive_without_watchdog_config() {
        let mut session = Session::new(SessionConfig {
            ping_timeout: None,
            ..Default::default()
        });
        session.open().unwrap();
        let mut bytes = hello_response(1, 9);
        bytes.extend(connect_response(false));
        session.receive(&bytes);

        let actions = session.on_timer(TimerKind::Keepalive);

        assert_eq!(scheduled(&actions, TimerKind::PingTimeout), None);
    }

    #[test]
    fn test_peer_ping_is_answered() {
        let mut session = listed();
        let actions = session.receive(&empty(MessageType::PingRequest));
        assert_eq!(actions, [Action::Send(Outbound::PingResponse)]);
    }

    // =====================================================================
    // Disconnect
    // =====================================================================

    #[test]
    fn test_local_disconnect_waits_for_acknowledgement() {
        let mut session = listed();

        let actions = session.disconnect();

        assert_eq!(session.state(), ConnectionState::Disconnecting);
        assert_eq!(sent(&actions), [MessageType::DisconnectRequest]);
        assert_eq!(
            scheduled(&actions, TimerKind::DisconnectGrace),
            Some(Duration::from_secs(5))
        );
        assert!(actions.contains(&Action::Cancel(TimerKind::Keepalive)));
        assert!(!actions.contains(&Action::Close));

        let actions = session.receive(&empty(MessageType::DisconnectResponse));

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(disconnect_reason(&actions), Some(DisconnectReason::Requested));
        assert_eq!(actions.last(), Some(&Action::Close));
    }

    #[test]
    fn test_local_disconnect_grace_expiry_forces_close() {
        let mut session = listed();
        session.disconnect();

        let actions = session.on_timer(TimerKind::DisconnectGrace);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(actions.last(), Some(&Action::Close));
    }

    #[test]
    fn test_disconnect_twice_is_noop() {
        let mut session = listed();
        session.disconnect();
        assert!(session.disconnect().is_empty());
    }

    #[test]
    fn test_peer_disconnect_request_is_acknowledged() {
        let mut session = listed();

        let actions = session.receive(&empty(MessageType::DisconnectRequest));

        assert_eq!(sent(&actions), [MessageType::DisconnectResponse]);
        assert_eq!(disconnect_reason(&actions), Some(DisconnectReason::Peer));
        assert_eq!(actions.last(), Some(&Action::Close));
    }

    #[test]
    fn test_transport_error_tears_down() {
        let mut session = listed();

        let actions = session.transport_error("connection reset");

        assert_eq!(
            disconnect_reason(&actions),
            Some(DisconnectReason::TransportError("connection reset".into()))
        );
        assert!(session.transport_error("again").is_empty());
    }

    #[test]
    fn test_transport_closed_while_disconnecting_completes_request() {
        let mut session = listed();
        session.disconnect();

        let actions = session.transport_closed();

        assert_eq!(disconnect_reason(&actions), Some(DisconnectReason::Requested));
    }

    #[test]
    fn test_transport_closed_unexpectedly() {
        let mut session = listed();
        let actions = session.transport_closed();
        assert_eq!(
            disconnect_reason(&actions),
            Some(DisconnectReason::TransportClosed)
        );
    }

    // =====================================================================
    // Reconnect, commands, tracing
    // =====================================================================

    #[test]
    fn test_reopen_supersedes_registry() {
        let mut session = listed();
        session.transport_closed();
        assert_eq!(session.registry().len(), 1);

        session.open().unwrap();

        assert!(session.registry().is_empty());
        assert!(session.registry().lookup(EntityKey(0x10)).is_none());
    }

    #[test]
    fn test_command_before_connected_is_rejected() {
        let mut session = opened();
        let result = session.command(Command::Button { key: EntityKey(1) });
        assert_eq!(result, Err(SessionError::NotConnected));
    }

    #[test]
    fn test_command_when_connected_is_sent() {
        let mut session = listed();
        let command = Command::Switch {
            key: EntityKey(0x10),
            state: true,
        };

        let actions = session.command(command.clone()).unwrap();

        assert_eq!(actions, [Action::Send(Outbound::Command(command))]);
    }

    #[test]
    fn test_camera_request_when_connected() {
        let mut session = listed();
        let actions = session.request_camera_image(true, false).unwrap();
        assert_eq!(sent(&actions), [MessageType::CameraImageRequest]);
    }

    #[test]
    fn test_frame_trace_expires() {
        let mut session = Session::new(SessionConfig {
            frame_trace: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        let actions = session.open().unwrap();

        assert!(session.is_frame_trace_active());
        assert_eq!(
            scheduled(&actions, TimerKind::DebugLogExpiry),
            Some(Duration::from_secs(60))
        );

        session.on_timer(TimerKind::DebugLogExpiry);
        assert!(!session.is_frame_trace_active());
    }

    #[test]
    fn test_disconnect_event_serializes_reason_text() {
        let event = SessionEvent::Disconnected {
            reason: DisconnectReason::Fatal(SessionError::InvalidPassword),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "disconnected");
        assert_eq!(json["reason"]["reason"], "fatal");
        assert_eq!(json["reason"]["detail"], "node rejected the password");
    }
}
