//! `Client` builder and the handle returned by a connection.
//!
//! This is the entry point for talking to a node. It ties together all
//! the layers: transport → protocol → session → timers, with a driver
//! task owning everything once connected.

use std::time::Duration;

use nodelink_protocol::{Command, DeviceInfo, EntityInfo};
use nodelink_session::{ConnectionState, Session, SessionConfig, SessionEvent};
use nodelink_transport::{Connector, TcpConnector};
use tokio::sync::{mpsc, oneshot, watch};

use crate::NodelinkError;
use crate::driver::{Driver, DriverCommand};

/// Stream of session events for one connection.
///
/// Ends after [`SessionEvent::Disconnected`] once the driver has stopped.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Default depth of the handle → driver request queue.
const DEFAULT_COMMAND_CAPACITY: usize = 32;

/// Entry point for connecting to a node.
pub struct Client;

impl Client {
    /// Creates a new builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

/// Builder for configuring and opening a node connection.
///
/// # Example
///
/// ```rust,ignore
/// use nodelink::prelude::*;
///
/// let (client, mut events) = Client::builder()
///     .address("192.168.1.40:6053")
///     .password("secret")
///     .connect()
///     .await?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// ```
pub struct ClientBuilder {
    address: Option<String>,
    config: SessionConfig,
    connector: TcpConnector,
    command_capacity: usize,
}

impl ClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            address: None,
            config: SessionConfig::default(),
            connector: TcpConnector::new(),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }

    /// Sets the node address (`host:port`).
    pub fn address(mut self, addr: &str) -> Self {
        self.address = Some(addr.to_string());
        self
    }

    /// Sets the session configuration.
    ///
    /// Replaces any password or client info set earlier, so call this
    /// first.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the password sent in the connect request.
    pub fn password(mut self, password: &str) -> Self {
        self.config.password = password.to_string();
        self
    }

    /// Sets the client identification sent in the hello.
    pub fn client_info(mut self, info: &str) -> Self {
        self.config.client_info = info.to_string();
        self
    }

    /// Sets how long the TCP connect may take.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connector = self.connector.with_connect_timeout(timeout);
        self
    }

    /// Sets how many requests may queue for the driver before handle
    /// calls wait.
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Opens the socket, starts the handshake and spawns the driver.
    ///
    /// Returns as soon as the socket is open. Watch the event receiver
    /// (or [`ClientHandle::wait_for`]) to learn when the node is
    /// connected.
    pub async fn connect(self) -> Result<(ClientHandle, EventReceiver), NodelinkError> {
        let address = self.address.ok_or(NodelinkError::MissingAddress)?;
        let conn = self.connector.connect(&address).await?;

        let mut session = Session::new(self.config.validated());
        let initial = session.open()?;

        let (command_tx, command_rx) = mpsc::channel(self.command_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(session.state());

        tracing::info!(%address, "connecting to node");
        let driver = Driver::new(conn, session, command_rx, event_tx, state_tx);
        tokio::spawn(driver.run(initial));

        let handle = ClientHandle {
            commands: command_tx,
            state: state_rx,
        };
        Ok((handle, event_rx))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle to a running connection.
///
/// Wraps the `mpsc::Sender` to the driver task. Dropping every handle
/// makes the driver disconnect from the node politely.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<DriverCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ClientHandle {
    /// Sends a command to one of the node's entities.
    ///
    /// Fails with `SessionError::NotConnected` until the handshake has
    /// completed.
    pub async fn command(&self, command: Command) -> Result<(), NodelinkError> {
        let (reply, rx) = oneshot::channel();
        self.request(DriverCommand::Command { command, reply }).await?;
        Ok(Self::await_reply(rx).await??)
    }

    /// Asks the node for a camera frame (`single`) or a stream of them.
    pub async fn request_camera_image(
        &self,
        single: bool,
        stream: bool,
    ) -> Result<(), NodelinkError> {
        let (reply, rx) = oneshot::channel();
        self.request(DriverCommand::CameraImage {
            single,
            stream,
            reply,
        })
        .await?;
        Ok(Self::await_reply(rx).await??)
    }

    /// Starts a polite disconnect.
    ///
    /// The [`SessionEvent::Disconnected`] event follows once the node
    /// acknowledges or the grace period runs out.
    pub async fn disconnect(&self) -> Result<(), NodelinkError> {
        let (reply, rx) = oneshot::channel();
        self.request(DriverCommand::Disconnect { reply }).await?;
        Self::await_reply(rx).await
    }

    /// Returns the entities listed by the node so far.
    pub async fn entities(&self) -> Result<Vec<EntityInfo>, NodelinkError> {
        let (reply, rx) = oneshot::channel();
        self.request(DriverCommand::Entities { reply }).await?;
        Self::await_reply(rx).await
    }

    /// Returns the node's device info, once it has been received.
    pub async fn device_info(&self) -> Result<Option<DeviceInfo>, NodelinkError> {
        let (reply, rx) = oneshot::channel();
        self.request(DriverCommand::DeviceInfo { reply }).await?;
        Self::await_reply(rx).await
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Waits until the connection reaches `target`.
    ///
    /// Returns [`NodelinkError::Closed`] if the driver stops first
    /// without ever reaching it.
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), NodelinkError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| NodelinkError::Closed)
    }

    /// Returns true once the driver task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request(&self, command: DriverCommand) -> Result<(), NodelinkError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NodelinkError::Closed)
    }

    async fn await_reply<T>(rx: oneshot::Receiver<T>) -> Result<T, NodelinkError> {
        rx.await.map_err(|_| NodelinkError::Closed)
    }
}

