//! The connection driver: the single task that owns a session.
//!
//! The session, its socket and its timers live inside one Tokio task.
//! Everything else talks to it through channels, so no lock ever guards
//! protocol state. This is the actor model: handles send
//! [`DriverCommand`]s in, events flow out.
//!
//! Each loop iteration waits on whichever comes first (bytes from the
//! socket, a due timer, or a command), feeds it to the session, and then
//! carries out the returned actions in order.

use std::collections::VecDeque;

use nodelink_protocol::{Command, DeviceInfo, EntityInfo};
use nodelink_session::{Action, ConnectionState, Session, SessionError, SessionEvent, TimerKind};
use nodelink_timer::Timers;
use nodelink_transport::{Connection, TransportError};
use tokio::sync::{mpsc, oneshot, watch};

/// Requests a [`ClientHandle`](crate::ClientHandle) can make.
///
/// The `oneshot::Sender` in each variant is a reply channel: the driver
/// answers on it once the request has been applied to the session.
pub(crate) enum DriverCommand {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    CameraImage {
        single: bool,
        stream: bool,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Entities {
        reply: oneshot::Sender<Vec<EntityInfo>>,
    },
    DeviceInfo {
        reply: oneshot::Sender<Option<DeviceInfo>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Driver<C> {
    conn: C,
    session: Session,
    timers: Timers<TimerKind>,
    commands: mpsc::Receiver<DriverCommand>,
    /// False once every handle has been dropped.
    commands_open: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<ConnectionState>,
}

impl<C> Driver<C>
where
    C: Connection<Error = TransportError>,
{
    pub(crate) fn new(
        conn: C,
        session: Session,
        commands: mpsc::Receiver<DriverCommand>,
        events: mpsc::UnboundedSender<SessionEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            conn,
            session,
            timers: Timers::new(),
            commands,
            commands_open: true,
            events,
            state,
        }
    }

    /// Runs the driver until the session closes its transport.
    ///
    /// `initial` holds the actions returned by [`Session::open`].
    pub(crate) async fn run(mut self, initial: Vec<Action>) {
        let conn_id = self.conn.id();
        tracing::debug!(%conn_id, "driver started");

        let mut flow = self.apply(initial).await;
        while flow == Flow::Continue {
            let actions = tokio::select! {
                received = self.conn.recv() => match received {
                    Ok(Some(bytes)) => self.session.receive(&bytes),
                    Ok(None) => self.session.transport_closed(),
                    Err(e) => self.session.transport_error(e.to_string()),
                },
                expired = self.timers.next_expired() => {
                    self.session.on_timer(expired.key)
                }
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => handle_command(&mut self.session, command),
                    None => {
                        tracing::info!("all client handles dropped, disconnecting");
                        self.commands_open = false;
                        self.session.disconnect()
                    }
                },
            };
            flow = self.apply(actions).await;
        }

        self.timers.clear();
        tracing::debug!(%conn_id, "driver stopped");
    }

    /// Carries out session actions in order.
    ///
    /// A failed write is itself fed back to the session as a transport
    /// error, and whatever that produces is appended to the queue.
    async fn apply(&mut self, actions: Vec<Action>) -> Flow {
        let mut queue = VecDeque::from(actions);
        let mut flow = Flow::Continue;

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(message) => {
                    if flow == Flow::Stop {
                        continue;
                    }
                    if let Err(e) = self.conn.send(&message.to_frame()).await {
                        tracing::warn!(error = %e, "write failed");
                        queue.extend(self.session.transport_error(e.to_string()));
                    }
                }
                Action::Emit(event) => {
                    if let SessionEvent::StateChanged { state } = &event {
                        self.state.send_replace(*state);
                    }
                    if self.events.send(event).is_err() {
                        tracing::trace!("event receiver dropped");
                    }
                }
                Action::Schedule {
                    timer,
                    after,
                    jitter,
                } => {
                    self.timers.schedule_jittered(timer, after, jitter);
                }
                Action::Cancel(timer) => {
                    self.timers.cancel_key(timer);
                }
                Action::Close => {
                    if let Err(e) = self.conn.close().await {
                        tracing::debug!(error = %e, "close failed");
                    }
                    flow = Flow::Stop;
                }
            }
        }
        flow
    }
}

fn handle_command(session: &mut Session, command: DriverCommand) -> Vec<Action> {
    match command {
        DriverCommand::Command { command, reply } => {
            respond(reply, session.command(command))
        }
        DriverCommand::CameraImage {
            single,
            stream,
            reply,
        } => respond(reply, session.request_camera_image(single, stream)),
        DriverCommand::Disconnect { reply } => {
            let actions = session.disconnect();
            let _ = reply.send(());
            actions
        }
        DriverCommand::Entities { reply } => {
            let _ = reply.send(session.registry().to_vec());
            Vec::new()
        }
        DriverCommand::DeviceInfo { reply } => {
            let _ = reply.send(session.device_info().cloned());
            Vec::new()
        }
    }
}

/// Reports a request's outcome to the caller and passes its actions on.
fn respond(
    reply: oneshot::Sender<Result<(), SessionError>>,
    result: Result<Vec<Action>, SessionError>,
) -> Vec<Action> {
    match result {
        Ok(actions) => {
            let _ = reply.send(Ok(()));
            actions
        }
        Err(e) => {
            let _ = reply.send(Err(e));
            Vec::new()
        }
    }
}
