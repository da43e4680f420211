pub mod controller;
pub mod conversation;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use tokio::sync::{mpsc, oneshot, watch};

use crate::audio::AudioGateway;
use crate::config::Config;
use crate::error::{IntakeError, Result};
use crate::net::Connector;
use crate::sink::SessionSink;

pub use self::controller::SessionController;

/// Connection status as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Lifecycle of one recording attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    AwaitingConfigAck,
    Streaming,
    Closing,
    /// Transient: a fatal failure is being torn down.
    Error,
}

pub(crate) enum Command {
    Start { reply: oneshot::Sender<Result<()>> },
    Stop { reply: oneshot::Sender<()> },
}

/// Cloneable front door to a running [`SessionController`].
///
/// When every handle is dropped the controller tears the session down and
/// its `run` future completes.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Start a session. Resolves once audio is streaming, or with the reason
    /// it could not get there. Starting while a session is live is a no-op.
    pub async fn start(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start { reply })
            .await
            .map_err(|_| IntakeError::ControllerGone)?;
        response.await.map_err(|_| IntakeError::ControllerGone)?
    }

    /// Stop the session and release every device. Safe in any state.
    pub async fn stop(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply })
            .await
            .map_err(|_| IntakeError::ControllerGone)?;
        response.await.map_err(|_| IntakeError::ControllerGone)
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

/// Build a controller and its handle. Drive the controller by awaiting
/// [`SessionController::run`] on the current task.
pub fn new<G, C, S>(
    config: Config,
    gateway: G,
    connector: C,
    sink: S,
) -> (SessionHandle, SessionController<G, C, S>)
where
    G: AudioGateway,
    C: Connector,
    S: SessionSink,
{
    let (command_tx, command_rx) = mpsc::channel(8);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);

    let handle = SessionHandle {
        commands: command_tx,
        status: status_rx,
        state: state_rx,
    };
    let controller =
        SessionController::new(config, gateway, connector, sink, command_rx, status_tx, state_tx);

    (handle, controller)
}
