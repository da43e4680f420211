use std::future::pending;

use serde_json::Map;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep, sleep_until};

use crate::audio::capture::CapturePipeline;
use crate::audio::playback::PlaybackQueue;
use crate::audio::{AudioGateway, PLAYBACK_SAMPLE_RATE};
use crate::config::Config;
use crate::error::{IntakeError, Result};
use crate::net::protocol::{ClientMessage, Role, ServerMessage};
use crate::net::{ChannelEvent, Connector, NORMAL_CLOSURE, Outbound};
use crate::sink::SessionSink;

use super::conversation::Conversation;
use super::{Command, ConnectionStatus, SessionState};

/// Everything that exists only while a session is live.
struct Live {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    channel_open: bool,
    /// Connect or handshake deadline, depending on the state.
    deadline: Option<Instant>,
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackQueue>,
    turn_boundary: Option<Instant>,
}

impl Live {
    fn send(&self, frame: Outbound) {
        if self.outbound.send(frame).is_err() {
            tracing::debug!("outbound frame dropped, channel task has ended");
        }
    }

    fn send_message(&self, message: &ClientMessage) {
        match message.to_json() {
            Ok(json) => self.send(Outbound::Text(json)),
            Err(e) => tracing::warn!("{e}"),
        }
    }
}

enum Wake {
    Command(Option<Command>),
    Channel(Option<ChannelEvent>),
    Capture(Option<Vec<f32>>),
    Deadline,
    TurnBoundary,
    PlaybackFinished,
}

/// Owns the channel, the microphone, the player and the conversation.
///
/// Every event is handled on the task awaiting [`SessionController::run`],
/// one at a time and in arrival order. Device handles need not be `Send`.
pub struct SessionController<G, C, S> {
    config: Config,
    gateway: G,
    connector: C,
    sink: S,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    live: Option<Live>,
    pending_start: Option<oneshot::Sender<Result<()>>>,
    synthesis_playing: bool,
    conversation: Conversation,
}

impl<G, C, S> SessionController<G, C, S>
where
    G: AudioGateway,
    C: Connector,
    S: SessionSink,
{
    pub(crate) fn new(
        config: Config,
        gateway: G,
        connector: C,
        sink: S,
        commands: mpsc::Receiver<Command>,
        status: watch::Sender<ConnectionStatus>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            config,
            gateway,
            connector,
            sink,
            commands,
            status,
            state_tx,
            state: SessionState::Idle,
            live: None,
            pending_start: None,
            synthesis_playing: false,
            conversation: Conversation::new(),
        }
    }

    /// Process commands and session events until every handle is dropped.
    pub async fn run(mut self) {
        loop {
            match self.next_wake().await {
                Wake::Command(Some(Command::Start { reply })) => self.start(reply),
                Wake::Command(Some(Command::Stop { reply })) => {
                    self.stop().await;
                    let _ = reply.send(());
                }
                Wake::Command(None) => {
                    self.stop().await;
                    break;
                }
                Wake::Channel(Some(event)) => self.on_channel_event(event),
                Wake::Channel(None) => {
                    self.fail(IntakeError::Channel("channel task ended".to_string()));
                }
                Wake::Capture(Some(block)) => self.on_capture_block(&block),
                Wake::Capture(None) => {
                    self.fail(IntakeError::Audio("microphone stream ended".to_string()));
                }
                Wake::Deadline => self.on_deadline(),
                Wake::TurnBoundary => {
                    if let Some(live) = self.live.as_mut() {
                        live.turn_boundary = None;
                    }
                    self.conversation.close_assistant_turn();
                    tracing::debug!("assistant turn closed");
                }
                Wake::PlaybackFinished => {
                    if let Some(playback) = self.live.as_mut().and_then(|l| l.playback.as_mut()) {
                        playback.advance();
                    }
                }
            }
        }

        tracing::debug!("session controller exiting");
    }

    async fn next_wake(&mut self) -> Wake {
        let Some(live) = self.live.as_mut() else {
            return Wake::Command(self.commands.recv().await);
        };

        tokio::select! {
            command = self.commands.recv() => Wake::Command(command),
            event = live.inbound.recv() => Wake::Channel(event),
            block = next_block(live.capture.as_mut()) => Wake::Capture(block),
            () = sleep_opt(live.deadline) => Wake::Deadline,
            () = sleep_opt(live.turn_boundary) => Wake::TurnBoundary,
            () = playback_finished(live.playback.as_mut()) => Wake::PlaybackFinished,
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn start(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.state != SessionState::Idle {
            tracing::debug!("start ignored, session is {:?}", self.state);
            let _ = reply.send(Ok(()));
            return;
        }

        let url = &self.config.server.url;
        tracing::info!("connecting to {url}");
        let duplex = self.connector.open(url);

        self.live = Some(Live {
            outbound: duplex.outbound,
            inbound: duplex.inbound,
            channel_open: false,
            deadline: Some(Instant::now() + self.config.server.connect_timeout()),
            capture: None,
            playback: None,
            turn_boundary: None,
        });
        self.pending_start = Some(reply);
        self.set_status(ConnectionStatus::Connecting);
        self.set_state(SessionState::Connecting);
    }

    async fn stop(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.set_state(SessionState::Closing);

        if let Some(live) = self.live.as_ref() {
            if live.channel_open {
                live.send_message(&ClientMessage::EndOfAudio);
                // let in-flight audio reach the server before closing
                sleep(self.config.server.close_flush()).await;
            }
            live.send(Outbound::Close);
        }

        self.teardown();
        self.set_status(ConnectionStatus::Disconnected);
        self.set_state(SessionState::Idle);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(IntakeError::Stopped));
        }
        tracing::info!("session stopped");
    }

    // -----------------------------------------------------------------------
    // Channel
    // -----------------------------------------------------------------------

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_open(),
            ChannelEvent::Text(text) => match ServerMessage::parse(&text) {
                Ok(message) => self.on_message(message),
                Err(e) => tracing::warn!("ignoring inbound message: {e}"),
            },
            ChannelEvent::Binary(bytes) => self.on_speech(&bytes),
            ChannelEvent::Closed {
                code: Some(NORMAL_CLOSURE),
                reason,
            } => self.on_normal_close(&reason),
            ChannelEvent::Closed { code, reason } => self.fail(IntakeError::AbnormalClose {
                // 1005: no status code was present
                code: code.unwrap_or(1005),
                reason,
            }),
            ChannelEvent::Error(message) => self.fail(IntakeError::Channel(message)),
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            tracing::debug!("unexpected open event while {:?}", self.state);
            return;
        }
        let Some(live) = self.live.as_mut() else {
            return;
        };

        live.channel_open = true;
        live.deadline = Some(Instant::now() + self.config.server.handshake_timeout());
        live.send_message(&ClientMessage::handshake());

        tracing::info!("connected, sent audio config");
        self.set_status(ConnectionStatus::Connected);
        self.set_state(SessionState::AwaitingConfigAck);
    }

    fn on_normal_close(&mut self, reason: &str) {
        tracing::info!("server closed the session: {reason}");
        self.teardown();
        self.set_status(ConnectionStatus::Disconnected);
        self.set_state(SessionState::Idle);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(IntakeError::Channel(
                "server closed the connection before streaming began".to_string(),
            )));
        }
    }

    fn on_deadline(&mut self) {
        match self.state {
            SessionState::Connecting => {
                let timeout = self.config.server.connect_timeout();
                self.fail(IntakeError::ConnectTimeout(timeout));
            }
            SessionState::AwaitingConfigAck => {
                let timeout = self.config.server.handshake_timeout();
                self.fail(IntakeError::HandshakeTimeout(timeout));
            }
            _ => {
                if let Some(live) = self.live.as_mut() {
                    live.deadline = None;
                }
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        tracing::debug!(kind = message.kind(), "inbound message");

        match message {
            ServerMessage::ConfigAck => self.on_config_ack(),
            ServerMessage::TtsStart => self.set_synthesis_playing(true),
            ServerMessage::TtsEnd => self.set_synthesis_playing(false),
            ServerMessage::Transcript { text, is_final } => {
                if is_final && self.conversation.final_transcript(&text) {
                    self.publish_conversation();
                }
            }
            ServerMessage::ChatMessage {
                text,
                role: Role::Assistant,
            } => {
                if self.conversation.assistant_fragment(&text) {
                    if let Some(live) = self.live.as_mut() {
                        live.turn_boundary =
                            Some(Instant::now() + self.config.conversation.turn_gap());
                    }
                    self.publish_conversation();
                }
            }
            ServerMessage::ChatMessage {
                text,
                role: Role::User,
            } => {
                if self.conversation.user_message(&text) {
                    self.publish_conversation();
                }
            }
            ServerMessage::FieldExtracted { field, value }
            | ServerMessage::FieldConfirmed { field, value }
            | ServerMessage::FieldPending { field, value } => {
                let mut update = Map::new();
                update.insert(field, value);
                self.sink.field_update(update);
            }
            ServerMessage::ExtractedFields { data } => self.sink.field_update(data),
            ServerMessage::LoanCalculations { data } => self.sink.analysis_update(data),
            ServerMessage::EmailStatus { status, to } => {
                tracing::info!("email {status}: {to}");
                self.sink.notice(&format!("email {status}: {to}"));
            }
            ServerMessage::Info { message } => {
                tracing::info!("server: {message}");
                self.sink.notice(&message);
            }
            ServerMessage::Error { message } => {
                tracing::warn!("server reported an error: {message}");
                self.sink.notice(&message);
            }
            ServerMessage::Unknown => {}
        }
    }

    fn on_config_ack(&mut self) {
        if self.state != SessionState::AwaitingConfigAck {
            tracing::debug!("unexpected config_ack while {:?}", self.state);
            return;
        }

        let capture = match CapturePipeline::start(&self.gateway, &self.config.capture) {
            Ok(capture) => capture,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        if self.synthesis_playing {
            capture.set_enabled(false);
        }
        tracing::info!("audio config acknowledged, streaming from {}", capture.device().name);

        if let Some(live) = self.live.as_mut() {
            live.deadline = None;
            live.capture = Some(capture);
        }

        self.set_state(SessionState::Streaming);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn set_synthesis_playing(&mut self, playing: bool) {
        self.synthesis_playing = playing;
        if let Some(capture) = self.live.as_ref().and_then(|l| l.capture.as_ref()) {
            capture.set_enabled(!playing);
        }
        if playing {
            tracing::debug!("assistant speaking, microphone muted");
        } else {
            tracing::debug!("assistant finished, microphone live");
        }
    }

    fn on_speech(&mut self, pcm16: &[u8]) {
        let Some(live) = self.live.as_mut() else {
            return;
        };

        if live.playback.is_none() {
            match self.gateway.open_playback(PLAYBACK_SAMPLE_RATE) {
                Ok(output) => {
                    live.playback = Some(PlaybackQueue::new(
                        output,
                        PLAYBACK_SAMPLE_RATE,
                        self.config.playback.fallback_margin(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("dropping synthesized speech: {e}");
                    return;
                }
            }
        }

        if let Some(playback) = live.playback.as_mut() {
            playback.enqueue(pcm16);
        }
    }

    // -----------------------------------------------------------------------
    // Microphone
    // -----------------------------------------------------------------------

    fn on_capture_block(&mut self, block: &[f32]) {
        let hold = self.config.playback.hold_mute_during_playback;
        let Some(live) = self.live.as_mut() else {
            return;
        };

        let speaking = live.playback.as_ref().is_some_and(PlaybackQueue::is_busy);
        let muted = self.synthesis_playing || !live.channel_open || (hold && speaking);

        let Some(capture) = live.capture.as_mut() else {
            return;
        };
        let processed = capture.process(block, Instant::now(), muted);
        if let Some(chunk) = processed.chunk {
            live.send(Outbound::Binary(chunk));
        }

        self.sink.level(processed.signal);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn fail(&mut self, error: IntakeError) {
        tracing::error!("session failed: {error}");
        self.set_state(SessionState::Error);
        self.set_status(ConnectionStatus::Error);
        self.teardown();
        self.sink.failure(&error);
        self.set_state(SessionState::Idle);

        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(error));
        }
    }

    /// Release every resource of the live session. Dropping the outbound
    /// sender ends the channel task.
    fn teardown(&mut self) {
        if let Some(mut live) = self.live.take() {
            if let Some(mut playback) = live.playback.take() {
                playback.reset();
            }
            if let Some(mut capture) = live.capture.take() {
                capture.stop();
            }
        }
        self.synthesis_playing = false;
        self.conversation.close_assistant_turn();
    }

    fn publish_conversation(&mut self) {
        self.sink.conversation(self.conversation.turns());
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if *self.status.borrow() == status {
            return;
        }
        self.status.send_replace(status);
        self.sink.status(status);
    }
}

async fn next_block(capture: Option<&mut CapturePipeline>) -> Option<Vec<f32>> {
    match capture {
        Some(capture) => capture.next_block().await,
        None => pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn playback_finished(playback: Option<&mut PlaybackQueue>) {
    match playback {
        Some(playback) => playback.finished().await,
        None => pending().await,
    }
}
