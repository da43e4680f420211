//! In-memory stand-ins for the audio host, the server and the UI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};

use crate::audio::analyze::SignalLevel;
use crate::audio::{
    AudioGateway, CaptureHandle, CaptureRequest, CaptureStream, DeviceInfo, PlaybackOutput,
};
use crate::error::{IntakeError, Result};
use crate::net::{ChannelEvent, Connector, Duplex, Outbound};
use crate::session::ConnectionStatus;
use crate::session::conversation::Turn;
use crate::sink::{FieldMap, FieldStore, SessionSink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Let every runnable task make progress. With a paused clock this also
/// advances time by a millisecond.
pub(crate) async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        settle().await;
    }
    panic!("condition never became true");
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

struct GatewayState {
    sample_rate: u32,
    deny: bool,
    block_tx: Option<mpsc::Sender<Vec<f32>>>,
    opens: usize,
    stops: usize,
}

#[derive(Clone)]
pub(crate) struct FakeGateway {
    state: Arc<Mutex<GatewayState>>,
    enabled: Arc<AtomicBool>,
    playback: PlaybackLog,
}

impl FakeGateway {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(GatewayState {
                sample_rate,
                deny: false,
                block_tx: None,
                opens: 0,
                stops: 0,
            })),
            enabled: Arc::new(AtomicBool::new(true)),
            playback: PlaybackLog::default(),
        }
    }

    pub(crate) fn deny_microphone(&self) {
        lock(&self.state).deny = true;
    }

    pub(crate) fn capture_opens(&self) -> usize {
        lock(&self.state).opens
    }

    pub(crate) fn capture_stops(&self) -> usize {
        lock(&self.state).stops
    }

    pub(crate) fn mic_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Deliver one block as if the device produced it.
    pub(crate) async fn feed(&self, block: Vec<f32>) {
        let sender = lock(&self.state).block_tx.clone();
        let sender = sender.unwrap_or_else(|| panic!("microphone is not open"));
        sender
            .send(block)
            .await
            .unwrap_or_else(|e| panic!("capture receiver gone: {e}"));
    }

    pub(crate) fn playback(&self) -> PlaybackLog {
        self.playback.clone()
    }
}

impl AudioGateway for FakeGateway {
    fn open_capture(&self, request: &CaptureRequest) -> Result<CaptureHandle> {
        let mut state = lock(&self.state);
        if state.deny {
            return Err(IntakeError::PermissionDenied(
                "microphone access refused".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        state.block_tx = Some(tx);
        state.opens += 1;
        self.enabled.store(true, Ordering::SeqCst);

        let info = DeviceInfo {
            name: request
                .device
                .clone()
                .unwrap_or_else(|| "fake microphone".to_string()),
            sample_rate: state.sample_rate,
            channels: request.channels,
        };

        Ok(CaptureHandle {
            stream: Box::new(FakeCapture {
                info,
                enabled: Arc::clone(&self.enabled),
                state: Arc::clone(&self.state),
                stopped: false,
            }),
            blocks: rx,
        })
    }

    fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackOutput>> {
        Ok(Box::new(FakePlayback {
            sample_rate,
            log: self.playback.clone(),
        }))
    }
}

struct FakeCapture {
    info: DeviceInfo,
    enabled: Arc<AtomicBool>,
    state: Arc<Mutex<GatewayState>>,
    stopped: bool,
}

impl CaptureStream for FakeCapture {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let mut state = lock(&self.state);
        state.stops += 1;
        state.block_tx = None;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Played {
    pub samples: usize,
    pub ends_run: bool,
    pub started: Instant,
    pub ended: Option<Instant>,
}

#[derive(Default)]
struct LogState {
    played: Vec<Played>,
    stops: usize,
    drop_completions: bool,
    held: Vec<oneshot::Sender<()>>,
}

#[derive(Clone, Default)]
pub(crate) struct PlaybackLog {
    state: Arc<Mutex<LogState>>,
}

impl PlaybackLog {
    pub(crate) fn played(&self) -> Vec<Played> {
        lock(&self.state).played.clone()
    }

    pub(crate) fn stops(&self) -> usize {
        lock(&self.state).stops
    }

    /// Never report completion, as if the device missed it.
    pub(crate) fn drop_completions(&self) {
        lock(&self.state).drop_completions = true;
    }
}

/// Plays nothing; reports completion after the buffer's real duration.
pub(crate) struct FakePlayback {
    sample_rate: u32,
    log: PlaybackLog,
}

impl FakePlayback {
    pub(crate) fn new(sample_rate: u32) -> (Self, PlaybackLog) {
        let log = PlaybackLog::default();
        (
            Self {
                sample_rate,
                log: log.clone(),
            },
            log,
        )
    }
}

impl PlaybackOutput for FakePlayback {
    fn schedule(&mut self, samples: Vec<f32>, ends_run: bool) -> Result<oneshot::Receiver<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / f64::from(self.sample_rate));

        let index = {
            let mut state = lock(&self.log.state);
            state.played.push(Played {
                samples: samples.len(),
                ends_run,
                started: Instant::now(),
                ended: None,
            });
            if state.drop_completions {
                state.held.push(done_tx);
                return Ok(done_rx);
            }
            state.played.len() - 1
        };

        let log = self.log.clone();
        tokio::spawn(async move {
            sleep(duration).await;
            lock(&log.state).played[index].ended = Some(Instant::now());
            let _ = done_tx.send(());
        });

        Ok(done_rx)
    }

    fn stop(&mut self) {
        lock(&self.log.state).stops += 1;
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The server's side of one fake connection.
pub(crate) struct ServerEnd {
    pub url: String,
    events: mpsc::UnboundedSender<ChannelEvent>,
    pub frames: mpsc::UnboundedReceiver<Outbound>,
}

impl ServerEnd {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn open(&self) {
        self.emit(ChannelEvent::Open);
    }

    pub(crate) fn send_json(&self, value: &Value) {
        self.emit(ChannelEvent::Text(value.to_string()));
    }

    pub(crate) fn send_text(&self, text: &str) {
        self.emit(ChannelEvent::Text(text.to_string()));
    }

    pub(crate) fn send_binary(&self, bytes: Vec<u8>) {
        self.emit(ChannelEvent::Binary(bytes));
    }

    pub(crate) fn close(&self, code: u16, reason: &str) {
        self.emit(ChannelEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    pub(crate) fn fail(&self, message: &str) {
        self.emit(ChannelEvent::Error(message.to_string()));
    }

    pub(crate) async fn next_frame(&mut self) -> Option<Outbound> {
        self.frames.recv().await
    }

    /// Next text frame as JSON, skipping audio.
    pub(crate) async fn next_json(&mut self) -> Value {
        loop {
            match self.frames.recv().await {
                Some(Outbound::Text(text)) => {
                    return serde_json::from_str(&text).unwrap_or_else(|e| panic!("{e}"));
                }
                Some(Outbound::Binary(_)) => {}
                Some(Outbound::Close) => panic!("channel closed while waiting for text"),
                None => panic!("client dropped the channel while waiting for text"),
            }
        }
    }
}

/// Hands every opened connection's server side to the test.
pub(crate) struct FakeConnector {
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, receiver) = mpsc::unbounded_channel();
        (Self { servers }, receiver)
    }
}

impl Connector for FakeConnector {
    fn open(&self, url: &str) -> Duplex {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let _ = self.servers.send(ServerEnd {
            url: url.to_string(),
            events: inbound_tx,
            frames: outbound_rx,
        });

        Duplex {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Recorded {
    pub store: FieldStore,
    pub field_updates: usize,
    pub levels: Vec<SignalLevel>,
    pub statuses: Vec<ConnectionStatus>,
    pub turns: Vec<Turn>,
    pub notices: Vec<String>,
    pub failures: Vec<String>,
}

#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    pub(crate) fn with<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        f(&lock(&self.recorded))
    }
}

impl SessionSink for RecordingSink {
    fn field_update(&mut self, fields: FieldMap) {
        let mut recorded = lock(&self.recorded);
        recorded.field_updates += 1;
        recorded.store.merge_fields(fields);
    }

    fn analysis_update(&mut self, analysis: FieldMap) {
        lock(&self.recorded).store.replace_analysis(analysis);
    }

    fn status(&mut self, status: ConnectionStatus) {
        lock(&self.recorded).statuses.push(status);
    }

    fn level(&mut self, signal: SignalLevel) {
        lock(&self.recorded).levels.push(signal);
    }

    fn conversation(&mut self, turns: &[Turn]) {
        lock(&self.recorded).turns = turns.to_vec();
    }

    fn notice(&mut self, message: &str) {
        lock(&self.recorded).notices.push(message.to_string());
    }

    fn failure(&mut self, error: &IntakeError) {
        lock(&self.recorded).failures.push(error.to_string());
    }
}
