use std::time::{Duration, Instant};

use serde_json::Value;

use crate::audio::analyze::SignalLevel;
use crate::audio::device::CpalGateway;
use crate::config::Config;
use crate::error::{IntakeError, Result};
use crate::net::client::WsConnector;
use crate::session::conversation::{Speaker, Turn};
use crate::session::{self, ConnectionStatus, SessionHandle, SessionState};
use crate::sink::{FieldMap, FieldStore, SessionSink};

/// Prints the conversation and the collected fields to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    store: FieldStore,
    last_turn: Option<(usize, String)>,
    last_meter: Option<Instant>,
}

const METER_INTERVAL: Duration = Duration::from_millis(500);
const METER_WIDTH: usize = 20;

/// Draw a mic level as a fixed-width bar.
fn meter(signal: SignalLevel) -> String {
    let level = signal.level.min(100);
    let filled = usize::from(level) * METER_WIDTH / 100;
    format!(
        "[{}{}] {level:>3}{}",
        "#".repeat(filled),
        "-".repeat(METER_WIDTH - filled),
        if signal.has_speech { " speech" } else { "" }
    )
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

impl ConsoleSink {
    /// At most one meter line per interval.
    fn meter_due(&mut self, now: Instant) -> bool {
        if self
            .last_meter
            .is_some_and(|last| now.saturating_duration_since(last) < METER_INTERVAL)
        {
            return false;
        }
        self.last_meter = Some(now);
        true
    }

    fn print_fields(&self) {
        if !self.store.has_data() {
            return;
        }
        println!("Collected:");
        for (name, value) in self.store.fields() {
            println!("  {name}: {}", render(value));
        }
    }
}

impl SessionSink for ConsoleSink {
    fn field_update(&mut self, fields: FieldMap) {
        for (name, value) in &fields {
            println!("  [{name}] {}", render(value));
        }
        self.store.merge_fields(fields);
    }

    fn analysis_update(&mut self, analysis: FieldMap) {
        println!("Analysis:");
        for (name, value) in &analysis {
            println!("  {name}: {}", render(value));
        }
        self.store.replace_analysis(analysis);
    }

    fn level(&mut self, signal: SignalLevel) {
        if self.meter_due(Instant::now()) {
            tracing::debug!("mic {}", meter(signal));
        }
    }

    fn status(&mut self, status: ConnectionStatus) {
        tracing::info!("status: {status}");
        if status == ConnectionStatus::Disconnected {
            self.print_fields();
        }
    }

    fn conversation(&mut self, turns: &[Turn]) {
        let Some(turn) = turns.last() else {
            return;
        };
        let current = (turns.len(), turn.text.clone());
        if self.last_turn.as_ref() == Some(&current) {
            return;
        }

        let who = match turn.speaker {
            Speaker::User => "you",
            Speaker::Assistant => "assistant",
        };
        println!("{} {who}: {}", turn.started_at.format("%H:%M:%S"), turn.text);
        self.last_turn = Some(current);
    }

    fn notice(&mut self, message: &str) {
        println!("* {message}");
    }

    fn failure(&mut self, error: &IntakeError) {
        eprintln!("{}", error.explain());
        if error.is_device_error() {
            eprintln!("Run `intake devices` to see the available devices.");
        }
    }
}

/// Talk to the server from this machine's microphone and speakers until
/// Ctrl+C or until the server ends the session.
pub async fn run_live(config: Config) -> Result<()> {
    let gateway = CpalGateway::new(config.playback.device.clone());
    let (handle, controller) = session::new(config, gateway, WsConnector, ConsoleSink::default());

    let ((), result) = tokio::join!(controller.run(), drive(handle));
    result
}

async fn drive(handle: SessionHandle) -> Result<()> {
    handle.start().await?;
    println!("Listening. Press Ctrl+C to finish.");

    let mut state = handle.subscribe_state();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("failed to listen for Ctrl+C: {e}");
            }
            tracing::info!("received Ctrl+C, shutting down...");
        }
        _ = state.wait_for(|s| *s == SessionState::Idle) => {
            tracing::info!("session ended");
        }
    }

    handle.stop().await
}
