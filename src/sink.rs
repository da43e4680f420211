use serde_json::{Map, Value};

use crate::audio::analyze::SignalLevel;
use crate::error::IntakeError;
use crate::session::ConnectionStatus;
use crate::session::conversation::Turn;

/// Field name → value, as extracted by the backend.
pub type FieldMap = Map<String, Value>;

/// Passive receiver of everything the session learns.
///
/// All calls happen on the session task, in the order the underlying
/// events arrived.
pub trait SessionSink {
    /// Partial update; merge into what you have.
    fn field_update(&mut self, fields: FieldMap);

    /// Complete analysis snapshot; replace what you have.
    fn analysis_update(&mut self, analysis: FieldMap);

    fn status(&mut self, _status: ConnectionStatus) {}

    fn level(&mut self, _signal: SignalLevel) {}

    /// The transcript changed; `turns` is the whole conversation so far.
    fn conversation(&mut self, _turns: &[Turn]) {}

    /// Informational text from the server.
    fn notice(&mut self, _message: &str) {}

    /// The session ended because of `error`.
    fn failure(&mut self, _error: &IntakeError) {}
}

/// Collected fields and the latest analysis.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FieldStore {
    fields: FieldMap,
    analysis: FieldMap,
}

impl FieldStore {
    pub fn merge_fields(&mut self, update: FieldMap) {
        for (name, value) in update {
            self.fields.insert(name, value);
        }
    }

    pub fn replace_analysis(&mut self, analysis: FieldMap) {
        self.analysis = analysis;
    }

    #[must_use]
    pub const fn fields(&self) -> &FieldMap {
        &self.fields
    }

    #[must_use]
    pub const fn analysis(&self) -> &FieldMap {
        &self.analysis
    }

    /// Whether any collected field has a non-empty value.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.fields.values().any(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
    }
}
