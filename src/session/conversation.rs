use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One coalesced block of text attributed to one speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    fn new(speaker: Speaker, text: &str) -> Self {
        Self {
            speaker,
            text: text.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Derived transcript of the dialogue.
///
/// Assistant text arrives as many small fragments; they are appended to the
/// trailing assistant turn until [`Conversation::close_assistant_turn`]
/// marks a response boundary.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
    assistant_open: bool,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// A final recognition of the user's speech. Replaces the trailing user
    /// turn if there is one. Returns whether anything changed.
    pub fn final_transcript(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        match self.turns.last_mut() {
            Some(last) if last.speaker == Speaker::User => last.text = text.to_string(),
            _ => self.turns.push(Turn::new(Speaker::User, text)),
        }
        true
    }

    /// A user line relayed by the server; always its own turn.
    pub fn user_message(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        self.turns.push(Turn::new(Speaker::User, text));
        true
    }

    /// One fragment of an assistant response.
    pub fn assistant_fragment(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        match self.turns.last_mut() {
            Some(last) if last.speaker == Speaker::Assistant && self.assistant_open => {
                if !last.text.is_empty() {
                    last.text.push(' ');
                }
                last.text.push_str(text);
            }
            _ => {
                self.turns.push(Turn::new(Speaker::Assistant, text));
                self.assistant_open = true;
            }
        }
        true
    }

    /// The assistant went quiet; its next fragment starts a new turn.
    pub fn close_assistant_turn(&mut self) {
        self.assistant_open = false;
    }
}
