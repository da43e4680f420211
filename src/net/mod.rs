pub mod client;
pub mod protocol;

use tokio::sync::mpsc;

/// Close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Everything the far side of a duplex channel can tell us, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Text(String),
    Binary(Vec<u8>),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Frames the session wants written to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    /// Close with normal closure. Dropping the sender has the same effect.
    Close,
}

/// One duplex channel as seen by the session: a sender for outbound frames
/// and a single ordered stream of inbound events, starting with
/// [`ChannelEvent::Open`] once the connection is up.
pub struct Duplex {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens duplex channels. Opening never blocks; progress arrives as events.
pub trait Connector {
    fn open(&self, url: &str) -> Duplex;
}
