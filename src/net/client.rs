use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::{ChannelEvent, Connector, Duplex, Outbound};

/// Opens websocket channels. Each channel runs in its own task, bridged to
/// the session by unbounded channels. Must be called inside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: &str) -> Duplex {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(url.to_string(), outbound_rx, inbound_tx));

        Duplex {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }
    }
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<ChannelEvent>,
) {
    tracing::debug!("connecting to {url}");

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        // The session gave up (timeout or stop) before we got through.
        _ = outbound.recv() => {
            tracing::debug!("connect to {url} abandoned");
            return;
        }
    };

    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let _ = inbound.send(ChannelEvent::Error(format!("failed to connect to {url}: {e}")));
            return;
        }
    };

    if inbound.send(ChannelEvent::Open).is_err() {
        return;
    }

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let message = match frame {
                    Some(Outbound::Text(text)) => Message::Text(text),
                    Some(Outbound::Binary(bytes)) => Message::Binary(bytes),
                    Some(Outbound::Close) | None => {
                        let close = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closed".into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(close))).await {
                            tracing::debug!("close frame not sent: {e}");
                        }
                        let _ = sink.close().await;
                        tracing::debug!("websocket closed by client");
                        return;
                    }
                };
                if let Err(e) = sink.send(message).await {
                    let _ = inbound.send(ChannelEvent::Error(format!("send failed: {e}")));
                    return;
                }
            }
            frame = source.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => ChannelEvent::Text(text),
                    Some(Ok(Message::Binary(bytes))) => ChannelEvent::Binary(bytes),
                    Some(Ok(Message::Close(close))) => {
                        let (code, reason) = close.map_or((None, String::new()), |f| {
                            (Some(u16::from(f.code)), f.reason.to_string())
                        });
                        let _ = inbound.send(ChannelEvent::Closed { code, reason });
                        return;
                    }
                    // Ping/pong are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = inbound.send(ChannelEvent::Error(format!("receive failed: {e}")));
                        return;
                    }
                    None => {
                        let _ = inbound.send(ChannelEvent::Closed {
                            code: None,
                            reason: "connection dropped".to_string(),
                        });
                        return;
                    }
                };
                if inbound.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
