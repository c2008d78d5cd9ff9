//! WebSocket client for the futures depth-diff stream
//!
//! Connects to `<symbol>@depth@100ms` and forwards parsed diffs to the
//! depth task over an unbounded channel. Reconnects with exponential
//! backoff (1s doubling, capped at 30s) and honors supervisor reconnect
//! requests by dropping the connection at the next suspension point.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::book::types::DepthDiff;
use crate::supervisor::{StreamLink, StreamState};
use std::sync::Arc;

const FUTURES_WS_URL: &str = "wss://fstream.binance.com/ws";

const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// One parsed frame off the depth socket.
#[derive(Debug)]
enum DepthFrame {
    Diff(Box<DepthDiff>),
    /// `{e:"error", type, m}` frames demand a reconnect
    StreamError { error_type: String, message: String },
    /// Subscription acks and other non-event payloads
    Other,
}

/// Unwrap a combined-stream envelope `{stream, data: {...}}` and classify
/// the payload.
fn parse_depth_frame(text: &str) -> Result<DepthFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let payload = match value.get("data") {
        Some(data) if value.get("stream").is_some() => data,
        _ => &value,
    };

    match payload.get("e").and_then(Value::as_str) {
        Some("depthUpdate") => {
            let diff: DepthDiff = serde_json::from_value(payload.clone())?;
            Ok(DepthFrame::Diff(Box::new(diff)))
        }
        Some("error") => Ok(DepthFrame::StreamError {
            error_type: payload
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            message: payload
                .get("m")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => Ok(DepthFrame::Other),
    }
}

/// WebSocket client for a single symbol's depth-diff stream.
pub struct DepthStreamClient {
    symbol: String,
    link: Arc<StreamLink>,
    cancel: CancellationToken,
    diff_sender: mpsc::UnboundedSender<DepthDiff>,
}

impl DepthStreamClient {
    /// Returns the client and the receiver the depth task drains. Diffs
    /// received before the REST snapshot are buffered in the channel so
    /// the bridging rule can pick the first applicable one.
    pub fn new(
        symbol: &str,
        link: Arc<StreamLink>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<DepthDiff>) {
        let (diff_sender, diff_receiver) = mpsc::unbounded_channel();
        (
            Self {
                symbol: symbol.to_uppercase(),
                link,
                cancel,
                diff_sender,
            },
            diff_receiver,
        )
    }

    /// Spawn the connection-management task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut retry_count: u32 = 0;

            loop {
                if self.cancel.is_cancelled() {
                    break;
                }

                self.link.set_state(StreamState::Connecting);
                match self.connect_and_process().await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::ReceiverDropped => break,
                    SessionEnd::Disconnected => {
                        let delay_secs =
                            std::cmp::min(2_u64.pow(retry_count), MAX_RECONNECT_DELAY_SECS);
                        warn!(
                            symbol = %self.symbol,
                            retry_count,
                            delay_secs,
                            "Depth stream disconnected, redialing with backoff"
                        );
                        self.link.set_state(StreamState::Reconnecting);

                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = sleep(Duration::from_secs(delay_secs)) => {}
                        }
                        retry_count = retry_count.saturating_add(1).min(10);
                    }
                }
            }

            self.link.set_state(StreamState::Terminated);
            info!(symbol = %self.symbol, "Depth stream task terminated");
        })
    }

    async fn connect_and_process(&self) -> SessionEnd {
        let url = format!("{}/{}@depth@100ms", FUTURES_WS_URL, self.symbol.to_lowercase());
        info!(symbol = %self.symbol, url = %url, "Connecting to depth stream");

        let ws_stream = match connect_async(&url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "Depth stream connect failed");
                return SessionEnd::Disconnected;
            }
        };

        info!(symbol = %self.symbol, "Depth stream connected");
        self.link.set_state(StreamState::Streaming);
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                _ = self.link.wait_for(|s| s == StreamState::Reconnecting) => {
                    info!(symbol = %self.symbol, "Reconnect requested, dropping depth connection");
                    return SessionEnd::Disconnected;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(m) => m,
                        None => return SessionEnd::Disconnected,
                    };
                    match msg {
                        Ok(Message::Text(text)) => match parse_depth_frame(&text) {
                            Ok(DepthFrame::Diff(diff)) => {
                                debug!(
                                    symbol = %self.symbol,
                                    U = diff.first_update_id,
                                    u = diff.final_update_id,
                                    "Received depth diff"
                                );
                                if self.diff_sender.send(*diff).is_err() {
                                    info!(symbol = %self.symbol, "Diff receiver dropped, closing");
                                    return SessionEnd::ReceiverDropped;
                                }
                            }
                            Ok(DepthFrame::StreamError { error_type, message }) => {
                                warn!(
                                    symbol = %self.symbol,
                                    error_type = %error_type,
                                    message = %message,
                                    "Depth stream error frame, reconnecting"
                                );
                                return SessionEnd::Disconnected;
                            }
                            Ok(DepthFrame::Other) => {}
                            Err(e) => {
                                error!(symbol = %self.symbol, error = %e, "Failed to parse depth frame");
                            }
                        },
                        Ok(Message::Ping(data)) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                warn!(symbol = %self.symbol, "Failed to answer ping");
                                return SessionEnd::Disconnected;
                            }
                        }
                        Ok(Message::Pong(_)) => {}
                        Ok(Message::Close(frame)) => {
                            info!(symbol = %self.symbol, ?frame, "Depth stream closed by server");
                            return SessionEnd::Disconnected;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(symbol = %self.symbol, error = %e, "Depth stream read error");
                            return SessionEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }
}

enum SessionEnd {
    Disconnected,
    Cancelled,
    ReceiverDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_depth_frame() {
        let json = r#"{
            "e": "depthUpdate", "E": 1, "s": "BTCUSDT",
            "U": 10, "u": 12, "pu": 9,
            "b": [["100.0", "1.0"]], "a": []
        }"#;
        match parse_depth_frame(json).unwrap() {
            DepthFrame::Diff(diff) => {
                assert_eq!(diff.first_update_id, 10);
                assert_eq!(diff.prev_final_update_id, 9);
            }
            other => panic!("expected diff, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_combined_stream_envelope() {
        let json = r#"{
            "stream": "btcusdt@depth@100ms",
            "data": {
                "e": "depthUpdate", "E": 1, "s": "BTCUSDT",
                "U": 5, "u": 6, "pu": 4, "b": [], "a": []
            }
        }"#;
        assert!(matches!(
            parse_depth_frame(json).unwrap(),
            DepthFrame::Diff(_)
        ));
    }

    #[test]
    fn test_parse_error_frame() {
        let json = r#"{"e": "error", "type": "BinanceWebsocketClosed", "m": "connection lost"}"#;
        match parse_depth_frame(json).unwrap() {
            DepthFrame::StreamError { error_type, message } => {
                assert_eq!(error_type, "BinanceWebsocketClosed");
                assert_eq!(message, "connection lost");
            }
            other => panic!("expected error frame, got {:?}", other),
        }
    }

    #[test]
    fn test_non_event_payload_is_other() {
        let json = r#"{"result": null, "id": 1}"#;
        assert!(matches!(parse_depth_frame(json).unwrap(), DepthFrame::Other));
    }
}
