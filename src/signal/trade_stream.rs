//! WebSocket client for the futures aggregate-trade stream
//!
//! Connects to `<symbol>@aggTrade` and forwards parsed events to the
//! trade task. Reconnects with exponential backoff (1s doubling, capped
//! at 60s); combined-stream envelopes are unwrapped before parsing.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::signal::trades::AggTradeEvent;

const FUTURES_WS_URL: &str = "wss://fstream.binance.com/ws";

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

fn parse_trade_frame(text: &str) -> Result<Option<AggTradeEvent>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let payload = match value.get("data") {
        Some(data) if value.get("stream").is_some() => data,
        _ => &value,
    };

    if payload.get("e").and_then(Value::as_str) == Some("aggTrade") {
        let event: AggTradeEvent = serde_json::from_value(payload.clone())?;
        Ok(Some(event))
    } else {
        Ok(None)
    }
}

/// WebSocket client for a single symbol's aggTrade stream.
pub struct TradeStreamClient {
    symbol: String,
    url: String,
    cancel: CancellationToken,
}

impl TradeStreamClient {
    pub fn new(symbol: &str, cancel: CancellationToken) -> Self {
        let symbol_lower = symbol.to_lowercase();
        Self {
            symbol: symbol.to_uppercase(),
            url: format!("{}/{}@aggTrade", FUTURES_WS_URL, symbol_lower),
            cancel,
        }
    }

    /// Connect and stream until cancelled, redialing with backoff.
    pub async fn run(self, trade_tx: mpsc::UnboundedSender<AggTradeEvent>) {
        let mut retry_delay = Duration::from_secs(1);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.connect_once(&trade_tx).await {
                ConnectionEnd::Finished => break,
                ConnectionEnd::Disconnected => {
                    warn!(
                        symbol = %self.symbol,
                        retry_delay_secs = retry_delay.as_secs(),
                        "aggTrade stream disconnected, redialing"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(retry_delay) => {}
            }
            retry_delay = std::cmp::min(retry_delay * 2, MAX_RECONNECT_DELAY);
        }

        info!(symbol = %self.symbol, "aggTrade stream task stopped");
    }

    async fn connect_once(
        &self,
        trade_tx: &mpsc::UnboundedSender<AggTradeEvent>,
    ) -> ConnectionEnd {
        info!(symbol = %self.symbol, url = %self.url, "Connecting to aggTrade stream");

        let ws_stream = match connect_async(&self.url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "aggTrade connect failed");
                return ConnectionEnd::Disconnected;
            }
        };

        info!(symbol = %self.symbol, "aggTrade stream connected");
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return ConnectionEnd::Finished,
                msg = read.next() => {
                    let msg = match msg {
                        Some(m) => m,
                        None => return ConnectionEnd::Disconnected,
                    };
                    match msg {
                        Ok(Message::Text(text)) => match parse_trade_frame(&text) {
                            Ok(Some(event)) => {
                                debug!(
                                    symbol = %event.symbol,
                                    price = %event.price,
                                    quantity = %event.quantity,
                                    "Received aggTrade"
                                );
                                if trade_tx.send(event).is_err() {
                                    info!(symbol = %self.symbol, "Trade receiver dropped, closing");
                                    return ConnectionEnd::Finished;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(symbol = %self.symbol, error = %e, "Failed to parse aggTrade frame");
                            }
                        },
                        Ok(Message::Ping(data)) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                return ConnectionEnd::Disconnected;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            info!(symbol = %self.symbol, ?frame, "aggTrade stream closed by server");
                            return ConnectionEnd::Disconnected;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(symbol = %self.symbol, error = %e, "aggTrade read error");
                            return ConnectionEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }
}

enum ConnectionEnd {
    Disconnected,
    Finished,
}
