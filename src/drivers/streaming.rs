//! WebSocket exchange driver.
//!
//! One connection carries a fixed symbol universe named in the URL. The
//! driver pings the upstream every `ping_interval`; a ping left unanswered
//! for `pong_timeout` force-closes the connection so the supervisor can
//! reconnect. Without this a silently dead socket looks just like a quiet
//! market.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use log::{debug, info, warn};

use crate::data::CachedRecord;
use crate::drivers::{DriverSession, FeedDriver, FeedSink, SessionEnd};
use crate::error::{FeedError, Result};
use crate::service::{DriverKind, StreamingConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 24h rolling ticker as published on `<symbol>@ticker` streams.
#[derive(Debug, Deserialize)]
struct Ticker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "p", default)]
    price_change: Option<String>,
    #[serde(rename = "P", default)]
    price_change_percent: Option<String>,
    #[serde(rename = "v", default)]
    volume: Option<String>,
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
}

/// Combined streams wrap the payload as `{"stream": ..., "data": ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TickerFrame {
    Combined { data: Ticker },
    Bare(Ticker),
}

pub struct StreamingDriver {
    config: StreamingConfig,
}

impl StreamingDriver {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }
}

impl FeedDriver for StreamingDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Streaming
    }

    fn connect(&self, sink: FeedSink) -> BoxFuture<'static, Result<DriverSession>> {
        let config = self.config.clone();
        async move {
            if config.symbols.is_empty() {
                return Err(FeedError::ConnectFailed("no symbols to stream".to_string()));
            }
            let url = config.stream_url();
            info!("Connecting {} to {}", sink.service(), url);

            let (ws_stream, _) = match timeout(config.connect_timeout, connect_async(url.as_str())).await {
                Err(_) => return Err(FeedError::ConnectTimeout(config.connect_timeout)),
                Ok(result) => result?,
            };

            info!("{} connected ({} symbols)", sink.service(), config.symbols.len());
            Ok(DriverSession::spawn(run(ws_stream, config, sink)))
        }
        .boxed()
    }
}

async fn run(ws_stream: WsStream, config: StreamingConfig, sink: FeedSink) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    let mut ping_timer = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = sink.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            _ = ping_timer.tick() => {
                if pong_deadline.is_some() {
                    continue;
                }
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return SessionEnd::Lost(format!("ping failed: {}", e));
                }
                pong_deadline = Some(Instant::now() + config.pong_timeout);
            }
            _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                warn!("{} missed pong within {:?}, closing connection", sink.service(), config.pong_timeout);
                let _ = write.close().await;
                return SessionEnd::Lost("pong timeout".to_string());
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match parse_ticker(&text) {
                        Some(record) => {
                            sink.publish(record);
                        }
                        None => debug!("{} dropped malformed message: {:.200}", sink.service(), text),
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    pong_deadline = None;
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!("{} closed by remote: {:?}", sink.service(), frame);
                    return SessionEnd::Lost("closed by remote".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("{} read error: {}", sink.service(), e);
                    return SessionEnd::Lost(e.to_string());
                }
                None => {
                    warn!("{} stream ended", sink.service());
                    return SessionEnd::Lost("stream ended".to_string());
                }
            }
        }
    }
}

/// Decodes a ticker frame, wrapped or bare. Returns `None` for anything that
/// is not a ticker with a numeric price.
pub fn parse_ticker(text: &str) -> Option<CachedRecord> {
    let ticker = match serde_json::from_str::<TickerFrame>(text).ok()? {
        TickerFrame::Combined { data } => data,
        TickerFrame::Bare(ticker) => ticker,
    };

    let price = ticker.last_price.parse::<f64>().ok().filter(|p| p.is_finite())?;
    let parse = |field: Option<String>| field.and_then(|v| v.parse::<f64>().ok());

    let mut record = CachedRecord::new(ticker.symbol.to_ascii_uppercase(), price);
    record.change = parse(ticker.price_change);
    record.change_percent = parse(ticker.price_change_percent);
    record.volume = parse(ticker.volume);
    if let Some(ts) = ticker.event_time.and_then(DateTime::<Utc>::from_timestamp_millis) {
        record.timestamp = ts;
    }
    Some(record)
}
