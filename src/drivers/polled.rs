use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Deserialize;
use tokio::time::{interval, MissedTickBehavior};
use log::{debug, info, warn};

use crate::config::SYMBOL_PLACEHOLDER;
use crate::data::CachedRecord;
use crate::drivers::{DriverSession, FeedDriver, FeedSink, SessionEnd};
use crate::error::{FeedError, Result};
use crate::service::{DriverKind, PolledConfig};

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
    regular_market_volume: Option<f64>,
    regular_market_time: Option<i64>,
}

/// Polls a REST quote endpoint for a fixed symbol list.
pub struct PolledDriver {
    config: PolledConfig,
}

impl PolledDriver {
    pub fn new(config: PolledConfig) -> Self {
        Self { config }
    }
}

impl FeedDriver for PolledDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Polled
    }

    fn connect(&self, sink: FeedSink) -> BoxFuture<'static, Result<DriverSession>> {
        let config = self.config.clone();
        async move {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout)
                .user_agent("feed-mux/0.1")
                .build()?;
            info!(
                "Polling {} symbols for {} every {:?}",
                config.symbols.len(),
                sink.service(),
                config.poll_interval
            );
            Ok(DriverSession::spawn(run(client, config, sink)))
        }
        .boxed()
    }
}

async fn run(client: reqwest::Client, config: PolledConfig, sink: FeedSink) -> SessionEnd {
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sink.cancelled() => return SessionEnd::Cancelled,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = sink.cancelled() => return SessionEnd::Cancelled,
            (live, fallback) = poll_once(&client, &config, &sink) => {
                debug!("{} poll cycle: {} live, {} fallback", sink.service(), live, fallback);
            }
        }
    }
}

/// Fetches every symbol concurrently. A failed symbol gets a synthetic value
/// so one bad quote never holds up the rest.
async fn poll_once(client: &reqwest::Client, config: &PolledConfig, sink: &FeedSink) -> (usize, usize) {
    let fetches = config.symbols.iter().map(|symbol| async move {
        match fetch_quote(client, &config.url_template, symbol).await {
            Ok(record) => (record, true),
            Err(e) => {
                warn!("Quote fetch for {} failed, using fallback: {}", symbol, e);
                (CachedRecord::new(symbol.as_str(), config.fallback.sample(symbol)), false)
            }
        }
    });

    let mut live = 0;
    let mut fallback = 0;
    for (record, is_live) in join_all(fetches).await {
        if !sink.publish(record) {
            break;
        }
        if is_live {
            live += 1;
        } else {
            fallback += 1;
        }
    }
    (live, fallback)
}

pub fn quote_url(template: &str, symbol: &str) -> String {
    template.replace(SYMBOL_PLACEHOLDER, &urlencoding::encode(symbol))
}

async fn fetch_quote(client: &reqwest::Client, template: &str, symbol: &str) -> Result<CachedRecord> {
    let response = client
        .get(quote_url(template, symbol))
        .send()
        .await?
        .error_for_status()?;
    let body: ChartResponse = response.json().await?;
    parse_chart(symbol, body)
}

fn parse_chart(symbol: &str, body: ChartResponse) -> Result<CachedRecord> {
    let meta = body
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .map(|result| result.meta)
        .ok_or_else(|| FeedError::BadResponse(format!("no chart result for {}", symbol)))?;

    let price = meta
        .regular_market_price
        .ok_or_else(|| FeedError::BadResponse(format!("no market price for {}", symbol)))?;

    let mut record = CachedRecord::new(symbol, price);
    if let Some(previous) = meta.chart_previous_close.or(meta.previous_close) {
        record = record.with_change_from(previous);
    }
    if let Some(volume) = meta.regular_market_volume {
        record = record.with_volume(volume);
    }
    if let Some(ts) = meta.regular_market_time.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)) {
        record = record.at(ts);
    }
    Ok(record)
}
