//! Upstream feed drivers.
//!
//! A driver turns one upstream source into a stream of [`CachedRecord`]s.
//! `connect` establishes the upstream and hands back a running
//! [`DriverSession`]; the session writes through its [`FeedSink`] until it is
//! cancelled or the upstream is lost.

pub mod streaming;
pub mod polled;
pub mod simulated;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::data::{CachedRecord, EventBus, FeedCache, FeedEvent, SubscriptionRegistry};
use crate::error::Result;
use crate::service::{DriverConfig, DriverKind, ServiceConfig, ServiceName};

pub use streaming::StreamingDriver;
pub use polled::PolledDriver;
pub use simulated::SimulatedDriver;

/// Capability shared by every upstream kind.
pub trait FeedDriver: Send + Sync + 'static {
    fn kind(&self) -> DriverKind;

    /// Brings the upstream to a live state. The returned future must not
    /// borrow the driver.
    fn connect(&self, sink: FeedSink) -> BoxFuture<'static, Result<DriverSession>>;
}

pub fn build_driver(config: &ServiceConfig) -> Arc<dyn FeedDriver> {
    match &config.driver {
        DriverConfig::Streaming(cfg) => Arc::new(StreamingDriver::new(cfg.clone())),
        DriverConfig::Polled(cfg) => Arc::new(PolledDriver::new(cfg.clone())),
        DriverConfig::Simulated(cfg) => Arc::new(SimulatedDriver::new(cfg.clone())),
    }
}

/// Write side handed to a driver for one connection.
#[derive(Clone)]
pub struct FeedSink {
    service: ServiceName,
    cache: FeedCache,
    registry: SubscriptionRegistry,
    events: EventBus,
    token: CancellationToken,
}

impl FeedSink {
    pub fn new(
        service: ServiceName,
        cache: FeedCache,
        registry: SubscriptionRegistry,
        events: EventBus,
        token: CancellationToken,
    ) -> Self {
        Self { service, cache, registry, events, token }
    }

    pub fn service(&self) -> ServiceName {
        self.service
    }

    /// Stores the record and announces it. Returns false once the connection
    /// has been cancelled; late writes are discarded. The announcement is
    /// made under the cache lock, so it always precedes the `ServiceStopped`
    /// that follows a stop's fence.
    pub fn publish(&self, record: CachedRecord) -> bool {
        self.cache.set_unless_cancelled(&self.token, record, |stored| {
            self.events.publish(FeedEvent::DataUpdated { service: self.service, record: stored.clone() });
        })
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.registry.symbols()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// How a driver session came to an end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    Cancelled,
    Lost(String),
}

/// A running upstream connection or poll loop.
pub struct DriverSession {
    handle: JoinHandle<SessionEnd>,
}

impl DriverSession {
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = SessionEnd> + Send + 'static,
    {
        Self { handle: tokio::spawn(task) }
    }

    pub async fn finished(self) -> SessionEnd {
        match self.handle.await {
            Ok(end) => end,
            Err(e) if e.is_cancelled() => SessionEnd::Cancelled,
            Err(e) => SessionEnd::Lost(format!("driver task failed: {}", e)),
        }
    }
}

/// Base prices plus a symmetric random walk band, used wherever a synthetic
/// value stands in for real upstream data.
#[derive(Debug, Clone)]
pub struct PriceModel {
    base_prices: HashMap<String, f64>,
    default_price: f64,
    volatility: f64,
}

impl PriceModel {
    pub fn new(base_prices: HashMap<String, f64>, default_price: f64, volatility: f64) -> Self {
        Self { base_prices, default_price, volatility: volatility.abs() }
    }

    pub fn base_price(&self, symbol: &str) -> f64 {
        self.base_prices.get(symbol).copied().unwrap_or(self.default_price)
    }

    /// A price within `±volatility` of the symbol's base, rounded to cents.
    pub fn sample(&self, symbol: &str) -> f64 {
        let base = self.base_price(symbol);
        let drift = rand::thread_rng().gen_range(-self.volatility..=self.volatility);
        (base * (1.0 + drift) * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> PriceModel {
        let mut bases = HashMap::new();
        bases.insert("EUA".to_string(), 85.0);
        PriceModel::new(bases, 25.0, 0.02)
    }

    #[test]
    fn test_sample_stays_within_band() {
        let model = model();
        for _ in 0..200 {
            let price = model.sample("EUA");
            assert!((83.29..=86.71).contains(&price), "price {} out of band", price);
        }
    }

    #[test]
    fn test_unknown_symbol_uses_default_base() {
        let model = model();
        assert_eq!(model.base_price("ZZZ"), 25.0);
        assert_eq!(model.base_price("EUA"), 85.0);
    }

    #[tokio::test]
    async fn test_sink_discards_writes_after_cancel() {
        let cache = FeedCache::new();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let token = CancellationToken::new();
        let sink = FeedSink::new(
            ServiceName::Credits,
            cache.clone(),
            SubscriptionRegistry::new(),
            events,
            token.clone(),
        );

        assert!(sink.publish(CachedRecord::new("EUA", 85.0)));
        token.cancel();
        assert!(!sink.publish(CachedRecord::new("EUA", 99.0)));

        assert_eq!(cache.get("EUA").unwrap().price, 85.0);
        assert!(matches!(rx.recv().await, Some(FeedEvent::DataUpdated { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_data_event_after_stop_announcement() {
        for _ in 0..50 {
            let cache = FeedCache::new();
            let events = EventBus::new();
            let mut rx = events.subscribe();
            let token = CancellationToken::new();
            let sink = FeedSink::new(
                ServiceName::Credits,
                cache.clone(),
                SubscriptionRegistry::new(),
                events.clone(),
                token.clone(),
            );

            let writer = std::thread::spawn(move || {
                let mut price = 0.0;
                while sink.publish(CachedRecord::new("EUA", price)) {
                    price += 1.0;
                }
            });
            while cache.len() == 0 {
                std::thread::yield_now();
            }

            // Same sequence a supervisor stop runs.
            token.cancel();
            cache.fence();
            events.publish(FeedEvent::ServiceStopped { service: ServiceName::Credits });
            writer.join().unwrap();

            let mut received = Vec::new();
            while let Ok(event) = rx.try_recv() {
                received.push(event);
            }
            assert!(matches!(received.last(), Some(FeedEvent::ServiceStopped { .. })));
        }
    }

    #[tokio::test]
    async fn test_session_reports_end_reason() {
        let session = DriverSession::spawn(async { SessionEnd::Lost("remote closed".to_string()) });
        assert_eq!(session.finished().await, SessionEnd::Lost("remote closed".to_string()));
    }
}
