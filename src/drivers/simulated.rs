use futures::future::{self, BoxFuture, FutureExt};
use tokio::time::{interval, MissedTickBehavior};
use log::{debug, info};

use crate::data::CachedRecord;
use crate::drivers::{DriverSession, FeedDriver, FeedSink, SessionEnd};
use crate::error::Result;
use crate::service::{DriverKind, SimulatedConfig};

/// Synthesizes prices for every subscribed symbol on a fixed tick.
pub struct SimulatedDriver {
    config: SimulatedConfig,
}

impl SimulatedDriver {
    pub fn new(config: SimulatedConfig) -> Self {
        Self { config }
    }
}

impl FeedDriver for SimulatedDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Simulated
    }

    fn connect(&self, sink: FeedSink) -> BoxFuture<'static, Result<DriverSession>> {
        let config = self.config.clone();
        future::ready(Ok(DriverSession::spawn(run(config, sink)))).boxed()
    }
}

async fn run(config: SimulatedConfig, sink: FeedSink) -> SessionEnd {
    let mut ticker = interval(config.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Simulated feed running for {} (every {:?})", sink.service(), config.tick_interval);

    loop {
        tokio::select! {
            _ = sink.cancelled() => {
                debug!("Simulated feed for {} cancelled", sink.service());
                return SessionEnd::Cancelled;
            }
            _ = ticker.tick() => {
                tick(&config, &sink);
            }
        }
    }
}

fn tick(config: &SimulatedConfig, sink: &FeedSink) -> usize {
    let mut written = 0;
    for symbol in sink.subscribed_symbols() {
        let base = config.model.base_price(&symbol);
        let record = CachedRecord::new(symbol.as_str(), config.model.sample(&symbol))
            .with_change_from(base);
        if !sink.publish(record) {
            break;
        }
        written += 1;
    }
    written
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::data::{EventBus, FeedCache, SubscriptionRegistry};
    use crate::drivers::PriceModel;
    use crate::service::ServiceName;

    fn config() -> SimulatedConfig {
        let mut bases = HashMap::new();
        bases.insert("EUA".to_string(), 85.0);
        SimulatedConfig {
            tick_interval: Duration::from_millis(20),
            model: PriceModel::new(bases, 25.0, 0.0),
        }
    }

    #[test]
    fn test_tick_only_writes_subscribed_symbols() {
        let cache = FeedCache::new();
        let registry = SubscriptionRegistry::new();
        registry.subscribe("EUA");
        registry.subscribe("CCA");
        let sink = FeedSink::new(
            ServiceName::Credits,
            cache.clone(),
            registry,
            EventBus::new(),
            CancellationToken::new(),
        );

        assert_eq!(tick(&config(), &sink), 2);
        assert_eq!(cache.get("EUA").unwrap().price, 85.0);
        assert_eq!(cache.get("EUA").unwrap().change, Some(0.0));
        assert_eq!(cache.get("CCA").unwrap().price, 25.0);
        assert!(cache.get("UKA").is_none());
    }

    #[tokio::test]
    async fn test_session_ends_on_cancel() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("EUA");
        let token = CancellationToken::new();
        let cache = FeedCache::new();
        let sink = FeedSink::new(ServiceName::Credits, cache.clone(), registry, EventBus::new(), token.clone());

        let session = SimulatedDriver::new(config()).connect(sink).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        assert_eq!(session.finished().await, SessionEnd::Cancelled);
        assert!(cache.get("EUA").is_some());
    }
}
