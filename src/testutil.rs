//! Shared helpers for supervisor, health and multiplexer tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;

use crate::drivers::{DriverSession, FeedDriver, FeedSink, PriceModel, SessionEnd};
use crate::error::{FeedError, Result};
use crate::service::{DriverConfig, DriverKind, ServiceConfig, ServiceName, SimulatedConfig};

/// Scripted driver: counts connects, can refuse them or delay them, and lets
/// a test sever every live session.
#[derive(Default)]
pub struct MockDriver {
    connects: AtomicUsize,
    failing: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    severs: Mutex<Vec<oneshot::Sender<String>>>,
    live: Arc<AtomicUsize>,
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    /// Ends every live session as if the upstream had dropped it.
    pub fn drop_connections(&self, reason: &str) {
        for sever in self.severs.lock().unwrap().drain(..) {
            let _ = sever.send(reason.to_string());
        }
    }
}

impl FeedDriver for MockDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Simulated
    }

    fn connect(&self, sink: FeedSink) -> BoxFuture<'static, Result<DriverSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing.load(Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        let (sever_tx, sever_rx) = oneshot::channel::<String>();
        if !failing {
            self.severs.lock().unwrap().push(sever_tx);
        }
        let live = self.live.clone();

        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if failing {
                return Err(FeedError::ConnectFailed("mock refused".to_string()));
            }
            live.fetch_add(1, Ordering::SeqCst);
            let guard = LiveGuard(live);
            Ok(DriverSession::spawn(async move {
                let _guard = guard;
                tokio::select! {
                    _ = sink.cancelled() => SessionEnd::Cancelled,
                    reason = sever_rx => match reason {
                        Ok(reason) => SessionEnd::Lost(reason),
                        Err(_) => {
                            sink.cancelled().await;
                            SessionEnd::Cancelled
                        }
                    },
                }
            }))
        }
        .boxed()
    }
}

/// Service tuning with a short reconnect delay, suitable for mock drivers.
pub fn mock_service_config(name: ServiceName, max_reconnect_attempts: u32) -> ServiceConfig {
    ServiceConfig {
        name,
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_attempts,
        driver: DriverConfig::Simulated(SimulatedConfig {
            tick_interval: Duration::from_secs(60),
            model: PriceModel::new(HashMap::new(), 1.0, 0.0),
        }),
    }
}

/// Polls `condition` for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
