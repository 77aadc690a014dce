//! Single entry point over every feed service.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use log::{info, warn};

use crate::config::Config;
use crate::data::{normalize_symbol, CachedRecord, EventBus, FeedEvent};
use crate::drivers::{build_driver, FeedDriver};
use crate::error::{FeedError, Result};
use crate::service::{HealthMonitor, ServiceConfig, ServiceName, ServiceSupervisor, StatusRecord};

#[derive(Debug, Clone, Serialize)]
pub struct ServiceActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceActionResponse {
    fn ok(message: String) -> Self {
        Self { success: true, message: Some(message), error: None }
    }

    fn failed(error: String) -> Self {
        Self { success: false, message: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub success: bool,
    pub subscriber_count: usize,
}

struct HealthHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct FeedMultiplexer {
    services: BTreeMap<ServiceName, Arc<ServiceSupervisor>>,
    events: EventBus,
    health_period: Duration,
    health: Mutex<Option<HealthHandle>>,
}

impl FeedMultiplexer {
    pub fn new(config: &Config) -> Arc<Self> {
        let services = ServiceName::ALL
            .iter()
            .map(|name| {
                let service_config = ServiceConfig::for_service(*name, config);
                let driver = build_driver(&service_config);
                (service_config, driver)
            })
            .collect();
        Self::with_drivers(services, Duration::from_secs(config.health_check_interval_secs))
    }

    /// Builds a multiplexer over explicitly supplied drivers.
    pub fn with_drivers(services: Vec<(ServiceConfig, Arc<dyn FeedDriver>)>, health_period: Duration) -> Arc<Self> {
        let events = EventBus::new();
        let services = services
            .into_iter()
            .map(|(config, driver)| {
                let name = config.name;
                (name, ServiceSupervisor::new(config, driver, events.clone()))
            })
            .collect();

        Arc::new(Self {
            services,
            events,
            health_period,
            health: Mutex::new(None),
        })
    }

    fn supervisor(&self, name: &str) -> Result<&Arc<ServiceSupervisor>> {
        let name: ServiceName = name.parse()?;
        self.services
            .get(&name)
            .ok_or_else(|| FeedError::UnknownService(name.to_string()))
    }

    fn health_lock(&self) -> MutexGuard<'_, Option<HealthHandle>> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn start_service(&self, name: &str) -> Result<ServiceActionResponse> {
        let supervisor = self.supervisor(name)?;
        Ok(match supervisor.start().await {
            Ok(outcome) => ServiceActionResponse::ok(outcome.message(supervisor.name())),
            Err(e) => ServiceActionResponse::failed(e.to_string()),
        })
    }

    pub async fn stop_service(&self, name: &str) -> Result<ServiceActionResponse> {
        let supervisor = self.supervisor(name)?;
        let outcome = supervisor.stop();
        Ok(ServiceActionResponse::ok(outcome.message(supervisor.name())))
    }

    pub async fn restart_service(&self, name: &str) -> Result<ServiceActionResponse> {
        let supervisor = self.supervisor(name)?;
        Ok(match supervisor.restart().await {
            Ok(_) => ServiceActionResponse::ok(format!("{} service restarted", supervisor.name())),
            Err(e) => ServiceActionResponse::failed(e.to_string()),
        })
    }

    pub fn subscribe(&self, name: &str, symbol: &str) -> Result<SubscriptionResponse> {
        let supervisor = self.supervisor(name)?;
        let symbol = normalize_symbol(symbol)?;
        let subscriber_count = supervisor.registry().subscribe(&symbol);
        info!("Subscribed {} to {} ({} subscribers)", symbol, supervisor.name(), subscriber_count);
        Ok(SubscriptionResponse { success: true, subscriber_count })
    }

    pub fn unsubscribe(&self, name: &str, symbol: &str) -> Result<SubscriptionResponse> {
        let supervisor = self.supervisor(name)?;
        let symbol = normalize_symbol(symbol)?;
        let subscriber_count = supervisor.registry().unsubscribe(&symbol);
        info!("Unsubscribed {} from {} ({} subscribers)", symbol, supervisor.name(), subscriber_count);
        Ok(SubscriptionResponse { success: true, subscriber_count })
    }

    pub fn get_data(&self, name: &str, symbol: &str) -> Result<Option<CachedRecord>> {
        let supervisor = self.supervisor(name)?;
        let symbol = normalize_symbol(symbol)?;
        Ok(supervisor.cache().get(&symbol))
    }

    pub fn get_all_data(&self, name: &str) -> Result<Vec<CachedRecord>> {
        Ok(self.supervisor(name)?.cache().get_all())
    }

    /// Empties one service's cache and returns how many records went.
    pub fn clear_data(&self, name: &str) -> Result<usize> {
        let supervisor = self.supervisor(name)?;
        let cleared = supervisor.cache().clear();
        info!("Cleared {} cached records for {}", cleared, supervisor.name());
        Ok(cleared)
    }

    pub fn get_service_status(&self, name: &str) -> Result<StatusRecord> {
        Ok(self.supervisor(name)?.status())
    }

    pub fn get_all_services_status(&self) -> BTreeMap<ServiceName, StatusRecord> {
        self.services.iter().map(|(name, s)| (*name, s.status())).collect()
    }

    /// Starts every service concurrently. One failure does not stop the others.
    pub async fn start_all_services(&self) -> BTreeMap<ServiceName, ServiceActionResponse> {
        let starts = self.services.values().map(|supervisor| async move {
            let response = match supervisor.start().await {
                Ok(outcome) => ServiceActionResponse::ok(outcome.message(supervisor.name())),
                Err(e) => {
                    warn!("Could not start {}: {}", supervisor.name(), e);
                    ServiceActionResponse::failed(e.to_string())
                }
            };
            (supervisor.name(), response)
        });
        join_all(starts).await.into_iter().collect()
    }

    /// Stops every service and the health monitor. This is the shutdown path.
    pub fn stop_all_services(&self) -> BTreeMap<ServiceName, ServiceActionResponse> {
        if let Some(health) = self.health_lock().take() {
            health.token.cancel();
            health.task.abort();
        }
        self.services
            .iter()
            .map(|(name, supervisor)| (*name, ServiceActionResponse::ok(supervisor.stop().message(*name))))
            .collect()
    }

    pub fn subscribe_events(&self) -> UnboundedReceiver<FeedEvent> {
        self.events.subscribe()
    }

    pub fn event_listener_count(&self) -> usize {
        self.events.listener_count()
    }

    /// Starts the periodic health sweep. Returns false if it is already running.
    pub fn start_health_monitor(&self) -> bool {
        let mut health = self.health_lock();
        if health.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return false;
        }
        let token = CancellationToken::new();
        let monitor = HealthMonitor::new(self.services.values().cloned().collect(), self.health_period);
        let task = monitor.spawn(token.clone());
        *health = Some(HealthHandle { token, task });
        true
    }
}
