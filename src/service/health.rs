use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn};

use crate::service::{ServiceSupervisor, StartOutcome};

/// Periodically restarts services that are active but have lost their
/// upstream and are no longer retrying on their own.
pub struct HealthMonitor {
    supervisors: Vec<Arc<ServiceSupervisor>>,
    period: Duration,
}

impl HealthMonitor {
    pub fn new(supervisors: Vec<Arc<ServiceSupervisor>>, period: Duration) -> Self {
        Self { supervisors, period }
    }

    /// One pass over every service. Returns how many were brought back.
    /// Services that are inactive or still connected are left alone; that
    /// check is made by [`ServiceSupervisor::recover`] under the state lock.
    pub async fn sweep(&self) -> usize {
        let results = join_all(self.supervisors.iter().map(|s| s.recover())).await;

        let mut recovered = 0;
        for (supervisor, result) in self.supervisors.iter().zip(results) {
            match result {
                Ok(Some(StartOutcome::Recovered)) => recovered += 1,
                Ok(Some(outcome)) => debug!("Health check left {} alone: {:?}", supervisor.name(), outcome),
                Ok(None) => {}
                Err(e) => warn!("Health check could not recover {}: {}", supervisor.name(), e),
            }
        }
        recovered
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!("Health monitor running every {:?}", self.period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let recovered = self.sweep().await;
                        if recovered > 0 {
                            info!("Health check recovered {} service(s)", recovered);
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EventBus;
    use crate::service::{ConnectionState, ServiceName};
    use crate::testutil::{mock_service_config, wait_until, MockDriver};

    fn parked_pair(driver: &Arc<MockDriver>) -> Vec<Arc<ServiceSupervisor>> {
        ServiceName::ALL[..2]
            .iter()
            .map(|name| ServiceSupervisor::new(mock_service_config(*name, 0), driver.clone(), EventBus::new()))
            .collect()
    }

    #[tokio::test]
    async fn test_sweep_recovers_parked_services() {
        let driver = MockDriver::new();
        let supervisors = parked_pair(&driver);
        for sup in &supervisors {
            sup.start().await.unwrap();
        }
        driver.drop_connections("network down");
        assert!(wait_until(|| supervisors.iter().all(|s| s.state() == ConnectionState::Disconnected)).await);

        let monitor = HealthMonitor::new(supervisors.clone(), Duration::from_secs(30));
        assert_eq!(monitor.sweep().await, 2);
        assert!(supervisors.iter().all(|s| s.is_connected()));
        assert_eq!(monitor.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_inactive_services() {
        let driver = MockDriver::new();
        let supervisors = parked_pair(&driver);

        let monitor = HealthMonitor::new(supervisors.clone(), Duration::from_secs(30));
        assert_eq!(monitor.sweep().await, 0);
        assert_eq!(driver.connects(), 0);
    }

    #[tokio::test]
    async fn test_sweep_leaves_stopped_service_inactive() {
        let driver = MockDriver::new();
        let supervisors = parked_pair(&driver);
        supervisors[0].start().await.unwrap();
        driver.drop_connections("network down");
        assert!(wait_until(|| supervisors[0].state() == ConnectionState::Disconnected).await);

        // Stopped after a caller last saw it parked.
        let seen_parked = supervisors[0].is_active() && !supervisors[0].is_connected();
        supervisors[0].stop();
        assert!(seen_parked);

        let monitor = HealthMonitor::new(supervisors.clone(), Duration::from_secs(30));
        assert_eq!(monitor.sweep().await, 0);
        assert_eq!(supervisors[0].state(), ConnectionState::Inactive);
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn test_spawned_monitor_recovers_and_stops() {
        let driver = MockDriver::new();
        let supervisors = parked_pair(&driver);
        supervisors[0].start().await.unwrap();
        driver.drop_connections("network down");
        assert!(wait_until(|| supervisors[0].state() == ConnectionState::Disconnected).await);

        let token = CancellationToken::new();
        let handle = HealthMonitor::new(supervisors.clone(), Duration::from_millis(20)).spawn(token.clone());
        assert!(wait_until(|| supervisors[0].is_connected()).await);

        token.cancel();
        handle.await.unwrap();
    }
}
