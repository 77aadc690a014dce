//! Lifecycle owner for one feed.
//!
//! A supervisor moves its service through
//! `Inactive -> Connecting -> Connected -> (Reconnecting | Disconnected)* -> Inactive`.
//! Every async connect result is checked against the activation generation
//! and its cancellation token before it is committed, so a `stop` that lands
//! while a connect is in flight always wins. Events are published while the
//! state lock is held, which keeps their order consistent with the
//! transitions they describe.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use log::{debug, info, warn};

use crate::data::{EventBus, FeedCache, FeedEvent, SubscriptionRegistry};
use crate::drivers::{DriverSession, FeedDriver, FeedSink, SessionEnd};
use crate::error::{FeedError, Result};
use crate::service::state::{Connection, ServiceState};
use crate::service::{ConnectionState, ServiceConfig, ServiceName, StartOutcome, StatusRecord, StopOutcome};

pub struct ServiceSupervisor {
    config: ServiceConfig,
    driver: Arc<dyn FeedDriver>,
    cache: FeedCache,
    registry: SubscriptionRegistry,
    events: EventBus,
    state: Mutex<ServiceState>,
}

/// What a `start` call decided to do while holding the lock.
struct ConnectPlan {
    generation: u64,
    connection_id: u64,
    token: CancellationToken,
    recovery: bool,
}

enum Step {
    Connect(ConnectPlan),
    Settled(StartOutcome),
}

/// Claims the recovery connect for a service that is active but not connected.
fn plan_recovery(state: &mut ServiceState) -> Result<Step> {
    if state.phase == ConnectionState::Reconnecting && state.reconnect_pending() {
        return Ok(Step::Settled(StartOutcome::AlreadyActive));
    }
    if state.connect_pending {
        return Ok(Step::Settled(StartOutcome::AlreadyStarting));
    }
    let Some((connection_id, token)) = state.next_connection() else {
        return Err(FeedError::Superseded);
    };
    state.connect_pending = true;
    Ok(Step::Connect(ConnectPlan { generation: state.generation, connection_id, token, recovery: true }))
}

impl ServiceSupervisor {
    pub fn new(config: ServiceConfig, driver: Arc<dyn FeedDriver>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            config,
            driver,
            cache: FeedCache::new(),
            registry: SubscriptionRegistry::new(),
            events,
            state: Mutex::new(ServiceState::new()),
        })
    }

    pub fn name(&self) -> ServiceName {
        self.config.name
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink(&self, token: CancellationToken) -> FeedSink {
        FeedSink::new(
            self.config.name,
            self.cache.clone(),
            self.registry.clone(),
            self.events.clone(),
            token,
        )
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.lock().phase
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub async fn start(self: &Arc<Self>) -> Result<StartOutcome> {
        let step = {
            let mut state = self.lock();
            let phase = state.phase;
            match phase {
                ConnectionState::Connecting => Step::Settled(StartOutcome::AlreadyStarting),
                ConnectionState::Connected => Step::Settled(StartOutcome::AlreadyActive),
                ConnectionState::Inactive => {
                    let activation = CancellationToken::new();
                    state.generation += 1;
                    state.phase = ConnectionState::Connecting;
                    state.connection_seq += 1;
                    let plan = ConnectPlan {
                        generation: state.generation,
                        connection_id: state.connection_seq,
                        token: activation.child_token(),
                        recovery: false,
                    };
                    state.activation = Some(activation);
                    Step::Connect(plan)
                }
                ConnectionState::Reconnecting | ConnectionState::Disconnected => plan_recovery(&mut state)?,
            }
        };

        match step {
            Step::Settled(outcome) => Ok(outcome),
            Step::Connect(plan) => self.execute(plan).await,
        }
    }

    /// Reconnects an active service that has lost its upstream. Unlike
    /// `start`, this never activates a service: the phase is checked under
    /// the same lock that claims the connect, and anything other than
    /// `Reconnecting` or `Disconnected` yields `Ok(None)`.
    pub async fn recover(self: &Arc<Self>) -> Result<Option<StartOutcome>> {
        let step = {
            let mut state = self.lock();
            let phase = state.phase;
            match phase {
                ConnectionState::Reconnecting | ConnectionState::Disconnected => plan_recovery(&mut state)?,
                _ => return Ok(None),
            }
        };

        match step {
            Step::Settled(outcome) => Ok(Some(outcome)),
            Step::Connect(plan) => self.execute(plan).await.map(Some),
        }
    }

    async fn execute(self: &Arc<Self>, plan: ConnectPlan) -> Result<StartOutcome> {
        if plan.recovery {
            info!("Recovering {} service", self.name());
        } else {
            info!("Starting {} service", self.name());
        }

        let result = self.connect(plan.token.clone()).await;
        self.commit_start(plan, result)
    }

    /// Runs the driver's connect, abandoning it as soon as the token is cancelled.
    async fn connect(&self, token: CancellationToken) -> Result<DriverSession> {
        let connecting = self.driver.connect(self.sink(token.clone()));
        tokio::select! {
            _ = token.cancelled() => Err(FeedError::Superseded),
            result = connecting => result,
        }
    }

    fn commit_start(self: &Arc<Self>, plan: ConnectPlan, result: Result<DriverSession>) -> Result<StartOutcome> {
        let mut state = self.lock();

        if state.generation != plan.generation || plan.token.is_cancelled() {
            plan.token.cancel();
            info!("{} start superseded by stop, discarding connection", self.name());
            return Err(FeedError::Superseded);
        }
        if plan.recovery {
            state.connect_pending = false;
        }

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to start {} service: {}", self.name(), e);
                state.last_error = Some(e.to_string());
                if !plan.recovery {
                    state.phase = ConnectionState::Inactive;
                    if let Some(activation) = state.activation.take() {
                        activation.cancel();
                    }
                }
                return Err(e);
            }
        };

        state.phase = ConnectionState::Connected;
        state.reconnect_attempts = 0;
        state.drop_connection();
        state.connection = Some(Connection { id: plan.connection_id, token: plan.token });

        let outcome = if plan.recovery {
            state.reconnect_task = None;
            self.events.publish(FeedEvent::Reconnected { service: self.name() });
            info!("✅ {} service recovered", self.name());
            StartOutcome::Recovered
        } else {
            state.started_at = Some(Utc::now());
            state.last_error = None;
            self.events.publish(FeedEvent::ServiceStarted { service: self.name() });
            info!("🚀 {} service started", self.name());
            StartOutcome::Started
        };
        drop(state);

        self.watch(plan.connection_id, session);
        Ok(outcome)
    }

    /// Stops the service. Cancels the live session, any pending reconnect and
    /// any start still in flight, then resets subscriptions. Cached data is
    /// kept. Once this returns no write from the old activation can land.
    ///
    /// A service still `Connecting` was never active: its start is cancelled
    /// and no `ServiceStopped` event is published.
    pub fn stop(&self) -> StopOutcome {
        let mut state = self.lock();
        let was = state.phase;
        if was == ConnectionState::Inactive {
            return StopOutcome::NotActive;
        }

        state.generation += 1;
        if let Some(activation) = state.activation.take() {
            activation.cancel();
        }
        state.drop_connection();
        if let Some(task) = state.reconnect_task.take() {
            task.abort();
        }
        state.phase = ConnectionState::Inactive;
        state.reconnect_attempts = 0;
        state.connect_pending = false;
        state.started_at = None;

        self.registry.reset();
        self.cache.fence();

        if !was.is_active() {
            info!("{} start cancelled before it connected", self.name());
            return StopOutcome::StartCancelled;
        }
        self.events.publish(FeedEvent::ServiceStopped { service: self.name() });
        info!("🛑 {} service stopped", self.name());
        StopOutcome::Stopped
    }

    pub async fn restart(self: &Arc<Self>) -> Result<StartOutcome> {
        self.stop();
        self.start().await
    }

    fn watch(self: &Arc<Self>, connection_id: u64, session: DriverSession) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let end = session.finished().await;
            supervisor.on_session_end(connection_id, end);
        });
    }

    fn on_session_end(self: &Arc<Self>, connection_id: u64, end: SessionEnd) {
        let reason = match end {
            SessionEnd::Cancelled => return,
            SessionEnd::Lost(reason) => reason,
        };

        let mut state = self.lock();
        let current = state.connection.as_ref().map(|c| c.id);
        if current != Some(connection_id) || !state.phase.is_connected() {
            debug!("Ignoring end of stale {} connection {}", self.name(), connection_id);
            return;
        }

        warn!("{} connection lost: {}", self.name(), reason);
        state.drop_connection();
        state.phase = ConnectionState::Reconnecting;
        state.last_error = Some(reason.clone());
        self.events.publish(FeedEvent::Disconnected { service: self.name(), reason });

        let generation = state.generation;
        state.reconnect_task = Some(tokio::spawn(Arc::clone(self).reconnect_loop(generation)));
    }

    async fn reconnect_loop(self: Arc<Self>, generation: u64) {
        let max_attempts = self.config.max_reconnect_attempts;
        loop {
            let (attempt, activation) = {
                let mut state = self.lock();
                if state.generation != generation || state.phase != ConnectionState::Reconnecting {
                    return;
                }
                let Some(activation) = state.activation.clone() else {
                    return;
                };
                if state.reconnect_attempts >= max_attempts {
                    state.phase = ConnectionState::Disconnected;
                    warn!(
                        "{} gave up reconnecting after {} attempts; waiting for health check",
                        self.name(),
                        state.reconnect_attempts
                    );
                    self.events.publish(FeedEvent::ReconnectExhausted {
                        service: self.name(),
                        attempts: state.reconnect_attempts,
                    });
                    return;
                }
                state.reconnect_attempts += 1;
                self.events.publish(FeedEvent::ReconnectAttempt {
                    service: self.name(),
                    attempt: state.reconnect_attempts,
                });
                (state.reconnect_attempts, activation)
            };

            info!(
                "Reconnecting {} in {:?} (attempt {}/{})",
                self.name(),
                self.config.reconnect_delay,
                attempt,
                max_attempts
            );
            tokio::select! {
                _ = activation.cancelled() => return,
                _ = sleep(self.config.reconnect_delay) => {}
            }

            let (connection_id, token) = {
                let mut state = self.lock();
                if state.generation != generation {
                    return;
                }
                match state.next_connection() {
                    Some(next) => next,
                    None => return,
                }
            };

            let result = self.connect(token.clone()).await;

            let mut state = self.lock();
            if state.generation != generation || token.is_cancelled() {
                token.cancel();
                return;
            }
            match result {
                Ok(session) => {
                    state.phase = ConnectionState::Connected;
                    state.reconnect_attempts = 0;
                    state.connection = Some(Connection { id: connection_id, token });
                    self.events.publish(FeedEvent::Reconnected { service: self.name() });
                    info!("✅ {} reconnected", self.name());
                    drop(state);
                    self.watch(connection_id, session);
                    return;
                }
                Err(e) => {
                    warn!("{} reconnect attempt {} failed: {}", self.name(), attempt, e);
                    state.last_error = Some(e.to_string());
                }
            }
        }
    }

    pub fn status(&self) -> StatusRecord {
        let (phase, reconnect_attempts, started_at, last_error) = {
            let state = self.lock();
            (state.phase, state.reconnect_attempts, state.started_at, state.last_error.clone())
        };
        let uptime_ms = started_at.map(|at| (Utc::now() - at).num_milliseconds().max(0));

        StatusRecord {
            service: self.name(),
            kind: self.driver.kind(),
            state: phase,
            is_active: phase.is_active(),
            is_connected: phase.is_connected(),
            is_healthy: phase.is_active() && phase.is_connected(),
            subscriber_count: self.registry.subscriber_count(),
            subscribed_symbols: self.registry.symbols(),
            cached_symbols: self.cache.len(),
            reconnect_attempts,
            max_reconnect_attempts: self.config.max_reconnect_attempts,
            uptime_ms,
            started_at,
            last_error,
        }
    }
}
