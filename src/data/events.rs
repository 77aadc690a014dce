use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use log::debug;

use crate::data::CachedRecord;
use crate::service::ServiceName;

/// State changes and data updates published by the multiplexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    ServiceStarted { service: ServiceName },
    ServiceStopped { service: ServiceName },
    Disconnected { service: ServiceName, reason: String },
    ReconnectAttempt { service: ServiceName, attempt: u32 },
    Reconnected { service: ServiceName },
    ReconnectExhausted { service: ServiceName, attempts: u32 },
    DataUpdated { service: ServiceName, record: CachedRecord },
}

impl FeedEvent {
    pub fn service(&self) -> ServiceName {
        match self {
            FeedEvent::ServiceStarted { service }
            | FeedEvent::ServiceStopped { service }
            | FeedEvent::Disconnected { service, .. }
            | FeedEvent::ReconnectAttempt { service, .. }
            | FeedEvent::Reconnected { service }
            | FeedEvent::ReconnectExhausted { service, .. }
            | FeedEvent::DataUpdated { service, .. } => *service,
        }
    }
}

/// Fan-out of [`FeedEvent`]s to any number of listeners.
///
/// Each listener owns an unbounded queue, so nothing is dropped for a slow
/// reader and events from one publisher arrive in publish order. Listeners
/// whose receiver is gone are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<FeedEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<FeedEvent>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FeedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: FeedEvent) {
        let mut listeners = self.lock();
        listeners.retain(|listener| match listener.send(event.clone()) {
            Ok(_) => true,
            Err(_) => {
                debug!("Dropping closed event listener");
                false
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }
}
