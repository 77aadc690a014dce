use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Subscriptions {
    subscriber_count: usize,
    symbols: HashSet<String>,
}

/// Symbols of interest plus a raw subscriber count for one service.
///
/// The symbol set has set semantics while the count tracks every call, so two
/// subscribes to the same symbol leave one symbol and a count of two.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<Subscriptions>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscriptions> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the new subscriber count.
    pub fn subscribe(&self, symbol: &str) -> usize {
        let mut subs = self.lock();
        subs.symbols.insert(symbol.to_string());
        subs.subscriber_count += 1;
        subs.subscriber_count
    }

    /// Returns the new subscriber count, floored at zero.
    pub fn unsubscribe(&self, symbol: &str) -> usize {
        let mut subs = self.lock();
        subs.symbols.remove(symbol);
        subs.subscriber_count = subs.subscriber_count.saturating_sub(1);
        subs.subscriber_count
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscriber_count
    }

    /// Sorted snapshot of the tracked symbols.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.lock().symbols.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn reset(&self) {
        let mut subs = self.lock();
        subs.subscriber_count = 0;
        subs.symbols.clear();
    }
}
