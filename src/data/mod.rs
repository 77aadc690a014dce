pub mod record;
pub mod cache;
pub mod registry;
pub mod events;

pub use record::{CachedRecord, normalize_symbol};
pub use cache::FeedCache;
pub use registry::SubscriptionRegistry;
pub use events::{EventBus, FeedEvent};
