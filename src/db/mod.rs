mod kv;
mod repository;
mod schema;
mod stores;

pub use kv::{KvStore, MemoryStore};
pub use repository::Repository;
pub use stores::{NotificationStateStore, SubscriptionStore};
