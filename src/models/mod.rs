mod item;
mod subscription;

pub use item::{LatestItem, Outcome};
pub use subscription::{NotificationRecord, Subscription, SubscriptionConfig};
