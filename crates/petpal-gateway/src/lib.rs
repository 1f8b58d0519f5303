pub mod connection;
pub mod dispatcher;
pub mod session;

pub use dispatcher::{Dispatcher, Snapshot, StoreChange, Subscription, SubscriptionEvent};
pub use session::{AuthSession, Identity};
