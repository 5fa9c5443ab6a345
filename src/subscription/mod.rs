pub mod filter;
pub mod manager;
pub mod transport;

pub use filter::{ids_changed, Filter};
pub use manager::{OpenOutcome, SubscriptionError, SubscriptionManager};
pub use transport::{BatchSink, LogbookTransport, StreamBatch, TransportError, Unsubscribe};
