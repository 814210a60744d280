pub mod events;
pub mod handlers;
pub mod node;
pub mod publisher;
pub mod registry;
pub mod send_queue;
pub mod subscriptions;
pub mod worker;

pub use node::Node;
pub use publisher::Publisher;
pub use registry::{HandlerContext, Registry};
pub use send_queue::SendQueue;
pub use subscriptions::SubscriptionManager;
pub use worker::RequestWorker;
