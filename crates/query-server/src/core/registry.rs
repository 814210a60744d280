//! Command registry (§4.3): maps a command name to the handler that
//! decodes its payload, calls into the node, and encodes a response.
//! Registration happens once at startup; lookups happen on every request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use query_proto::Request;

use crate::core::node::Node;
use crate::core::subscriptions::SubscriptionManager;

/// Everything a handler needs beyond the request itself. Shared across
/// every dispatch, so it is built once at startup and handed to the
/// worker as an `Arc`.
pub struct HandlerContext {
    pub node: Arc<dyn Node>,
    pub subscriptions: SubscriptionManager,
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Vec<u8>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(Request, Arc<HandlerContext>) -> HandlerFuture + Send + Sync>;

/// A name-to-handler map. Registering the same command name twice replaces
/// the previous handler rather than erroring, matching the rest of the
/// core's "configuration wins, no panics on startup" posture.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<String, HandlerFn>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { handlers: HashMap::new() }
    }

    pub fn register<F, Fut>(&mut self, command: &str, handler: F)
    where
        F: Fn(Request, Arc<HandlerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<u8>> + Send + 'static,
    {
        self.handlers
            .insert(command.to_string(), Arc::new(move |request, ctx| Box::pin(handler(request, ctx))));
    }

    /// Exact-match lookup only; the command table carries no wildcards or
    /// prefix routing (§4.3).
    pub fn lookup(&self, command: &str) -> Option<HandlerFn> {
        self.handlers.get(command).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::mock::MockNode;
    use crate::core::send_queue::SendQueue;
    use std::time::Duration;

    fn sample_request(command: &str) -> Request {
        Request { origin: vec![0xAA], command: command.to_string(), id: 1, payload: vec![] }
    }

    fn context() -> Arc<HandlerContext> {
        let zmq_context = zmq::Context::new();
        let (queue, _pull) = SendQueue::new(&zmq_context, 10).unwrap();
        let subscriptions = SubscriptionManager::start(Arc::new(queue), 10, Duration::from_secs(60));
        Arc::new(HandlerContext { node: Arc::new(MockNode::default()), subscriptions })
    }

    #[tokio::test]
    async fn registers_and_dispatches_by_exact_name() {
        let mut registry = Registry::new();
        registry.register("echo", |request, _ctx| async move { request.payload });

        let handler = registry.lookup("echo").expect("handler registered");
        let mut request = sample_request("echo");
        request.payload = b"hi".to_vec();
        let result = (*handler)(request, context()).await;
        assert_eq!(result, b"hi".to_vec());
    }

    #[test]
    fn unknown_command_misses() {
        let registry = Registry::new();
        assert!(registry.lookup("nonexistent").is_none());
    }

    #[tokio::test]
    async fn re_registering_a_command_replaces_the_old_handler() {
        let mut registry = Registry::new();
        registry.register("dup", |_request, _ctx| async move { b"first".to_vec() });
        registry.register("dup", |_request, _ctx| async move { b"second".to_vec() });

        let handler = registry.lookup("dup").unwrap();
        let result = (*handler)(sample_request("dup"), context()).await;
        assert_eq!(result, b"second".to_vec());
        assert_eq!(registry.len(), 1);
    }
}
