//! `protocol.*` handlers (§4.5): transaction broadcast and live connection
//! count.

use query_proto::payloads::codes::SUCCESS;

use crate::core::registry::{HandlerContext, Registry};

use super::respond;

pub fn register(registry: &mut Registry) {
    registry.register("protocol.broadcast_transaction", broadcast_transaction);
    registry.register("protocol.total_connections", total_connections);
}

/// Fire-and-forget: the node is asked to broadcast, nothing is awaited
/// back from the peer network (§4.5).
async fn broadcast_transaction(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    ctx.node.broadcast(request.payload).await;
    respond(SUCCESS, Vec::new())
}

/// The original hardcodes zero here; per §9's Open Question this
/// implements the intended "live connection count" semantics instead.
async fn total_connections(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    if !request.payload.is_empty() {
        return super::bad_stream();
    }

    let count = ctx.node.connection_count().await;
    respond(SUCCESS, count.to_le_bytes().to_vec())
}
