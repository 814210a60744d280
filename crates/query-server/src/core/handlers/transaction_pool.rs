//! `transaction_pool.*` handlers (§4.5): mempool validation and lookup.

use query_proto::payloads::FetchTransactionRequest;

use crate::core::registry::{HandlerContext, Registry};

use super::{bad_stream, respond};

pub fn register(registry: &mut Registry) {
    registry.register("transaction_pool.validate", validate);
    registry.register("transaction_pool.fetch_transaction", fetch_transaction);
}

async fn validate(request: query_proto::Request, ctx: std::sync::Arc<HandlerContext>) -> Vec<u8> {
    let (code, unconfirmed_indices) = ctx.node.pool_validate(request.payload).await;
    let body: Vec<u8> = unconfirmed_indices.iter().flat_map(|index| index.to_le_bytes()).collect();
    respond(code, body)
}

async fn fetch_transaction(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    let Ok(decoded) = FetchTransactionRequest::decode(&request.payload) else {
        return bad_stream();
    };

    let (code, raw) = ctx.node.pool_fetch(decoded.tx_hash).await;
    respond(code, raw)
}
