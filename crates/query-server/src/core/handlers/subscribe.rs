//! `subscribe` / `renew` handlers (§4.5/§4.6): routed straight into the
//! subscription manager (C6). The decode happens here so malformed
//! payloads never reach the dispatcher task.

use query_proto::payloads::SubscribeRequest;

use crate::core::registry::{HandlerContext, Registry};

use super::{bad_stream, respond};

pub fn register(registry: &mut Registry) {
    registry.register("subscribe", subscribe);
    registry.register("renew", renew);
}

async fn subscribe(request: query_proto::Request, ctx: std::sync::Arc<HandlerContext>) -> Vec<u8> {
    let Ok(decoded) = SubscribeRequest::decode(&request.payload) else {
        return bad_stream();
    };

    let code = ctx
        .subscriptions
        .subscribe(decoded.kind, decoded.bitsize, decoded.prefix_bytes, request.origin, request.id)
        .await;
    respond(code, Vec::new())
}

async fn renew(request: query_proto::Request, ctx: std::sync::Arc<HandlerContext>) -> Vec<u8> {
    let Ok(decoded) = SubscribeRequest::decode(&request.payload) else {
        return bad_stream();
    };

    let code = ctx
        .subscriptions
        .renew(decoded.kind, decoded.bitsize, decoded.prefix_bytes, request.origin)
        .await;
    respond(code, Vec::new())
}
