//! `blockchain.*` handlers (§4.5): chain history, transactions, block
//! headers, spends, and stealth scans.

use query_proto::payloads::{
    self, FetchBlockHeaderRequest, FetchHistoryRequest, FetchStealthRequest,
    FetchTransactionIndexResponse, FetchTransactionRequest, HistoryPointKind, HistoryRow, OutPoint,
    StealthRow,
};
use tracing::debug;

use crate::core::node::{self};
use crate::core::registry::{HandlerContext, Registry};

use super::{bad_stream, respond};

pub fn register(registry: &mut Registry) {
    registry.register("blockchain.fetch_history", fetch_history);
    registry.register("blockchain.fetch_transaction", fetch_transaction);
    registry.register("blockchain.fetch_last_height", fetch_last_height);
    registry.register("blockchain.fetch_block_header", fetch_block_header);
    registry.register("blockchain.fetch_transaction_index", fetch_transaction_index);
    registry.register("blockchain.fetch_spend", fetch_spend);
    registry.register("blockchain.fetch_block_height", fetch_block_height);
    registry.register("blockchain.fetch_stealth", fetch_stealth);
}

async fn fetch_history(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    let Ok(decoded) = FetchHistoryRequest::decode(&request.payload) else {
        return bad_stream();
    };

    let (code, rows) = ctx
        .node
        .fetch_history(decoded.version_byte, decoded.address_hash, decoded.from_height)
        .await;

    let encoded_rows: Vec<HistoryRow> = rows
        .into_iter()
        .map(|row| HistoryRow {
            kind: if row.is_spend { HistoryPointKind::Spend } else { HistoryPointKind::Output },
            point: OutPoint { hash: row.point_hash, index: row.point_index },
            height: row.height,
            value: row.value,
        })
        .collect();

    respond(code, payloads::encode_history_rows(&encoded_rows))
}

async fn fetch_transaction(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    let Ok(decoded) = FetchTransactionRequest::decode(&request.payload) else {
        return bad_stream();
    };

    // Hashes are carried little-endian on the wire but displayed big-endian
    // (§6), matching how block explorers and the original C++ logging show
    // them.
    debug!("fetch_transaction: hash={}", hex::encode(display_hash(&decoded.tx_hash)));
    let (code, raw) = ctx.node.fetch_transaction(decoded.tx_hash).await;
    respond(code, raw)
}

/// Reverses a wire hash into big-endian display order (§6).
fn display_hash(hash: &node::Hash32) -> [u8; 32] {
    let mut reversed = *hash;
    reversed.reverse();
    reversed
}

async fn fetch_last_height(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    if !request.payload.is_empty() {
        return bad_stream();
    }

    let (code, height) = ctx.node.fetch_last_height().await;
    respond(code, height.to_le_bytes().to_vec())
}

async fn fetch_block_header(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    let Ok(decoded) = FetchBlockHeaderRequest::decode(&request.payload) else {
        return bad_stream();
    };

    let (code, header) = match decoded {
        FetchBlockHeaderRequest::Height(height) => ctx.node.fetch_block_header_by_height(height).await,
        FetchBlockHeaderRequest::Hash(hash) => ctx.node.fetch_block_header_by_hash(hash).await,
    };
    respond(code, header.raw)
}

async fn fetch_transaction_index(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    let Ok(decoded) = FetchTransactionRequest::decode(&request.payload) else {
        return bad_stream();
    };

    let (code, height, tx_index) = ctx.node.fetch_transaction_index(decoded.tx_hash).await;
    respond(code, FetchTransactionIndexResponse { height, tx_index }.encode())
}

async fn fetch_spend(request: query_proto::Request, ctx: std::sync::Arc<HandlerContext>) -> Vec<u8> {
    let Ok(outpoint) = OutPoint::decode(&request.payload) else {
        return bad_stream();
    };

    let (code, spend_hash, spend_index) =
        ctx.node.fetch_spend(outpoint.hash, outpoint.index).await;
    respond(code, OutPoint { hash: spend_hash, index: spend_index }.encode())
}

async fn fetch_block_height(
    request: query_proto::Request,
    ctx: std::sync::Arc<HandlerContext>,
) -> Vec<u8> {
    let Ok(hash): Result<node::Hash32, _> = request.payload.as_slice().try_into() else {
        return bad_stream();
    };

    let (code, height) = ctx.node.fetch_block_height(hash).await;
    respond(code, height.to_le_bytes().to_vec())
}

async fn fetch_stealth(request: query_proto::Request, ctx: std::sync::Arc<HandlerContext>) -> Vec<u8> {
    let Ok((decoded, prefix_bytes)) = FetchStealthRequest::decode(&request.payload) else {
        return bad_stream();
    };

    let (code, rows) =
        ctx.node.fetch_stealth(decoded.bitsize, prefix_bytes, decoded.from_height).await;

    let encoded_rows: Vec<StealthRow> = rows
        .into_iter()
        .map(|row| StealthRow {
            ephemkey: row.ephemkey,
            address_hash: row.address_hash,
            tx_hash: row.tx_hash,
        })
        .collect();

    respond(code, payloads::encode_stealth_rows(&encoded_rows))
}
