//! Handler library (C5, §4.5): one module per command namespace. Every
//! handler obeys the uniform response shape `4-byte error code (LE) ‖
//! command-specific body` and is registered by name into the command
//! registry at startup.

pub mod blockchain;
pub mod protocol;
pub mod subscribe;
pub mod transaction_pool;

use query_proto::payloads::codes::BAD_STREAM;

use crate::core::registry::Registry;

/// Prepends the 4-byte little-endian error code to a response body.
fn respond(code: u32, mut body: Vec<u8>) -> Vec<u8> {
    let mut out = code.to_le_bytes().to_vec();
    out.append(&mut body);
    out
}

/// An error response carries the code and nothing else (§4.5's
/// "payload-size validation... fails with BadStream, empty body").
fn bad_stream() -> Vec<u8> {
    respond(BAD_STREAM, Vec::new())
}

/// Registers every handler in the library under its exact command name.
pub fn register_all(registry: &mut Registry) {
    blockchain::register(registry);
    protocol::register(registry);
    transaction_pool::register(registry);
    subscribe::register(registry);
}
