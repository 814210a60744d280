//! Publisher (C7, §4.7): two dedicated `PUB`-semantics sockets fanning out
//! block-acceptance and transaction-pool-acceptance events. Neither socket
//! is touched by the worker thread; both are driven by the node's event
//! bridge tasks (§4.7's block and transaction tasks run concurrently on the
//! `tokio` runtime, so each socket is wrapped the same way the send queue
//! wraps its push socket — `zmq::Socket` is not `Sync`).

use anyhow::{Context, Result};
use tracing::debug;

pub struct Publisher {
    block_socket: std::sync::Mutex<zmq::Socket>,
    transaction_socket: std::sync::Mutex<zmq::Socket>,
}

impl Publisher {
    pub fn bind(context: &zmq::Context, block_endpoint: &str, transaction_endpoint: &str) -> Result<Self> {
        let block_socket = context.socket(zmq::PUB).context("failed to create block publish socket")?;
        block_socket
            .bind(block_endpoint)
            .with_context(|| format!("failed to bind block publish socket to {block_endpoint}"))?;

        let transaction_socket =
            context.socket(zmq::PUB).context("failed to create transaction publish socket")?;
        transaction_socket
            .bind(transaction_endpoint)
            .with_context(|| format!("failed to bind transaction publish socket to {transaction_endpoint}"))?;

        Ok(Publisher {
            block_socket: std::sync::Mutex::new(block_socket),
            transaction_socket: std::sync::Mutex::new(transaction_socket),
        })
    }

    /// `{height (4 LE) ‖ serialized_block}` (§4.7). Overflow drops the
    /// message rather than blocking the caller.
    pub fn publish_block(&self, height: u32, serialized_block: &[u8]) {
        let mut frame = height.to_le_bytes().to_vec();
        frame.extend_from_slice(serialized_block);
        self.send(&self.block_socket, frame, "block");
    }

    /// `{serialized_tx}` (§4.7).
    pub fn publish_transaction(&self, serialized_tx: &[u8]) {
        self.send(&self.transaction_socket, serialized_tx.to_vec(), "transaction");
    }

    fn send(&self, socket: &std::sync::Mutex<zmq::Socket>, frame: Vec<u8>, kind: &str) {
        match socket.lock().unwrap().send(frame, zmq::DONTWAIT) {
            Ok(()) => {}
            Err(zmq::Error::EAGAIN) => {
                debug!("publish buffer full, dropping {kind} event");
            }
            Err(err) => {
                debug!("failed to publish {kind} event: error={err}");
            }
        }
    }
}
