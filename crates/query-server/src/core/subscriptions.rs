//! Subscription manager (§4.6): a bounded, time-expiring registry of
//! address-prefix and stealth-prefix subscriptions. All mutation happens on
//! a single dispatcher task fed by an `mpsc` channel, giving "touched by
//! exactly one thread, no locks" through message-passing rather than a
//! mutex (§9's Open Question resolution).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::core::node::{Hash32, Transaction};
use crate::core::send_queue::SendQueue;
use query_proto::Response;
use query_proto::payloads::SubscribeKind;

pub use query_proto::payloads::codes::{BAD_STREAM, OVERSUBSCRIBED_MAXIMUM, SUCCESS};

fn max_bitsize(kind: SubscribeKind) -> u8 {
    match kind {
        SubscribeKind::Address => 160,
        SubscribeKind::Stealth => 32,
    }
}

fn update_command(kind: SubscribeKind) -> &'static str {
    match kind {
        SubscribeKind::Address => "address.update",
        SubscribeKind::Stealth => "address.stealth_update",
    }
}

struct Subscription {
    kind: SubscribeKind,
    bitsize: u8,
    prefix_bytes: Vec<u8>,
    client_origin: Vec<u8>,
    request_id: u32,
    expiry: Instant,
}

impl Subscription {
    fn matches(&self, kind: SubscribeKind, candidate: &[u8]) -> bool {
        self.kind == kind && prefix_matches(self.bitsize, &self.prefix_bytes, candidate)
    }
}

/// Compares the first `bitsize` bits of `prefix` against the first
/// `bitsize` bits of `candidate`.
fn prefix_matches(bitsize: u8, prefix: &[u8], candidate: &[u8]) -> bool {
    let full_bytes = (bitsize / 8) as usize;
    if prefix.len() < full_bytes || candidate.len() < full_bytes {
        return false;
    }
    if prefix[..full_bytes] != candidate[..full_bytes] {
        return false;
    }

    let remainder_bits = bitsize % 8;
    if remainder_bits == 0 {
        return true;
    }

    let mask = 0xFFu8 << (8 - remainder_bits);
    let (Some(&p), Some(&c)) = (prefix.get(full_bytes), candidate.get(full_bytes)) else {
        return false;
    };
    (p & mask) == (c & mask)
}

enum Command {
    Subscribe {
        kind: SubscribeKind,
        bitsize: u8,
        prefix_bytes: Vec<u8>,
        client_origin: Vec<u8>,
        request_id: u32,
        reply: oneshot::Sender<u32>,
    },
    Renew {
        kind: SubscribeKind,
        bitsize: u8,
        prefix_bytes: Vec<u8>,
        client_origin: Vec<u8>,
        reply: oneshot::Sender<u32>,
    },
    Submit {
        height: u32,
        block_hash: Hash32,
        transaction: Transaction,
    },
}

/// Handle to the subscription manager. Cloning is cheap; every clone
/// shares the same dispatcher task.
#[derive(Clone)]
pub struct SubscriptionManager {
    sender: mpsc::UnboundedSender<Command>,
}

impl SubscriptionManager {
    pub fn start(
        send_queue: Arc<SendQueue>,
        subscription_limit: usize,
        subscription_expiration: Duration,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Command>();

        tokio::spawn(async move {
            let mut subscriptions: Vec<Subscription> = Vec::new();

            while let Some(command) = receiver.recv().await {
                match command {
                    Command::Subscribe {
                        kind,
                        bitsize,
                        prefix_bytes,
                        client_origin,
                        request_id,
                        reply,
                    } => {
                        let code = if subscriptions.len() >= subscription_limit {
                            OVERSUBSCRIBED_MAXIMUM
                        } else {
                            subscriptions.push(Subscription {
                                kind,
                                bitsize,
                                prefix_bytes,
                                client_origin,
                                request_id,
                                expiry: Instant::now() + subscription_expiration,
                            });
                            SUCCESS
                        };
                        let _ = reply.send(code);
                    }
                    Command::Renew { kind, bitsize, prefix_bytes, client_origin, reply } => {
                        let new_expiry = Instant::now() + subscription_expiration;
                        for sub in subscriptions.iter_mut() {
                            if sub.client_origin == client_origin
                                && sub.kind == kind
                                && sub.bitsize == bitsize
                                && sub.prefix_bytes == prefix_bytes
                            {
                                sub.expiry = new_expiry;
                            }
                        }
                        let _ = reply.send(SUCCESS);
                    }
                    Command::Submit { height, block_hash, transaction } => {
                        let now = Instant::now();
                        subscriptions.retain(|sub| sub.expiry >= now);

                        for output in &transaction.outputs {
                            if let Some(address_hash) = output.address_hash {
                                for sub in subscriptions
                                    .iter()
                                    .filter(|sub| sub.matches(SubscribeKind::Address, &address_hash))
                                {
                                    deliver(&send_queue, sub, height, &block_hash, &transaction);
                                }
                            }
                            if let Some(prefix) = output.stealth_prefix {
                                let prefix_bytes = prefix.to_be_bytes();
                                for sub in subscriptions
                                    .iter()
                                    .filter(|sub| sub.matches(SubscribeKind::Stealth, &prefix_bytes))
                                {
                                    deliver(&send_queue, sub, height, &block_hash, &transaction);
                                }
                            }
                        }
                    }
                }
            }
        });

        SubscriptionManager { sender }
    }

    pub async fn subscribe(
        &self,
        kind: SubscribeKind,
        bitsize: u8,
        prefix_bytes: Vec<u8>,
        client_origin: Vec<u8>,
        request_id: u32,
    ) -> u32 {
        if bitsize > max_bitsize(kind) || prefix_bytes.len() != prefix_byte_len(bitsize) {
            return BAD_STREAM;
        }

        let (reply, recv) = oneshot::channel();
        if self
            .sender
            .send(Command::Subscribe { kind, bitsize, prefix_bytes, client_origin, request_id, reply })
            .is_err()
        {
            return BAD_STREAM;
        }
        recv.await.unwrap_or(BAD_STREAM)
    }

    pub async fn renew(
        &self,
        kind: SubscribeKind,
        bitsize: u8,
        prefix_bytes: Vec<u8>,
        client_origin: Vec<u8>,
    ) -> u32 {
        if bitsize > max_bitsize(kind) || prefix_bytes.len() != prefix_byte_len(bitsize) {
            return BAD_STREAM;
        }

        let (reply, recv) = oneshot::channel();
        if self.sender.send(Command::Renew { kind, bitsize, prefix_bytes, client_origin, reply }).is_err()
        {
            return BAD_STREAM;
        }
        recv.await.unwrap_or(BAD_STREAM)
    }

    /// Invoked for every transaction observed on chain (block acceptance
    /// only — never for reorg-removed transactions, per §9). Sweeping
    /// expired subscriptions happens as part of the same dispatcher turn.
    pub fn submit(&self, height: u32, block_hash: Hash32, transaction: Transaction) {
        if self.sender.send(Command::Submit { height, block_hash, transaction }).is_err() {
            debug!("subscription dispatcher is gone, dropping submit");
        }
    }
}

fn prefix_byte_len(bitsize: u8) -> usize {
    bitsize.div_ceil(8) as usize
}

fn deliver(
    send_queue: &SendQueue,
    sub: &Subscription,
    height: u32,
    block_hash: &Hash32,
    transaction: &Transaction,
) {
    let mut payload = SUCCESS.to_le_bytes().to_vec();
    payload.extend_from_slice(&query_proto::payloads::encode_update_body(
        height,
        block_hash,
        &transaction.raw,
    ));

    let response = Response {
        dest: sub.client_origin.clone(),
        command: update_command(sub.kind).to_string(),
        id: sub.request_id,
        payload,
    };
    send_queue.queue_send(query_proto::encode_response(&response));
}
