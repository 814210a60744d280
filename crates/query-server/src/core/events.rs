//! Bridges the node's event streams into the publisher (C7) and the
//! subscription manager (C6). Two tasks, one per stream, matching the
//! "node calls are non-blocking, handlers never sleep" model: these tasks
//! only await the next broadcast value and hand it off immediately.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::core::node::{BlockEvent, TransactionEvent};
use crate::core::publisher::Publisher;
use crate::core::subscriptions::SubscriptionManager;

/// Forwards block-acceptance events to the publisher and, for every
/// `added` transaction, to the subscription manager's `submit`. Per §9's
/// Open Question, `removed` transactions are never submitted — reorgs are
/// reflected on the publish feed only.
pub fn spawn_block_bridge(
    mut events: broadcast::Receiver<BlockEvent>,
    publisher: Arc<Publisher>,
    subscriptions: SubscriptionManager,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    publisher.publish_block(event.height, &event.raw);
                    for transaction in event.added {
                        subscriptions.submit(event.height, event.hash, transaction);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("block event bridge lagged, skipped={skipped}");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Forwards pool-accepted transactions to the publisher only; mempool
/// entries are not subscription-matched (only chain acceptance is, per
/// §4.6's `submit` contract).
pub fn spawn_transaction_bridge(
    mut events: broadcast::Receiver<TransactionEvent>,
    publisher: Arc<Publisher>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => publisher.publish_transaction(&event.transaction.raw),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("transaction event bridge lagged, skipped={skipped}");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
