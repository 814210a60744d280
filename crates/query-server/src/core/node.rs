//! The external node contract (§6). The blockchain database, transaction
//! pool, and peer network sit behind this trait — their internal design is
//! out of scope (§1). Every operation is asynchronous; node calls never
//! block the worker thread that invoked them.

use async_trait::async_trait;
use tokio::sync::broadcast;

pub type Hash32 = [u8; 32];

/// Opaque 32-bit error code. `0` is success; everything else is surfaced
/// verbatim to the client (§6).
pub type ErrorCode = u32;
pub const SUCCESS: ErrorCode = 0;

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub is_spend: bool,
    pub point_hash: Hash32,
    pub point_index: u32,
    pub height: u32,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct StealthRow {
    pub ephemkey: [u8; 32],
    pub address_hash: [u8; 20],
    pub tx_hash: Hash32,
}

/// A transaction as the node hands it to the core: raw wire bytes plus
/// enough structure for the subscription manager to extract payment
/// addresses and stealth prefixes without re-parsing consensus rules.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub hash: Hash32,
    pub raw: Vec<u8>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone)]
pub struct TxOutput {
    /// RIPEMD160 payment address hash, when the output pays a known
    /// address script type.
    pub address_hash: Option<[u8; 20]>,
    /// 32-bit stealth prefix, when the output carries a stealth marker.
    pub stealth_prefix: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub raw: Vec<u8>,
}

/// A block-acceptance event, including reorg information. Per §9's Open
/// Question, only `added` is ever submitted to the subscription manager —
/// `removed` is carried for completeness but produces no notifications
/// ("at-most-once per acceptance; no rollback notifications").
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub height: u32,
    pub hash: Hash32,
    pub raw: Vec<u8>,
    pub added: Vec<Transaction>,
    pub removed: Vec<Transaction>,
}

#[derive(Debug, Clone)]
pub struct TransactionEvent {
    pub transaction: Transaction,
}

#[async_trait]
pub trait Node: Send + Sync + 'static {
    async fn fetch_history(
        &self,
        version_byte: u8,
        address_hash: [u8; 20],
        from_height: u32,
    ) -> (ErrorCode, Vec<HistoryRow>);

    async fn fetch_transaction(&self, hash: Hash32) -> (ErrorCode, Vec<u8>);

    async fn fetch_last_height(&self) -> (ErrorCode, u32);

    async fn fetch_block_header_by_height(&self, height: u32) -> (ErrorCode, BlockHeader);

    async fn fetch_block_header_by_hash(&self, hash: Hash32) -> (ErrorCode, BlockHeader);

    async fn fetch_transaction_index(&self, hash: Hash32) -> (ErrorCode, u32, u32);

    async fn fetch_spend(&self, outpoint_hash: Hash32, outpoint_index: u32) -> (ErrorCode, Hash32, u32);

    async fn fetch_block_height(&self, hash: Hash32) -> (ErrorCode, u32);

    async fn fetch_stealth(
        &self,
        bitsize: u8,
        prefix_bytes: Vec<u8>,
        from_height: u32,
    ) -> (ErrorCode, Vec<StealthRow>);

    /// Fire-and-forget: the node is told to broadcast, the core does not
    /// wait for peer acknowledgement (§4.5).
    async fn broadcast(&self, raw_tx: Vec<u8>);

    async fn connection_count(&self) -> u32;

    async fn pool_validate(&self, raw_tx: Vec<u8>) -> (ErrorCode, Vec<u32>);

    async fn pool_fetch(&self, hash: Hash32) -> (ErrorCode, Vec<u8>);

    fn block_events(&self) -> broadcast::Receiver<BlockEvent>;

    fn transaction_events(&self) -> broadcast::Receiver<TransactionEvent>;
}

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    /// A fully in-memory `Node` used by the core's own tests and by
    /// downstream integration tests that need to drive the worker without
    /// a real blockchain database.
    pub struct MockNode {
        pub history: Mutex<Vec<HistoryRow>>,
        pub transactions: Mutex<std::collections::HashMap<Hash32, Vec<u8>>>,
        pub last_height: Mutex<u32>,
        pub headers_by_height: Mutex<std::collections::HashMap<u32, BlockHeader>>,
        pub headers_by_hash: Mutex<std::collections::HashMap<Hash32, BlockHeader>>,
        pub tx_index: Mutex<std::collections::HashMap<Hash32, (u32, u32)>>,
        pub spends: Mutex<std::collections::HashMap<(Hash32, u32), (Hash32, u32)>>,
        pub block_heights: Mutex<std::collections::HashMap<Hash32, u32>>,
        pub stealth: Mutex<Vec<StealthRow>>,
        pub broadcasted: Mutex<Vec<Vec<u8>>>,
        pub connections: Mutex<u32>,
        pub pool_validate_result: Mutex<(ErrorCode, Vec<u32>)>,
        pub pool: Mutex<std::collections::HashMap<Hash32, Vec<u8>>>,
        block_tx: broadcast::Sender<BlockEvent>,
        transaction_tx: broadcast::Sender<TransactionEvent>,
    }

    impl Default for MockNode {
        fn default() -> Self {
            let (block_tx, _) = broadcast::channel(64);
            let (transaction_tx, _) = broadcast::channel(64);
            MockNode {
                history: Mutex::new(Vec::new()),
                transactions: Mutex::new(Default::default()),
                last_height: Mutex::new(0),
                headers_by_height: Mutex::new(Default::default()),
                headers_by_hash: Mutex::new(Default::default()),
                tx_index: Mutex::new(Default::default()),
                spends: Mutex::new(Default::default()),
                block_heights: Mutex::new(Default::default()),
                stealth: Mutex::new(Vec::new()),
                broadcasted: Mutex::new(Vec::new()),
                connections: Mutex::new(0),
                pool_validate_result: Mutex::new((SUCCESS, Vec::new())),
                pool: Mutex::new(Default::default()),
                block_tx,
                transaction_tx,
            }
        }
    }

    impl MockNode {
        pub fn emit_block(&self, event: BlockEvent) {
            let _ = self.block_tx.send(event);
        }

        pub fn emit_transaction(&self, event: TransactionEvent) {
            let _ = self.transaction_tx.send(event);
        }
    }

    #[async_trait]
    impl Node for MockNode {
        async fn fetch_history(
            &self,
            _version_byte: u8,
            _address_hash: [u8; 20],
            from_height: u32,
        ) -> (ErrorCode, Vec<HistoryRow>) {
            let rows: Vec<HistoryRow> = self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.height >= from_height)
                .cloned()
                .collect();
            (SUCCESS, rows)
        }

        async fn fetch_transaction(&self, hash: Hash32) -> (ErrorCode, Vec<u8>) {
            match self.transactions.lock().unwrap().get(&hash) {
                Some(raw) => (SUCCESS, raw.clone()),
                None => (1, Vec::new()),
            }
        }

        async fn fetch_last_height(&self) -> (ErrorCode, u32) {
            (SUCCESS, *self.last_height.lock().unwrap())
        }

        async fn fetch_block_header_by_height(&self, height: u32) -> (ErrorCode, BlockHeader) {
            match self.headers_by_height.lock().unwrap().get(&height) {
                Some(header) => (SUCCESS, header.clone()),
                None => (1, BlockHeader { raw: Vec::new() }),
            }
        }

        async fn fetch_block_header_by_hash(&self, hash: Hash32) -> (ErrorCode, BlockHeader) {
            match self.headers_by_hash.lock().unwrap().get(&hash) {
                Some(header) => (SUCCESS, header.clone()),
                None => (1, BlockHeader { raw: Vec::new() }),
            }
        }

        async fn fetch_transaction_index(&self, hash: Hash32) -> (ErrorCode, u32, u32) {
            match self.tx_index.lock().unwrap().get(&hash) {
                Some((height, index)) => (SUCCESS, *height, *index),
                None => (1, 0, 0),
            }
        }

        async fn fetch_spend(
            &self,
            outpoint_hash: Hash32,
            outpoint_index: u32,
        ) -> (ErrorCode, Hash32, u32) {
            match self.spends.lock().unwrap().get(&(outpoint_hash, outpoint_index)) {
                Some((hash, index)) => (SUCCESS, *hash, *index),
                None => (1, [0u8; 32], 0),
            }
        }

        async fn fetch_block_height(&self, hash: Hash32) -> (ErrorCode, u32) {
            match self.block_heights.lock().unwrap().get(&hash) {
                Some(height) => (SUCCESS, *height),
                None => (1, 0),
            }
        }

        async fn fetch_stealth(
            &self,
            _bitsize: u8,
            _prefix_bytes: Vec<u8>,
            from_height: u32,
        ) -> (ErrorCode, Vec<StealthRow>) {
            let rows = self.stealth.lock().unwrap().clone();
            let _ = from_height;
            (SUCCESS, rows)
        }

        async fn broadcast(&self, raw_tx: Vec<u8>) {
            self.broadcasted.lock().unwrap().push(raw_tx);
        }

        async fn connection_count(&self) -> u32 {
            *self.connections.lock().unwrap()
        }

        async fn pool_validate(&self, _raw_tx: Vec<u8>) -> (ErrorCode, Vec<u32>) {
            self.pool_validate_result.lock().unwrap().clone()
        }

        async fn pool_fetch(&self, hash: Hash32) -> (ErrorCode, Vec<u8>) {
            match self.pool.lock().unwrap().get(&hash) {
                Some(raw) => (SUCCESS, raw.clone()),
                None => (1, Vec::new()),
            }
        }

        fn block_events(&self) -> broadcast::Receiver<BlockEvent> {
            self.block_tx.subscribe()
        }

        fn transaction_events(&self) -> broadcast::Receiver<TransactionEvent> {
            self.transaction_tx.subscribe()
        }
    }
}
