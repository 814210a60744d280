//! Per-command payload codecs.
//!
//! Every handler response body starts with a 4-byte little-endian error
//! code (§4.5); the codecs in this module only deal with the bytes *after*
//! that code — callers are responsible for prepending it (see
//! `query_server::core::handlers`).

use thiserror::Error;

/// Protocol-level error codes. Node-originated codes are opaque and
/// surfaced verbatim (§6); these are the ones the core itself produces.
pub mod codes {
    pub const SUCCESS: u32 = 0;
    pub const BAD_STREAM: u32 = 1;
    pub const OVERSUBSCRIBED_MAXIMUM: u32 = 2;
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("bad stream: expected {expected} bytes, got {actual}")]
pub struct BadStream {
    pub expected: String,
    pub actual: usize,
}

fn bad_stream(expected: impl Into<String>, actual: usize) -> BadStream {
    BadStream { expected: expected.into(), actual }
}

pub type Hash32 = [u8; 32];
pub type ShortHash = [u8; 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutPoint {
    pub hash: Hash32,
    pub index: u32,
}

impl OutPoint {
    pub const SIZE: usize = 36;

    pub fn decode(bytes: &[u8]) -> Result<Self, BadStream> {
        if bytes.len() != Self::SIZE {
            return Err(bad_stream("36", bytes.len()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[0..32]);
        let index = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
        Ok(OutPoint { hash, index })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.hash);
        out.extend_from_slice(&self.index.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPointKind {
    Output = 0,
    Spend = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRow {
    pub kind: HistoryPointKind,
    pub point: OutPoint,
    pub height: u32,
    pub value: u64,
}

impl HistoryRow {
    pub const SIZE: usize = 1 + OutPoint::SIZE + 4 + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(match self.kind {
            HistoryPointKind::Output => 0,
            HistoryPointKind::Spend => 1,
        });
        out.extend_from_slice(&self.point.encode());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BadStream> {
        if bytes.len() != Self::SIZE {
            return Err(bad_stream(Self::SIZE.to_string(), bytes.len()));
        }
        let kind = match bytes[0] {
            0 => HistoryPointKind::Output,
            1 => HistoryPointKind::Spend,
            other => return Err(bad_stream(format!("kind in {{0,1}}, got {other}"), bytes.len())),
        };
        let point = OutPoint::decode(&bytes[1..1 + OutPoint::SIZE])?;
        let height_off = 1 + OutPoint::SIZE;
        let height = u32::from_le_bytes([
            bytes[height_off],
            bytes[height_off + 1],
            bytes[height_off + 2],
            bytes[height_off + 3],
        ]);
        let value_off = height_off + 4;
        let mut value_bytes = [0u8; 8];
        value_bytes.copy_from_slice(&bytes[value_off..value_off + 8]);
        let value = u64::from_le_bytes(value_bytes);
        Ok(HistoryRow { kind, point, height, value })
    }
}

pub fn encode_history_rows(rows: &[HistoryRow]) -> Vec<u8> {
    rows.iter().flat_map(|row| row.encode()).collect()
}

pub fn decode_history_rows(bytes: &[u8]) -> Result<Vec<HistoryRow>, BadStream> {
    if bytes.len() % HistoryRow::SIZE != 0 {
        return Err(bad_stream(
            format!("multiple of {}", HistoryRow::SIZE),
            bytes.len(),
        ));
    }
    bytes.chunks(HistoryRow::SIZE).map(HistoryRow::decode).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchHistoryRequest {
    pub version_byte: u8,
    pub address_hash: ShortHash,
    pub from_height: u32,
}

impl FetchHistoryRequest {
    pub const SIZE: usize = 1 + 20 + 4;

    pub fn decode(payload: &[u8]) -> Result<Self, BadStream> {
        if payload.len() != Self::SIZE {
            return Err(bad_stream(Self::SIZE.to_string(), payload.len()));
        }
        let version_byte = payload[0];
        let mut address_hash = [0u8; 20];
        address_hash.copy_from_slice(&payload[1..21]);
        let from_height = u32::from_le_bytes([payload[21], payload[22], payload[23], payload[24]]);
        Ok(FetchHistoryRequest { version_byte, address_hash, from_height })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.push(self.version_byte);
        out.extend_from_slice(&self.address_hash);
        out.extend_from_slice(&self.from_height.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTransactionRequest {
    pub tx_hash: Hash32,
}

impl FetchTransactionRequest {
    pub const SIZE: usize = 32;

    pub fn decode(payload: &[u8]) -> Result<Self, BadStream> {
        if payload.len() != Self::SIZE {
            return Err(bad_stream(Self::SIZE.to_string(), payload.len()));
        }
        let mut tx_hash = [0u8; 32];
        tx_hash.copy_from_slice(payload);
        Ok(FetchTransactionRequest { tx_hash })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.tx_hash.to_vec()
    }
}

/// `blockchain.fetch_block_header` accepts either a height or a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBlockHeaderRequest {
    Height(u32),
    Hash(Hash32),
}

impl FetchBlockHeaderRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, BadStream> {
        match payload.len() {
            4 => Ok(FetchBlockHeaderRequest::Height(u32::from_le_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ]))),
            32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(payload);
                Ok(FetchBlockHeaderRequest::Hash(hash))
            }
            other => Err(bad_stream("4 or 32", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTransactionIndexResponse {
    pub height: u32,
    pub tx_index: u32,
}

impl FetchTransactionIndexResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.tx_index.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BadStream> {
        if bytes.len() != 8 {
            return Err(bad_stream("8", bytes.len()));
        }
        let height = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let tx_index = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(FetchTransactionIndexResponse { height, tx_index })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStealthRequest {
    pub bitsize: u8,
    pub from_height: u32,
}

fn prefix_byte_len(bitsize: u8) -> usize {
    (bitsize as usize).div_ceil(8)
}

impl FetchStealthRequest {
    pub fn decode(payload: &[u8]) -> Result<(Self, Vec<u8>), BadStream> {
        if payload.is_empty() {
            return Err(bad_stream("at least 1 byte", payload.len()));
        }
        let bitsize = payload[0];
        if bitsize > 32 {
            return Err(bad_stream("bitsize <= 32", bitsize as usize));
        }
        let prefix_len = prefix_byte_len(bitsize);
        let expected = 1 + prefix_len + 4;
        if payload.len() != expected {
            return Err(bad_stream(expected.to_string(), payload.len()));
        }
        let prefix_bytes = payload[1..1 + prefix_len].to_vec();
        let height_off = 1 + prefix_len;
        let from_height = u32::from_le_bytes([
            payload[height_off],
            payload[height_off + 1],
            payload[height_off + 2],
            payload[height_off + 3],
        ]);
        Ok((FetchStealthRequest { bitsize, from_height }, prefix_bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthRow {
    pub ephemkey: Hash32,
    pub address_hash: ShortHash,
    pub tx_hash: Hash32,
}

impl StealthRow {
    pub const SIZE: usize = 32 + 20 + 32;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.ephemkey);
        out.extend_from_slice(&self.address_hash);
        out.extend_from_slice(&self.tx_hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BadStream> {
        if bytes.len() != Self::SIZE {
            return Err(bad_stream(Self::SIZE.to_string(), bytes.len()));
        }
        let mut ephemkey = [0u8; 32];
        ephemkey.copy_from_slice(&bytes[0..32]);
        let mut address_hash = [0u8; 20];
        address_hash.copy_from_slice(&bytes[32..52]);
        let mut tx_hash = [0u8; 32];
        tx_hash.copy_from_slice(&bytes[52..84]);
        Ok(StealthRow { ephemkey, address_hash, tx_hash })
    }
}

pub fn encode_stealth_rows(rows: &[StealthRow]) -> Vec<u8> {
    rows.iter().flat_map(|row| row.encode()).collect()
}

pub fn decode_stealth_rows(bytes: &[u8]) -> Result<Vec<StealthRow>, BadStream> {
    if bytes.len() % StealthRow::SIZE != 0 {
        return Err(bad_stream(format!("multiple of {}", StealthRow::SIZE), bytes.len()));
    }
    bytes.chunks(StealthRow::SIZE).map(StealthRow::decode).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeKind {
    Address = 0,
    Stealth = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub kind: SubscribeKind,
    pub bitsize: u8,
    pub prefix_bytes: Vec<u8>,
}

impl SubscribeRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, BadStream> {
        if payload.len() < 2 {
            return Err(bad_stream("at least 2 bytes", payload.len()));
        }
        let kind = match payload[0] {
            0 => SubscribeKind::Address,
            1 => SubscribeKind::Stealth,
            other => return Err(bad_stream(format!("kind in {{0,1}}, got {other}"), payload.len())),
        };
        let bitsize = payload[1];
        let max_bits = match kind {
            SubscribeKind::Address => 160,
            SubscribeKind::Stealth => 32,
        };
        if bitsize as u16 > max_bits {
            return Err(bad_stream(format!("bitsize <= {max_bits}"), bitsize as usize));
        }
        let prefix_len = prefix_byte_len(bitsize);
        let expected = 2 + prefix_len;
        if payload.len() != expected {
            return Err(bad_stream(expected.to_string(), payload.len()));
        }
        Ok(SubscribeRequest {
            kind,
            bitsize,
            prefix_bytes: payload[2..2 + prefix_len].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.prefix_bytes.len());
        out.push(match self.kind {
            SubscribeKind::Address => 0,
            SubscribeKind::Stealth => 1,
        });
        out.push(self.bitsize);
        out.extend_from_slice(&self.prefix_bytes);
        out
    }
}

/// Notification body for `address.update` / `address.stealth_update`:
/// `height (4 LE) ‖ block_hash (32) ‖ serialized_tx`. The 4-byte leading
/// error code is handled by the caller, same as every other response.
pub fn encode_update_body(height: u32, block_hash: &Hash32, serialized_tx: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 32 + serialized_tx.len());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(block_hash);
    out.extend_from_slice(serialized_tx);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_row_round_trips() {
        let row = HistoryRow {
            kind: HistoryPointKind::Spend,
            point: OutPoint { hash: [7u8; 32], index: 4 },
            height: 500_000,
            value: 123_456_789,
        };
        let encoded = row.encode();
        assert_eq!(encoded.len(), HistoryRow::SIZE);
        assert_eq!(HistoryRow::decode(&encoded).unwrap(), row);
    }

    #[test]
    fn fetch_history_request_rejects_bad_size() {
        let payload = vec![0u8; 10];
        assert!(FetchHistoryRequest::decode(&payload).is_err());
    }

    #[test]
    fn fetch_history_request_decodes_exact_size() {
        let mut payload = Vec::new();
        payload.push(0x00);
        payload.extend_from_slice(&[0xAB; 20]);
        payload.extend_from_slice(&500_000u32.to_le_bytes());
        let decoded = FetchHistoryRequest::decode(&payload).unwrap();
        assert_eq!(decoded.version_byte, 0x00);
        assert_eq!(decoded.address_hash, [0xAB; 20]);
        assert_eq!(decoded.from_height, 500_000);
    }

    #[test]
    fn fetch_block_header_accepts_height_or_hash() {
        let height_payload = 1234u32.to_le_bytes();
        assert_eq!(
            FetchBlockHeaderRequest::decode(&height_payload).unwrap(),
            FetchBlockHeaderRequest::Height(1234)
        );
        let hash_payload = [9u8; 32];
        assert_eq!(
            FetchBlockHeaderRequest::decode(&hash_payload).unwrap(),
            FetchBlockHeaderRequest::Hash([9u8; 32])
        );
        assert!(FetchBlockHeaderRequest::decode(&[0u8; 5]).is_err());
    }

    #[test]
    fn fetch_stealth_request_computes_prefix_length_from_bitsize() {
        let mut payload = vec![8u8]; // bitsize = 8 -> 1 prefix byte
        payload.push(0xAB);
        payload.extend_from_slice(&500_000u32.to_le_bytes());
        let (req, prefix) = FetchStealthRequest::decode(&payload).unwrap();
        assert_eq!(req.bitsize, 8);
        assert_eq!(req.from_height, 500_000);
        assert_eq!(prefix, vec![0xAB]);
    }

    #[test]
    fn fetch_stealth_request_rejects_oversized_bitsize() {
        let payload = vec![33u8, 0, 0, 0, 0, 0];
        assert!(FetchStealthRequest::decode(&payload).is_err());
    }

    #[test]
    fn subscribe_request_round_trips() {
        let req = SubscribeRequest {
            kind: SubscribeKind::Address,
            bitsize: 8,
            prefix_bytes: vec![0xAB],
        };
        let encoded = req.encode();
        let decoded = SubscribeRequest::decode(&encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn subscribe_request_rejects_bitsize_over_kind_max() {
        let mut payload = vec![1u8, 33]; // stealth, bitsize 33 > 32
        payload.extend_from_slice(&[0u8; 5]);
        assert!(SubscribeRequest::decode(&payload).is_err());
    }

    #[test]
    fn stealth_rows_round_trip() {
        let row = StealthRow { ephemkey: [1u8; 32], address_hash: [2u8; 20], tx_hash: [3u8; 32] };
        let encoded = encode_stealth_rows(&[row.clone()]);
        let decoded = decode_stealth_rows(&encoded).unwrap();
        assert_eq!(decoded, vec![row]);
    }

    #[test]
    fn update_body_matches_scenario_3_layout() {
        let body = encode_update_body(500_000, &[0xAA; 32], &[1, 2, 3]);
        assert_eq!(&body[0..4], &500_000u32.to_le_bytes());
        assert_eq!(&body[4..36], &[0xAA; 32]);
        assert_eq!(&body[36..], &[1, 2, 3]);
    }
}
