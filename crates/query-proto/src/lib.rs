//! Wire framing for the query server's request/response envelope.
//!
//! A request arrives as an ordered group of transport frames: zero or more
//! identity frames (the ZMQ `ROUTER` routing prefix), a command frame, a
//! 4-byte little-endian id frame, and a payload frame. This module only
//! knows about frame *groups* (`Vec<Vec<u8>>`) — it has no `zmq` dependency
//! so it can be unit tested without a context or a socket.

use thiserror::Error;

pub mod payloads;

pub const MAX_COMMAND_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("missing frame: {0}")]
    MissingFrame(&'static str),
    #[error("id frame must be exactly 4 bytes, got {0}")]
    BadIdFrame(usize),
    #[error("command frame exceeds {MAX_COMMAND_LEN} bytes: got {0}")]
    CommandTooLong(usize),
    #[error("command frame is not valid UTF-8")]
    CommandNotUtf8,
}

/// A decoded request: identity preserved verbatim for return routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub origin: Vec<u8>,
    pub command: String,
    pub id: u32,
    pub payload: Vec<u8>,
}

/// A response: `dest == request.origin`, `command`/`id` echo the request.
/// An empty `dest` means "unrouted broadcast" — used only by the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub dest: Vec<u8>,
    pub command: String,
    pub id: u32,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn for_request(request: &Request, payload: Vec<u8>) -> Self {
        Response {
            dest: request.origin.clone(),
            command: request.command.clone(),
            id: request.id,
            payload,
        }
    }
}

/// Decode a frame group received off a `ROUTER` socket.
///
/// `identity_frame_count` is the number of leading frames that form the
/// routing prefix. For a direct client connection to a `ROUTER` socket this
/// is always 1 (ZMQ prepends exactly one identity frame per message); it is
/// exposed as a parameter so tests and any future multi-hop topology can
/// drive the codec without assuming a fixed value.
pub fn decode_request(
    frames: &[Vec<u8>],
    identity_frame_count: usize,
) -> Result<Request, ProtoError> {
    if frames.len() < identity_frame_count + 3 {
        return Err(ProtoError::MissingFrame("command/id/payload"));
    }

    let origin: Vec<u8> =
        frames[..identity_frame_count].iter().flatten().copied().collect();

    let command_bytes = &frames[identity_frame_count];
    if command_bytes.len() > MAX_COMMAND_LEN {
        return Err(ProtoError::CommandTooLong(command_bytes.len()));
    }
    let command = String::from_utf8(command_bytes.clone())
        .map_err(|_| ProtoError::CommandNotUtf8)?;

    let id_bytes = &frames[identity_frame_count + 1];
    if id_bytes.len() != 4 {
        return Err(ProtoError::BadIdFrame(id_bytes.len()));
    }
    let id =
        u32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);

    let payload = frames[identity_frame_count + 2].clone();

    Ok(Request { origin, command, id, payload })
}

/// Encode a response into a frame group: identity, then command, then
/// 4-byte id, then payload. The identity is emitted as a single frame
/// holding `dest` verbatim — the inverse of `decode_request` when called
/// with `identity_frame_count == 1`.
pub fn encode_response(response: &Response) -> Vec<Vec<u8>> {
    vec![
        response.dest.clone(),
        response.command.clone().into_bytes(),
        response.id.to_le_bytes().to_vec(),
        response.payload.clone(),
    ]
}

/// Encode an outgoing request from the client's side of a `DEALER` socket:
/// command, then 4-byte id, then payload — no identity frame, since `DEALER`
/// never sends one explicitly (the connected `ROUTER` supplies it on
/// receipt).
pub fn encode_request(command: &str, id: u32, payload: &[u8]) -> Vec<Vec<u8>> {
    vec![command.as_bytes().to_vec(), id.to_le_bytes().to_vec(), payload.to_vec()]
}

/// Decode a response received on a `DEALER` socket: `ROUTER` strips the
/// identity frame addressed to this peer before delivery, so the frame
/// group here is exactly `[command, id, payload]`.
pub fn decode_response(frames: &[Vec<u8>]) -> Result<Response, ProtoError> {
    if frames.len() < 3 {
        return Err(ProtoError::MissingFrame("command/id/payload"));
    }

    let command =
        String::from_utf8(frames[0].clone()).map_err(|_| ProtoError::CommandNotUtf8)?;

    let id_bytes = &frames[1];
    if id_bytes.len() != 4 {
        return Err(ProtoError::BadIdFrame(id_bytes.len()));
    }
    let id = u32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);

    Ok(Response { dest: Vec::new(), command, id, payload: frames[2].clone() })
}

/// Encode a heartbeat message: a single frame carrying a 4-byte
/// little-endian sequence counter. No command, no id, no identity.
pub fn encode_heartbeat(sequence: u32) -> Vec<u8> {
    sequence.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> Request {
        Request {
            origin: vec![0x01, 0x02, 0x03],
            command: "blockchain.fetch_last_height".to_string(),
            id: 0x01020304,
            payload: vec![],
        }
    }

    #[test]
    fn round_trips_request_through_response() {
        let request = sample_request();
        let response = Response::for_request(&request, vec![0, 0, 0, 0]);
        let frames = encode_response(&response);
        let decoded = decode_request(&frames, 1).unwrap();
        assert_eq!(decoded.origin, request.origin);
        assert_eq!(decoded.command, request.command);
        assert_eq!(decoded.id, request.id);
        assert_eq!(decoded.payload, response.payload);
    }

    #[test]
    fn rejects_short_id_frame() {
        let frames = vec![
            vec![0xAA],
            b"blockchain.fetch_last_height".to_vec(),
            vec![1, 2, 3],
            vec![],
        ];
        assert_eq!(decode_request(&frames, 1), Err(ProtoError::BadIdFrame(3)));
    }

    #[test]
    fn rejects_missing_payload_frame() {
        let frames = vec![
            vec![0xAA],
            b"blockchain.fetch_last_height".to_vec(),
            vec![1, 2, 3, 4],
        ];
        assert_eq!(
            decode_request(&frames, 1),
            Err(ProtoError::MissingFrame("command/id/payload"))
        );
    }

    #[test]
    fn rejects_command_too_long() {
        let long_command = vec![b'x'; MAX_COMMAND_LEN + 1];
        let frames = vec![vec![0xAA], long_command, vec![0; 4], vec![]];
        assert_eq!(
            decode_request(&frames, 1),
            Err(ProtoError::CommandTooLong(MAX_COMMAND_LEN + 1))
        );
    }

    #[test]
    fn concatenates_multiple_identity_frames() {
        let frames = vec![
            vec![0x01],
            vec![0x02, 0x03],
            b"cmd".to_vec(),
            vec![0; 4],
            vec![9, 9],
        ];
        let decoded = decode_request(&frames, 2).unwrap();
        assert_eq!(decoded.origin, vec![0x01, 0x02, 0x03]);
        assert_eq!(decoded.payload, vec![9, 9]);
    }

    #[test]
    fn heartbeat_encodes_little_endian_counter() {
        assert_eq!(encode_heartbeat(1), vec![1, 0, 0, 0]);
        assert_eq!(encode_heartbeat(0x0102_0304), vec![4, 3, 2, 1]);
    }

    #[test]
    fn client_request_round_trips_through_server_decode() {
        let frames = encode_request("blockchain.fetch_last_height", 0x01020304, &[]);
        // A ROUTER socket prepends exactly one identity frame on receipt.
        let mut on_the_wire = vec![vec![0xAA]];
        on_the_wire.extend(frames);
        let decoded = decode_request(&on_the_wire, 1).unwrap();
        assert_eq!(decoded.command, "blockchain.fetch_last_height");
        assert_eq!(decoded.id, 0x01020304);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn client_decodes_response_without_identity_frame() {
        let response = Response {
            dest: vec![0xAA],
            command: "blockchain.fetch_last_height".to_string(),
            id: 7,
            payload: vec![0, 0, 0, 0],
        };
        // ROUTER strips the identity frame before the DEALER receives it.
        let mut frames = encode_response(&response);
        frames.remove(0);
        let decoded = decode_response(&frames).unwrap();
        assert_eq!(decoded.command, response.command);
        assert_eq!(decoded.id, response.id);
        assert_eq!(decoded.payload, response.payload);
    }

    #[test]
    fn decode_response_rejects_short_frame_group() {
        assert_eq!(
            decode_response(&[b"cmd".to_vec(), vec![0; 4]]),
            Err(ProtoError::MissingFrame("command/id/payload"))
        );
    }
}
