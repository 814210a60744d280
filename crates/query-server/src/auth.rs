//! Client authentication: ZPL certificate loading and a ZAP (ZMQ RFC 27)
//! handler thread enforcing the IP allowlist and CURVE client-key allowlist
//! described in §4.4/§6.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";
const ZAP_VERSION: &[u8] = b"1.0";

/// A loaded ZPL (ZeroMQ Property Language) CURVE certificate. The public
/// key is always present; the secret key is only present for the server's
/// own certificate (client certificate files carry the public key alone).
#[derive(Debug, Clone)]
pub struct Certificate {
    pub public_key: [u8; 32],
    pub secret_key: Option<[u8; 32]>,
}

impl Certificate {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read certificate {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("failed to parse certificate {}", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        let properties = parse_zpl_curve_section(raw);

        let public_z85 = properties
            .get("public-key")
            .context("certificate missing curve.public-key")?;
        let public_key = z85_decode_fixed::<32>(public_z85)
            .context("certificate public-key is not valid Z85")?;

        let secret_key = match properties.get("secret-key") {
            Some(z85) => Some(
                z85_decode_fixed::<32>(z85).context("certificate secret-key is not valid Z85")?,
            ),
            None => None,
        };

        Ok(Certificate { public_key, secret_key })
    }
}

/// Parses the minimal ZPL subset libbitcoin's `zcert_save`/`zcert_load`
/// produce: a flat `section\n    key = "value"` structure. Only the
/// `curve` section's properties are returned.
fn parse_zpl_curve_section(raw: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    let mut in_curve_section = false;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with(' ') || line.starts_with('\t');
        if !is_indented {
            in_curve_section = trimmed == "curve";
            continue;
        }

        if !in_curve_section {
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim().to_string();
            let value = value.trim().trim_matches('"').to_string();
            properties.insert(key, value);
        }
    }

    properties
}

/// Loads every `*.key` / `*.cert` certificate in a directory into a lookup
/// set of accepted client public keys.
pub fn load_client_keys(dir: &Path) -> Result<Vec<[u8; 32]>> {
    let mut keys = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read client certificate dir {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let cert = Certificate::load(&entry.path())?;
        keys.push(cert.public_key);
    }

    Ok(keys)
}

/// Handle to a running ZAP authentication thread.
pub struct Authenticator {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Authenticator {
    /// Starts the ZAP handler thread. `whitelisted_ips` empty means "admit
    /// all IPs" (§4.4). `accepted_client_keys` of `None` means anonymous
    /// CURVE mode: any key (or `NULL` mechanism) is accepted once the IP
    /// check passes.
    pub fn start(
        context: zmq::Context,
        whitelisted_ips: Vec<IpAddr>,
        accepted_client_keys: Option<Vec<[u8; 32]>>,
    ) -> Result<Self> {
        let socket = context
            .socket(zmq::ROUTER)
            .context("failed to create ZAP handler socket")?;
        socket
            .bind(ZAP_ENDPOINT)
            .context("failed to bind ZAP handler socket")?;
        socket
            .set_rcvtimeo(200)
            .context("failed to set ZAP handler receive timeout")?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();

        let handle = std::thread::spawn(move || {
            run_zap_handler(socket, whitelisted_ips, accepted_client_keys, thread_shutdown);
        });

        Ok(Authenticator { shutdown, handle: Some(handle) })
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_zap_handler(
    socket: zmq::Socket,
    whitelisted_ips: Vec<IpAddr>,
    accepted_client_keys: Option<Vec<[u8; 32]>>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match socket.recv_multipart(0) {
            Ok(frames) => {
                if let Some(reply) =
                    build_zap_reply(&frames, &whitelisted_ips, accepted_client_keys.as_deref())
                {
                    if let Err(err) = socket.send_multipart(reply, 0) {
                        warn!("failed to send ZAP reply: error={err}");
                    }
                }
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(err) => {
                warn!("ZAP handler socket error: error={err}");
                break;
            }
        }
    }
}

/// Builds a ZAP (RFC 27) reply frame group from a request frame group.
/// Returns `None` only when the request is too malformed to address a
/// routing-id frame back to (never expected from a conforming libzmq).
fn build_zap_reply(
    frames: &[Vec<u8>],
    whitelisted_ips: &[IpAddr],
    accepted_client_keys: Option<&[[u8; 32]]>,
) -> Option<Vec<Vec<u8>>> {
    // ROUTER prepends the routing id; RFC 27 defines frames 1..7 below.
    if frames.len() < 2 {
        return None;
    }
    let routing_id = frames[0].clone();

    let version = frames.get(1).cloned().unwrap_or_default();
    let request_id = frames.get(2).cloned().unwrap_or_default();
    let address = frames.get(4).map(|b| String::from_utf8_lossy(b).to_string());
    let mechanism = frames.get(6).map(|b| String::from_utf8_lossy(b).to_string());
    let credentials = frames.get(7);

    if version != ZAP_VERSION {
        return Some(deny(routing_id, version, request_id, "500", "version mismatch"));
    }

    if !whitelisted_ips.is_empty() {
        let allowed = address
            .as_deref()
            .and_then(|addr| addr.parse::<IpAddr>().ok())
            .map(|ip| whitelisted_ips.contains(&ip))
            .unwrap_or(false);
        if !allowed {
            debug!("ZAP: rejecting address not in whitelist: address={address:?}");
            return Some(deny(routing_id, version, request_id, "400", "address rejected"));
        }
    }

    if mechanism.as_deref() == Some("CURVE") {
        if let Some(accepted) = accepted_client_keys {
            let key_matches = credentials
                .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
                .map(|key| accepted.contains(&key))
                .unwrap_or(false);
            if !key_matches {
                debug!("ZAP: rejecting unknown client public key");
                return Some(deny(routing_id, version, request_id, "400", "unknown public key"));
            }
        }
    }

    Some(vec![
        routing_id,
        version,
        request_id,
        b"200".to_vec(),
        b"OK".to_vec(),
        Vec::new(),
        Vec::new(),
    ])
}

fn deny(
    routing_id: Vec<u8>,
    version: Vec<u8>,
    request_id: Vec<u8>,
    status_code: &str,
    status_text: &str,
) -> Vec<Vec<u8>> {
    vec![
        routing_id,
        version,
        request_id,
        status_code.as_bytes().to_vec(),
        status_text.as_bytes().to_vec(),
        Vec::new(),
        Vec::new(),
    ]
}

const Z85_ALPHABET: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

fn z85_decode_fixed<const N: usize>(input: &str) -> Result<[u8; N]> {
    let input = input.trim();
    if input.len() != N / 4 * 5 {
        bail!("unexpected Z85 length: expected {}, got {}", N / 4 * 5, input.len());
    }

    let mut lookup = [255u8; 256];
    for (value, &symbol) in Z85_ALPHABET.iter().enumerate() {
        lookup[symbol as usize] = value as u8;
    }

    let mut out = [0u8; N];
    let bytes = input.as_bytes();
    let mut out_index = 0;

    for chunk in bytes.chunks(5) {
        let mut value: u32 = 0;
        for &byte in chunk {
            let digit = lookup[byte as usize];
            if digit == 255 {
                bail!("invalid Z85 character: {}", byte as char);
            }
            value = value
                .checked_mul(85)
                .and_then(|v| v.checked_add(digit as u32))
                .context("Z85 chunk overflow")?;
        }
        out[out_index] = (value >> 24) as u8;
        out[out_index + 1] = (value >> 16) as u8;
        out[out_index + 2] = (value >> 8) as u8;
        out[out_index + 3] = value as u8;
        out_index += 4;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_curve_section_only() {
        let zpl = r#"
metadata
    name = "server"
curve
    public-key = "abcde12345abcde12345abcde12345abcde12345"
    secret-key = "fghij67890fghij67890fghij67890fghij67890"
"#;
        let props = parse_zpl_curve_section(zpl);
        assert_eq!(props.get("public-key").unwrap(), "abcde12345abcde12345abcde12345abcde12345");
        assert_eq!(props.get("secret-key").unwrap(), "fghij67890fghij67890fghij67890fghij67890");
    }

    #[test]
    fn z85_decodes_known_vector() {
        // "HelloWorld" is the canonical Z85 (ZMQ RFC 32) test vector,
        // decoding to {0x86,0x4F,0xD2,0x6F,0xB5,0x59,0xF7,0x5B}. Each 5-char
        // group is independently valid, so repeating it four times gives a
        // valid 40-char/32-byte vector.
        let thirty_two_z85 = "HelloWorldHelloWorldHelloWorldHelloWorld";
        let decoded = z85_decode_fixed::<32>(thirty_two_z85).unwrap();
        let expected_group: [u8; 8] = [0x86, 0x4F, 0xD2, 0x6F, 0xB5, 0x59, 0xF7, 0x5B];
        assert_eq!(&decoded[0..8], &expected_group);
        assert_eq!(&decoded[8..16], &expected_group);
    }

    #[test]
    fn rejects_wrong_version() {
        let frames = vec![
            vec![0xAA], // routing id
            b"2.0".to_vec(),
            b"req-1".to_vec(),
            b"global".to_vec(),
            b"127.0.0.1".to_vec(),
            Vec::new(),
            b"NULL".to_vec(),
        ];
        let reply = build_zap_reply(&frames, &[], None).unwrap();
        assert_eq!(reply[3], b"500".to_vec());
    }

    #[test]
    fn rejects_address_outside_whitelist() {
        let frames = vec![
            vec![0xAA],
            ZAP_VERSION.to_vec(),
            b"req-1".to_vec(),
            b"global".to_vec(),
            b"10.0.0.1".to_vec(),
            Vec::new(),
            b"NULL".to_vec(),
        ];
        let whitelist = vec!["127.0.0.1".parse().unwrap()];
        let reply = build_zap_reply(&frames, &whitelist, None).unwrap();
        assert_eq!(reply[3], b"400".to_vec());
    }

    #[test]
    fn accepts_whitelisted_address() {
        let frames = vec![
            vec![0xAA],
            ZAP_VERSION.to_vec(),
            b"req-1".to_vec(),
            b"global".to_vec(),
            b"127.0.0.1".to_vec(),
            Vec::new(),
            b"NULL".to_vec(),
        ];
        let whitelist = vec!["127.0.0.1".parse().unwrap()];
        let reply = build_zap_reply(&frames, &whitelist, None).unwrap();
        assert_eq!(reply[3], b"200".to_vec());
    }

    #[test]
    fn rejects_unknown_curve_key() {
        let frames = vec![
            vec![0xAA],
            ZAP_VERSION.to_vec(),
            b"req-1".to_vec(),
            b"global".to_vec(),
            b"127.0.0.1".to_vec(),
            Vec::new(),
            b"CURVE".to_vec(),
            vec![0u8; 32],
        ];
        let accepted = vec![[1u8; 32]];
        let reply = build_zap_reply(&frames, &[], Some(&accepted)).unwrap();
        assert_eq!(reply[3], b"400".to_vec());
    }

    #[test]
    fn accepts_known_curve_key() {
        let known = [7u8; 32];
        let frames = vec![
            vec![0xAA],
            ZAP_VERSION.to_vec(),
            b"req-1".to_vec(),
            b"global".to_vec(),
            b"127.0.0.1".to_vec(),
            Vec::new(),
            b"CURVE".to_vec(),
            known.to_vec(),
        ];
        let accepted = vec![known];
        let reply = build_zap_reply(&frames, &[], Some(&accepted)).unwrap();
        assert_eq!(reply[3], b"200".to_vec());
    }

    #[test]
    fn anonymous_mode_accepts_any_curve_key() {
        let frames = vec![
            vec![0xAA],
            ZAP_VERSION.to_vec(),
            b"req-1".to_vec(),
            b"global".to_vec(),
            b"127.0.0.1".to_vec(),
            Vec::new(),
            b"CURVE".to_vec(),
            vec![42u8; 32],
        ];
        let reply = build_zap_reply(&frames, &[], None).unwrap();
        assert_eq!(reply[3], b"200".to_vec());
    }
}
