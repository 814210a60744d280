//! A thin debug client for `query-server`: sends exactly one binary-framed
//! request over a `DEALER` socket and prints the decoded response. A
//! hand-rolled arg parser and a two-variant error enum mapped to process
//! exit codes, in place of a one-shot request/reply round trip over raw TCP.

use std::fmt;
use std::process::ExitCode;
use std::time::Duration;

const EX_TEMPFAIL: u8 = 75;
const EX_USAGE: u8 = 64;

type Result<T> = std::result::Result<T, ClientError>;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = match err {
                ClientError::Usage(_) => EX_USAGE,
                ClientError::Runtime(_) => EX_TEMPFAIL,
            };
            eprintln!("query-client error: {err}");
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let args = Cli::parse(std::env::args().skip(1))?;
    let response = send_request(&args)?;
    print_response(&response);
    Ok(())
}

fn send_request(args: &Cli) -> Result<query_proto::Response> {
    let context = zmq::Context::new();
    let socket = context
        .socket(zmq::DEALER)
        .map_err(|err| runtime_err("failed to create DEALER socket", err))?;

    let timeout_ms = i32::try_from(args.timeout.as_millis()).unwrap_or(i32::MAX);
    socket
        .set_rcvtimeo(timeout_ms)
        .map_err(|err| runtime_err("failed to set receive timeout", err))?;
    socket
        .set_sndtimeo(timeout_ms)
        .map_err(|err| runtime_err("failed to set send timeout", err))?;
    socket
        .set_linger(0)
        .map_err(|err| runtime_err("failed to set linger", err))?;

    socket
        .connect(&args.server)
        .map_err(|err| runtime_err(format!("failed to connect to {}", args.server), err))?;

    let frames = query_proto::encode_request(&args.command, args.id, &args.payload);
    socket
        .send_multipart(frames, 0)
        .map_err(|err| runtime_err("failed to send request", err))?;

    let reply = match socket.recv_multipart(0) {
        Ok(frames) => frames,
        Err(zmq::Error::EAGAIN) => {
            return Err(ClientError::Runtime(format!(
                "no response within {:?}",
                args.timeout
            )));
        }
        Err(err) => return Err(runtime_err("failed to receive response", err)),
    };

    query_proto::decode_response(&reply)
        .map_err(|err| runtime_err("server sent a malformed response", err))
}

/// Prints `code`, `id`, `command`, and the remaining body as hex — hashes
/// and other binary fields are displayed big-endian per §6, but since this
/// client doesn't know each command's payload layout, it prints the raw
/// wire bytes and lets the operator interpret them against the command
/// table.
fn print_response(response: &query_proto::Response) {
    let code_bytes = response.payload.get(0..4);
    let code = code_bytes.map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    let body = response.payload.get(4..).unwrap_or(&[]);

    println!("command: {}", response.command);
    println!("id: {}", response.id);
    match code {
        Some(code) => println!("code: {code}"),
        None => println!("code: <payload shorter than 4 bytes>"),
    }
    println!("body: {}", hex::encode(body));
}

#[derive(Debug)]
struct Cli {
    server: String,
    command: String,
    id: u32,
    payload: Vec<u8>,
    timeout: Duration,
}

impl Cli {
    fn parse<I>(mut args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let mut server = None;
        let mut command = None;
        let mut id = 1_u32;
        let mut payload_hex: Option<String> = None;
        let mut timeout_secs = 5_u64;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--server" => server = args.next(),
                "--command" => command = args.next(),
                "--id" => {
                    let raw = args
                        .next()
                        .ok_or_else(|| ClientError::Usage("missing value for --id".to_string()))?;
                    id = raw
                        .parse::<u32>()
                        .map_err(|_| ClientError::Usage("--id must be a u32".to_string()))?;
                }
                "--payload-hex" => payload_hex = args.next(),
                "--timeout-secs" => {
                    let raw = args.next().ok_or_else(|| {
                        ClientError::Usage("missing value for --timeout-secs".to_string())
                    })?;
                    timeout_secs = raw.parse::<u64>().map_err(|_| {
                        ClientError::Usage("--timeout-secs must be a positive integer".to_string())
                    })?;
                }
                "-h" | "--help" => {
                    return Err(ClientError::Usage(
                        "usage: query-client --server tcp://host:port --command <name> \
                         [--id 1] [--payload-hex <hex>] [--timeout-secs 5]"
                            .to_string(),
                    ));
                }
                _ => return Err(ClientError::Usage(format!("unknown argument: {arg}"))),
            }
        }

        let payload = match payload_hex {
            Some(raw) => hex::decode(raw.trim())
                .map_err(|err| ClientError::Usage(format!("--payload-hex is not valid hex: {err}")))?,
            None => Vec::new(),
        };

        Ok(Self {
            server: server
                .ok_or_else(|| ClientError::Usage("missing required argument --server".to_string()))?,
            command: command.ok_or_else(|| {
                ClientError::Usage("missing required argument --command".to_string())
            })?,
            id,
            payload,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug)]
enum ClientError {
    Usage(String),
    Runtime(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Usage(msg) => write!(f, "{msg}"),
            ClientError::Runtime(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

fn runtime_err(context: impl Into<String>, err: impl fmt::Display) -> ClientError {
    ClientError::Runtime(format!("{}: {err}", context.into()))
}
