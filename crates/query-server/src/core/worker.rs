//! Request worker (C4, §4.4): owns the reply (`ROUTER`) and heartbeat
//! (`PUB`) sockets on one dedicated OS thread, since `zmq::Socket` is
//! blocking and not `Sync`. Handlers are asynchronous: the poll loop
//! decodes a request, looks it up in the registry, and spawns the handler
//! future onto the caller's `tokio` runtime; the handler's eventual result
//! reaches the wire through the send queue, which wakes the poll loop via
//! the inproc wakeup socket. The worker thread itself never awaits
//! anything — it only polls and dispatches.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use query_proto::Response;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::auth::{Authenticator, Certificate};
use crate::core::registry::{HandlerContext, Registry};
use crate::core::send_queue::SendQueue;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to bind reply socket: {0}")]
    Bind(String),
    #[error("poll failed: {0}")]
    TransportFatal(String),
}

pub struct WorkerSettings {
    pub query_endpoint: String,
    pub heartbeat_endpoint: String,
    pub polling_interval: Duration,
    pub heartbeat_interval: Duration,
    pub server_certificate: Option<Certificate>,
    pub accepted_client_keys: Option<Vec<[u8; 32]>>,
    pub whitelisted_ips: Vec<IpAddr>,
}

/// Handle to the running worker thread. Dropping it stops the worker
/// (idempotent with an explicit `stop()`).
pub struct RequestWorker {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    pub send_queue: Arc<SendQueue>,
    _authenticator: Option<Authenticator>,
}

impl RequestWorker {
    /// Binds both sockets and starts the poll loop thread. Returns an
    /// error on any binding failure rather than panicking (§4.4: "returns
    /// false on any binding error" — here, `Err`).
    pub fn start(
        context: zmq::Context,
        settings: WorkerSettings,
        send_queue: Arc<SendQueue>,
        wakeup_pull_socket: zmq::Socket,
        registry: Registry,
        handler_context: Arc<HandlerContext>,
        runtime: Handle,
    ) -> Result<Self> {
        let curve_enabled = settings.server_certificate.is_some();
        let zap_needed = curve_enabled || !settings.whitelisted_ips.is_empty();

        let authenticator = if zap_needed {
            Some(
                Authenticator::start(
                    context.clone(),
                    settings.whitelisted_ips.clone(),
                    settings.accepted_client_keys.clone(),
                )
                .context("failed to start ZAP authenticator")?,
            )
        } else {
            None
        };

        let reply_socket = context.socket(zmq::ROUTER).context("failed to create reply socket")?;
        if zap_needed {
            reply_socket
                .set_zap_domain("global")
                .context("failed to set ZAP domain on reply socket")?;
        }
        if let Some(certificate) = &settings.server_certificate {
            let secret_key = certificate
                .secret_key
                .context("server certificate is missing a secret key")?;
            reply_socket.set_curve_server(true).context("failed to enable curve server mode")?;
            reply_socket
                .set_curve_secretkey(&secret_key)
                .context("failed to set curve secret key")?;
        }
        reply_socket
            .bind(&settings.query_endpoint)
            .map_err(|err| WorkerError::Bind(err.to_string()))
            .with_context(|| format!("failed to bind reply socket to {}", settings.query_endpoint))?;

        let heartbeat_socket =
            context.socket(zmq::PUB).context("failed to create heartbeat socket")?;
        heartbeat_socket
            .bind(&settings.heartbeat_endpoint)
            .with_context(|| format!("failed to bind heartbeat socket to {}", settings.heartbeat_endpoint))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let thread_send_queue = send_queue.clone();
        let polling_interval = settings.polling_interval;
        let heartbeat_interval = settings.heartbeat_interval;

        let thread = std::thread::spawn(move || {
            run_poll_loop(
                reply_socket,
                wakeup_pull_socket,
                heartbeat_socket,
                registry,
                handler_context,
                runtime,
                thread_send_queue,
                polling_interval,
                heartbeat_interval,
                thread_shutdown,
            );
        });

        Ok(RequestWorker { shutdown, thread: Some(thread), send_queue, _authenticator: authenticator })
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RequestWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_poll_loop(
    reply_socket: zmq::Socket,
    wakeup_pull_socket: zmq::Socket,
    heartbeat_socket: zmq::Socket,
    registry: Registry,
    handler_context: Arc<HandlerContext>,
    runtime: Handle,
    send_queue: Arc<SendQueue>,
    polling_interval: Duration,
    heartbeat_interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut next_heartbeat_deadline = Instant::now() + heartbeat_interval;
    let mut heartbeat_sequence: u32 = 0;
    let timeout_ms = polling_interval.as_millis() as i64;

    while !shutdown.load(Ordering::SeqCst) {
        let mut items = [
            reply_socket.as_poll_item(zmq::POLLIN),
            wakeup_pull_socket.as_poll_item(zmq::POLLIN),
        ];

        match zmq::poll(&mut items, timeout_ms) {
            Ok(_) => {}
            Err(zmq::Error::EINTR) => continue,
            Err(err) => {
                warn!("worker poll failed, stopping: error={}", WorkerError::TransportFatal(err.to_string()));
                break;
            }
        }

        if items[1].is_readable() {
            drain_wakeup_socket(&wakeup_pull_socket, &reply_socket);
        }

        if items[0].is_readable() {
            drain_requests(&reply_socket, &registry, &handler_context, &runtime, &send_queue);
        }

        if Instant::now() >= next_heartbeat_deadline {
            let payload = query_proto::encode_heartbeat(heartbeat_sequence);
            if let Err(err) = heartbeat_socket.send(payload, zmq::DONTWAIT) {
                debug!("failed to publish heartbeat: error={err}");
            }
            heartbeat_sequence = heartbeat_sequence.wrapping_add(1);
            next_heartbeat_deadline += heartbeat_interval;
        }
    }
}

fn drain_wakeup_socket(wakeup_pull_socket: &zmq::Socket, reply_socket: &zmq::Socket) {
    loop {
        match wakeup_pull_socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => {
                if let Err(err) = reply_socket.send_multipart(frames, zmq::DONTWAIT) {
                    warn!("failed to write queued response onto reply socket: error={err}");
                }
            }
            Err(zmq::Error::EAGAIN) => break,
            Err(err) => {
                warn!("wakeup socket recv failed: error={err}");
                break;
            }
        }
    }
}

fn drain_requests(
    reply_socket: &zmq::Socket,
    registry: &Registry,
    handler_context: &Arc<HandlerContext>,
    runtime: &Handle,
    send_queue: &Arc<SendQueue>,
) {
    loop {
        let frames = match reply_socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => break,
            Err(err) => {
                warn!("reply socket recv failed: error={err}");
                break;
            }
        };

        let request = match query_proto::decode_request(&frames, 1) {
            Ok(request) => request,
            Err(err) => {
                debug!("dropping malformed request: error={err}");
                continue;
            }
        };

        let Some(handler) = registry.lookup(&request.command) else {
            debug!("dropping request for unknown command: command={}", request.command);
            continue;
        };

        let handler_context = handler_context.clone();
        let send_queue = send_queue.clone();
        runtime.spawn(async move {
            let payload = (*handler)(request.clone(), handler_context).await;
            let response = Response::for_request(&request, payload);
            send_queue.queue_send(query_proto::encode_response(&response));
        });
    }
}
