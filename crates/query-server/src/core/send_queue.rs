//! The outbound send queue (§4.2). Responses, heartbeats, and subscription
//! notifications all ultimately reach the network by one of two paths: the
//! ROUTER/PUB sockets owned by the worker thread, or this queue, which any
//! other thread uses to hand the worker a frame group via an inproc
//! PUSH/PULL pair.

use anyhow::{Context, Result};
use tracing::warn;

/// A handle any thread can clone and push frame groups through. Only the
/// PUSH end is wrapped here — the worker thread alone owns the PULL end and
/// the reply/publish sockets, preserving the "touched by exactly one
/// thread" invariant for those (§4.4).
pub struct SendQueue {
    push: std::sync::Mutex<zmq::Socket>,
}

const WAKEUP_ENDPOINT: &str = "inproc://query-server.wakeup";

impl SendQueue {
    /// Creates the inproc PUSH/PULL pair. The PULL end is returned
    /// separately so the worker thread can bind it into its poll set;
    /// `SendQueue` itself only ever sees the PUSH end.
    pub fn new(context: &zmq::Context, high_water_mark: i32) -> Result<(Self, zmq::Socket)> {
        let pull = context.socket(zmq::PULL).context("failed to create wakeup PULL socket")?;
        pull.bind(WAKEUP_ENDPOINT).context("failed to bind wakeup PULL socket")?;

        let push = context.socket(zmq::PUSH).context("failed to create wakeup PUSH socket")?;
        push.set_sndhwm(high_water_mark).context("failed to set send queue high water mark")?;
        push.connect(WAKEUP_ENDPOINT).context("failed to connect wakeup PUSH socket")?;

        Ok((SendQueue { push: std::sync::Mutex::new(push) }, pull))
    }

    /// Enqueues a frame group for delivery by the worker thread. A full
    /// queue (a slow or unresponsive worker) drops the frame rather than
    /// blocking the caller; the drop is logged per §7.
    pub fn queue_send(&self, frames: Vec<Vec<u8>>) {
        let socket = self.push.lock().unwrap();
        match socket.send_multipart(frames, zmq::DONTWAIT) {
            Ok(()) => {}
            Err(zmq::Error::EAGAIN) => {
                warn!("send queue full, dropping outbound frame group");
            }
            Err(err) => {
                warn!("failed to enqueue outbound frame group: error={err}");
            }
        }
    }
}
