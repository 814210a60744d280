//! Library surface for `query-server`: the binary in `main.rs` is a thin
//! wiring layer over the modules exported here. Splitting the two lets
//! integration tests under `tests/` drive a real worker through a real
//! `zmq::Context` instead of re-exercising handlers in isolation.

pub mod auth;
pub mod config;
pub mod core;
