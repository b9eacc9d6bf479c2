//! Local request/response and notification surface used by viewers.
//!
//! Messages are newline-delimited JSON over a loopback TCP connection. Each request gets exactly
//! one response, except `subscribe` which is answered once and then turns the connection into an
//! event stream.

pub mod client;
pub mod protocol;
pub mod server;
