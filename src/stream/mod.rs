//! Live gateway frame-log streaming.
//!
//! - `endpoint`: page location and websocket URL derivation.
//! - `client`: websocket transport, reconnect supervision, and callbacks.
//! - `proto`: inbound frame shapes and error/data demultiplexing.

/// Frame-log endpoint derivation.
pub mod endpoint;
/// Websocket connection worker and subscription handle.
pub mod client;
/// Stream protocol messages.
pub mod proto;
