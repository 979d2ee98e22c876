//! Client SDK for the LoRa gateway management API and live gateway frame
//! logs.
//!
//! The crate is organized by transport surface:
//! - `stream`: auto-reconnecting websocket subscription to a gateway's
//!   live frame log.
//! - `gateway_api`: HTTP client for gateway CRUD, stats and pings.
//! - `dispatch`: error actions and the sinks they are published to.
//! - `session`: credential provider boundary.
//! - `retry`: shared backoff, retry and timeout utilities.

/// Error actions and sinks shared by both transports.
pub mod dispatch;
/// Gateway REST API client and response types.
pub mod gateway_api;
/// Backoff, retry and timeout helpers used across the SDK.
pub mod retry;
/// Session provider boundary.
pub mod session;
/// Frame-log stream client, endpoint derivation, and protocol types.
pub mod stream;
