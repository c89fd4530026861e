//! # Shared Reducer Protocol
//!
//! Wire messages exchanged between a shared reducer client and its server.
//!
//! This crate provides:
//! - `ClientMessage` for locally-originated deltas
//! - `ServerMessage` for baselines, acknowledgements and rejections
//! - Keepalive sentinels that travel outside the JSON envelope
//!
//! This is a pure protocol crate with no I/O operations. The text encoding
//! of a JSON value belongs to the transport; this crate only maps between
//! `serde_json::Value` and typed messages.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod keepalive;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use keepalive::{is_keepalive, DEFAULT_PING_INTERVAL, PING, PONG};
pub use messages::{ClientMessage, CorrelationId, ServerMessage};
