//! # Shared Reducer
//!
//! Client-side replica of a state owned by a server, kept in sync over a
//! WebSocket with optimistic local updates.
//!
//! This crate provides:
//! - Spec sources: deltas, generators and sync markers, reduced depth-first
//! - Batching of same-turn dispatches into one outgoing change
//! - Reconciliation of acknowledgements, foreign changes and rejections
//! - Sync callbacks and an awaitable [`SharedReducer::synced_state`]
//! - A WebSocket transport with keepalive, and a mock for tests
//! - [`FieldContext`], a ready-made set/add algebra over JSON objects
//!
//! ## Model
//!
//! The server holds the authoritative state. The client keeps:
//! 1. the last state confirmed by the server
//! 2. changes sent but not yet answered, in send order
//! 3. a delta batching changes not yet sent
//!
//! The local state is always (1) updated by (2) then (3). Acknowledgements
//! move a change from (2) into (1); rejections drop it from (2).
//!
//! ## Key Invariants
//!
//! - Local changes apply immediately
//! - Changes leave in the order they were made, each with a fresh id
//! - Observers only hear about states that actually changed, in the order
//!   they took effect
//! - `dispatch` never recurses into itself
//!
//! [`SharedReducer::connect`] needs a current-thread tokio runtime: a turn of
//! that runtime is what bounds a batch.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod fields;
mod id;
mod lock;
mod reconciler;
mod reduce;
mod reducer;
mod scheduler;
mod spec;
mod transport;
mod websocket;

pub use config::ReducerConfig;
pub use context::Context;
pub use error::{SyncError, SyncResult};
pub use fields::{FieldContext, FieldDelta, FieldOp};
pub use reconciler::ReducerStats;
pub use reduce::{reduce, Reduction};
pub use reducer::{Observers, SharedReducer};
pub use scheduler::{ManualScheduler, Scheduler, Task, TokioScheduler};
pub use spec::{Generator, SpecSource, SyncMarker};
pub use transport::{ConnectionHandler, MockTransport, Transport};
pub use websocket::WebSocketTransport;

pub use shared_reducer_protocol as protocol;
