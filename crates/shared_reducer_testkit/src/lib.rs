//! # Shared Reducer Testkit
//!
//! Test utilities for shared reducer clients.
//!
//! This crate provides:
//! - An in-process [`Broadcaster`] that plays the server's role
//! - A loopback WebSocket [`TestServer`] in front of it
//! - Channel-backed observers and timeouts for async tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shared_reducer_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_round_trip() {
//!     let broadcaster = Arc::new(Broadcaster::new(FieldContext));
//!     broadcaster.set("a", initial_state());
//!     let server = TestServer::start(broadcaster, TestServerConfig::new()).await.unwrap();
//!     let (observers, mut probe) = Probe::observers();
//!     let reducer = SharedReducer::connect(FieldContext, ReducerConfig::new(server.url("a")), observers).unwrap();
//!     assert_eq!(*probe.next_change().await.unwrap(), initial_state());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcaster;
pub mod error;
pub mod fixtures;
pub mod generators;
pub mod server;

pub use broadcaster::{Broadcaster, Permission, Subscription, SubscriberId, READ_ONLY_REJECTION};
pub use error::{TestkitError, TestkitResult};
pub use fixtures::{initial_state, within, Probe, DEFAULT_WAIT};
pub use server::{TestServer, TestServerConfig};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::broadcaster::{Broadcaster, Permission};
    pub use crate::fixtures::{initial_state, within, Probe};
    pub use crate::server::{TestServer, TestServerConfig};
    pub use shared_reducer::{
        FieldContext, FieldDelta, FieldOp, ReducerConfig, SharedReducer, SpecSource, SyncError,
    };
    pub use std::sync::Arc;
}
