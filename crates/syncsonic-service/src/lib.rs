//! # syncsonic-service
//!
//! The control core of the daemon: one connection state machine per
//! target speaker (discovery -> pairing -> trust -> connect -> routing,
//! with bounded retries and cooperative cancellation) and the connection
//! service that owns all state machines, allocates adapters, serializes
//! conflicting operations, and publishes status snapshots.

pub mod error;
pub mod events;
pub mod fsm;
pub mod service;

pub use error::{Result, ServiceError};
pub use events::ServiceEvent;
pub use fsm::{ConnectFsm, FsmOutcome};
pub use service::ConnectionService;
