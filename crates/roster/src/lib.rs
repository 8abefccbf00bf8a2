//! Off-chain member registry: mirrors ledger membership into a local, queryable store.
//!
//! - **StreamConsumer**: keeps the event-stream WebSocket open, reconnecting with backoff, and
//!   hands each inbound batch to the processor over a bounded channel.
//! - **BatchProcessor**: decodes a batch into events, routes them by signature, and sends one
//!   `{"type":"ack","topic":...}` per decoded batch on the connection it arrived on.
//! - **Reconciler**: applies MemberRegistered events and local registrations to the
//!   [MemberStore], idempotently, so redelivered batches converge to the same state.

pub mod abi;
pub mod address;
pub mod api;
pub mod config;
pub mod envelope;
pub mod gateway;
pub mod member;
pub mod reconciler;
pub mod router;
pub mod store;
pub mod stream;

pub use abi::{MalformedEvent, MemberRegistered, MEMBER_REGISTERED_SIGNATURE};
pub use address::{Address, AddressError};
pub use api::AppState;
pub use config::{Backoff, Config, GatewayConfig, ReconnectionConfig, StreamConfig};
pub use envelope::{decode_batch, DecodeError, DecodedBatch, InboundEvent};
pub use gateway::{Gateway, GatewayError, HttpGateway};
pub use member::{Member, RegisterMember, Registration};
pub use reconciler::{ReconcileError, Reconciler, RegistrationError};
pub use router::{BatchReport, EventHandler, EventRouter};
pub use store::{InMemoryStore, MemberStore, StoreError};
pub use stream::{Batch, BatchProcessor, ConnectionState, StreamConsumer, StreamTasks, TransportError};

use std::sync::Arc;

/// Router with the MemberRegistered handler installed.
pub fn member_router(reconciler: Arc<Reconciler>) -> EventRouter {
    EventRouter::new().route(MEMBER_REGISTERED_SIGNATURE, reconciler)
}
