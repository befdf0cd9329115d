//! # WebSocket Gateway
//!
//! This crate bridges client WebSocket connections to a backend HTTP
//! application that has no native WebSocket support. It terminates client
//! handshakes, assigns each connection a durable identifier, notifies the
//! backend of lifecycle events over plain HTTP, relays client messages to
//! the backend via an HTTP callback, and relays backend pushes to the
//! addressed live connection.
//!
//! ## Components
//!
//! - **Connection registry** ([`registry`]): concurrency-safe map from
//!   connection identifier to live session handle
//! - **Session relay loop** (`session`): the per-connection actor moving
//!   messages between the client socket and the backend
//! - **Rate-limited push** ([`limiter`], [`Gateway::push`]): token-bucket
//!   gate applied to all backend-to-client pushes
//! - **Lifecycle notifier** ([`notifier`]): the backend HTTP contract for
//!   connection start/end notification and admission control
//! - **Message sink** ([`sink`]): the backend HTTP contract receiving
//!   client-originated messages

pub mod config;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod notifier;
pub mod registry;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod sink;

mod id;
mod session;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use id::ConnectionId;
pub use notifier::CONNECTION_ID_HEADER;
pub use server::Server;
pub use sink::MessageSink;
