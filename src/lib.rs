//! A resilient, single-connection full-duplex streaming client for a
//! real-time market-data WebSocket server.
//!
//! The crate is organized the way the connection itself behaves, leaves
//! first:
//!
//! - [`transport`]: the WebSocket seam (`Transport`/`TransportFactory`),
//!   with a `tokio-tungstenite` default implementation.
//! - [`codec`]: the MessagePack wire format: envelope decode, per-tag
//!   record decode, and outbound auth/subscribe frame encoding.
//! - [`schema`]: the typed data kinds every record decodes into, plus
//!   the durable [`schema::DesiredSub`] subscription set.
//! - [`feed`]: the pluggable per-kind callback handlers a caller registers.
//! - [`dispatcher`]: routes one decoded record to its destination.
//! - [`workers`]: the four per-epoch task kinds (reader, writer, pinger,
//!   processor) spawned as one atomic fleet per connection.
//! - [`coordinator`]: the subscription state machine (at-most-one
//!   pending change, timeout, interruption, replay across reconnects).
//! - [`init`]: the welcome/authenticate/subscribe handshake.
//! - [`supervisor`]: the top-level dial/initialize/run/retry loop.
//! - [`client`]: the public façade (`Client::connect`, `subscribe_to_*`, ...).
//! - [`config`] / [`error`] / [`ticker`] / [`metrics`]: the ambient stack
//!   (configuration, typed errors, injectable ticking, runtime counters).

pub mod client;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod init;
pub mod metrics;
pub mod schema;
pub mod supervisor;
#[cfg(test)]
pub mod testing;
pub mod ticker;
pub mod transport;
pub mod util;
pub mod workers;

pub use client::{Client, ClientDeps};
pub use config::{ClientCallbacks, ClientConfig, ClientConfigBuilder};
pub use error::ClientError;
