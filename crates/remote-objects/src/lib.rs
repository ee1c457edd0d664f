//! Transparent remote objects over a byte stream
//!
//! This crate lets two processes call methods on each other's objects as if
//! they were local. Either side may export objects, pass them as arguments
//! or results, and hand blocks (callbacks) to remote methods that yield back
//! into the caller.
//!
//! # Architecture
//!
//! - [`codec`]: length-prefixed framing
//! - [`wire`]: wire values and pluggable serializers
//! - [`message`]: the five protocol messages and their envelopes
//! - [`value`]: application values and the [`RemoteObject`] dispatch trait
//! - [`proxy`]: local stand-ins for remote objects
//! - [`connection`]: the engine (reader, workers, correlation, release)
//! - [`security`]: method-level access control
//! - [`server`]: TCP listener serving one root object
//! - [`objects`]: ready-made exportable objects
//!
//! # Passing semantics
//!
//! Scalars, strings, lists, maps and errors are copied. Objects are passed
//! by reference: the sender exports them under a numeric id and the
//! receiver gets a [`Proxy`]. A proxy sent back to its origin resolves to
//! the original object. Nil is never passed by reference.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use remote_objects::prelude::*;
//!
//! fn main() -> RpcResult<()> {
//!     let server = Server::bind(ServerConfig::bind("127.0.0.1", 4044), Arc::new(SharedMap::new()))?;
//!
//!     let client = Connection::connect("127.0.0.1:4044")?;
//!     client.call("[]=", vec![Value::sym("counter"), Value::Int(1)])?;
//!     let n = client.call("increment", vec![Value::sym("counter")])?;
//!     assert_eq!(n, Value::Int(2));
//!
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod objects;
pub mod prelude;
pub mod proxy;
pub mod security;
pub mod server;
pub mod transport;
pub mod value;
pub mod wire;

mod reference;
mod tables;

pub use config::{ConnectionConfig, ServerConfig};
pub use connection::{Connection, ConnectionBuilder, StatsSnapshot};
pub use error::{RpcError, RpcResult};
pub use proxy::Proxy;
pub use server::Server;
pub use transport::{DEFAULT_PORT, Transport, TransportType};
pub use value::{Block, RemoteObject, Value};
pub use wire::{ObjectId, Serializer, SerializerKind, WireValue};
