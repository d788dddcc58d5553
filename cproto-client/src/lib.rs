//! # cproto-client
//!
//! Client transport for cproto.
//!
//! This crate provides:
//! - A connection that multiplexes many in-flight calls over one TCP socket
//! - A lock-free completion table keyed by sequence number
//! - Per-call deadlines, keep-alive pings and failure cascades
//! - Callback, blocking and async call styles
//! - A high-level async client for the database commands
//!
//! ```no_run
//! use cproto_client::{Client, ConnectionConfig};
//!
//! # async fn example() -> Result<(), cproto_client::ClientError> {
//! let config = ConnectionConfig::new("127.0.0.1:6534".parse().unwrap())
//!     .with_credentials("admin", "secret")
//!     .with_database("books");
//! let client = Client::new(config);
//! client.connect().await?;
//! client.ping().await?;
//! # Ok(())
//! # }
//! ```

pub mod answer;
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
mod io;
pub mod table;

pub use answer::{Answer, Payload};
pub use client::{Client, QueryResults};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionConfig, ConnectionState, UpdatesHandler};
pub use error::ClientError;
pub use table::{Completion, CompletionTable};

pub use cproto_protocol::{args, Args, CmdCode, ErrorCode, Variant};
