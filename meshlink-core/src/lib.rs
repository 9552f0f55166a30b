//! # meshlink-core
//!
//! Transport-level building blocks shared by meshlink peers and the DRP relay:
//!
//! - [`protocol`] - the [`DrpMessage`](protocol::DrpMessage) exchanged with the
//!   relay and its length-prefixed stream codec
//! - [`pool`] - a bounded free list so relay traffic does not allocate per packet
//! - [`server`] - the multi-tenant DRP relay server
//! - [`socket`] - socket creation helpers
//!
//! ## Running a relay
//!
//! ```rust,no_run
//! use meshlink_core::server::{DrpServer, ServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> std::io::Result<()> {
//! let config = ServerConfig::default().set_listen("0.0.0.0:6266".parse().unwrap());
//! let server = DrpServer::bind(config)?;
//! server.serve().await
//! # }
//! ```

pub mod error;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod socket;
