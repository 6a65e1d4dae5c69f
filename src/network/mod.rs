//! Network Module
//!
//! TCP server, connection handling and a blocking client.
//!
//! ## Architecture
//! - Single acceptor thread
//! - Readiness poller feeding a worker thread pool
//! - Requests answered by a `RequestHandler` (the `Engine`)

mod client;
mod connection;
mod server;
mod table;

pub use client::Client;
pub use connection::{Connection, Phase, RequestHandler};
pub use server::{Server, ShutdownHandle};
pub use table::{ConnId, ConnectionTable, Slot};
