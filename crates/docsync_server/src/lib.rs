//! # docsync Server
//!
//! Reference server for docsync clients.
//!
//! This crate provides:
//! - Per-client connections over framed transports (TCP or in-process)
//! - Rule enforcement for every request
//! - Reference-counted subscriptions relayed from the shared event bus
//! - On-disk storage for uploaded files
//!
//! # Architecture
//!
//! All connections share one `HandlerContext`: the compiled rules, the
//! datastore and the event bus. Each connection runs requests for its own
//! session, whose id rule predicates see as the user id.
//!
//! # Protocol
//!
//! 1. The client sends a request frame with a fresh request id
//! 2. The server answers with exactly one response for that id
//! 3. Subscribing pushes the current state, then every later change

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod connection;
mod error;
mod files;
mod handler;
mod server;

pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{ServerError, ServerResult};
pub use files::FileStore;
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
