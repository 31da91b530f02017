//! # docsync Client
//!
//! Remote backend for docsync servers.
//!
//! [`RpcBackend`] implements the same `Backend` contract as the local
//! reference backend, forwarding every operation to a server over a frame
//! transport. Application code written against `Backend` (including the
//! `Collection` facade) runs unchanged against either.
//!
//! # Example
//!
//! ```rust,ignore
//! use docsync_client::{ClientConfig, RpcBackend};
//! use docsync_core::{Backend, CollectionPath};
//!
//! let backend = RpcBackend::connect("127.0.0.1:8080", ClientConfig::default()).await?;
//! let posts = backend.list(&CollectionPath::root("posts")).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod rpc;

pub use config::ClientConfig;
pub use error::remote_error;
pub use rpc::RpcBackend;
