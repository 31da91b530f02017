//! # docsync Core
//!
//! Path-addressed document synchronization engine.
//!
//! This crate provides:
//! - Document and collection paths and their string encoding
//! - Deep-merge update semantics for document values
//! - A first-match rule engine with data-dependent predicates
//! - The `Backend` and `Datastore` contracts
//! - An in-memory datastore, an event bus and a reference backend
//! - A collection/document facade for application code
//!
//! # Example
//!
//! ```rust,ignore
//! use docsync_core::{Backend, CollectionPath, MemoryBackend, Rule};
//!
//! let backend = MemoryBackend::new(&[Rule::allow_all("/posts/:id")]);
//! let posts = CollectionPath::root("posts");
//! let id = backend.add(&posts, value).await?;
//! let listed = backend.list(&posts).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod bus;
pub mod collection;
mod datastore;
mod error;
mod local;
mod memory;
pub mod path;
pub mod rule;
pub mod value;

pub use backend::{Backend, Callback, FileUpload, Subscription};
pub use bus::{EventBus, Listener, ListenerId, Publication};
pub use collection::{Attribute, Collection, DocumentRef, Model, Schema, TypedCollection};
pub use datastore::{generate_id, Datastore};
pub use error::{CoreError, CoreResult};
pub use local::{download_url, DatastoreReader, MemoryBackend, DEFAULT_DOWNLOAD_URL_PREFIX};
pub use memory::MemoryDatastore;
pub use path::{CollectionPath, DocumentPath, Path, PathElement};
pub use rule::{AccessMode, Params, Permission, Reader, Rule, RuleSet, PLACEHOLDER_ID};
pub use value::{Document, Value};
