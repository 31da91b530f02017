//! # docsync Testkit
//!
//! Test utilities for docsync.
//!
//! This crate provides:
//! - Fixtures: rule sets, unique names, recording callbacks, tracing setup
//! - Property-based test generators using proptest
//! - A conformance suite every `Backend` implementation must pass
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn memory_backend_conforms() {
//!     let rules = suite_rules("suite", "locked");
//!     let backend = Arc::new(MemoryBackend::new(&rules));
//!     run_backend_suite(backend, "suite", "locked").await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use conformance::*;
pub use fixtures::*;
pub use generators::*;
