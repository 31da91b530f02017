//! # docsync Protocol
//!
//! Wire protocol for docsync clients and servers.
//!
//! This crate provides:
//! - Request, response and snapshot messages
//! - CBOR encoding/decoding
//! - Length-prefixed framing over byte streams
//! - In-process and stream-backed frame channels
//!
//! # Exchange
//!
//! 1. The client sends a `RequestMessage` with a fresh `requestId`
//! 2. The server answers with exactly one `Response` for that id
//! 3. While a subscription is active the server pushes `Snapshot`s
//!    addressed by the subscribed path

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod codec;
mod error;
pub mod frame;
mod messages;

pub use channel::{FrameChannel, FrameReceiver, FrameSender};
pub use codec::{from_cbor, to_cbor};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::DEFAULT_MAX_FRAME_LEN;
pub use messages::{
    ErrorCode, ErrorPayload, Request, RequestEvent, RequestMessage, ResponseMessage,
    ServerMessage, SnapshotMessage,
};
