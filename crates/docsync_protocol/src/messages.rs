//! Protocol messages.
//!
//! Upstream, a client sends [`RequestMessage`]s. Downstream, the server
//! sends [`ServerMessage`]s: one `Response` per request and any number of
//! `Snapshot`s for active subscriptions. All messages are CBOR maps with
//! camelCase keys.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use docsync_core::{
    AccessMode, CollectionPath, CoreError, Document, DocumentPath, FileUpload, Path, Value,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Request kinds understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    /// Subscribe to a document.
    SubscribeDocument,
    /// Subscribe to a collection.
    SubscribeCollection,
    /// Drop a document subscription.
    UnsubscribeDocument,
    /// Drop a collection subscription.
    UnsubscribeCollection,
    /// Read a document.
    Get,
    /// Read a collection.
    List,
    /// Merge into a document.
    Update,
    /// Add a document.
    Add,
    /// Remove a document.
    Remove,
    /// Store a file.
    AddFile,
    /// Delete a file.
    DeleteFile,
    /// Locate a file.
    GetDownloadUrl,
}

impl RequestEvent {
    /// Every event, in wire order.
    pub const ALL: [RequestEvent; 12] = [
        RequestEvent::SubscribeDocument,
        RequestEvent::SubscribeCollection,
        RequestEvent::UnsubscribeDocument,
        RequestEvent::UnsubscribeCollection,
        RequestEvent::Get,
        RequestEvent::List,
        RequestEvent::Update,
        RequestEvent::Add,
        RequestEvent::Remove,
        RequestEvent::AddFile,
        RequestEvent::DeleteFile,
        RequestEvent::GetDownloadUrl,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestEvent::SubscribeDocument => "SubscribeDocument",
            RequestEvent::SubscribeCollection => "SubscribeCollection",
            RequestEvent::UnsubscribeDocument => "UnsubscribeDocument",
            RequestEvent::UnsubscribeCollection => "UnsubscribeCollection",
            RequestEvent::Get => "Get",
            RequestEvent::List => "List",
            RequestEvent::Update => "Update",
            RequestEvent::Add => "Add",
            RequestEvent::Remove => "Remove",
            RequestEvent::AddFile => "AddFile",
            RequestEvent::DeleteFile => "DeleteFile",
            RequestEvent::GetDownloadUrl => "GetDownloadUrl",
        }
    }

    /// Returns the access mode the server checks for this event.
    ///
    /// Unsubscribing checks write access.
    pub fn access_mode(&self) -> AccessMode {
        match self {
            RequestEvent::SubscribeDocument
            | RequestEvent::SubscribeCollection
            | RequestEvent::Get
            | RequestEvent::List
            | RequestEvent::GetDownloadUrl => AccessMode::Read,
            RequestEvent::UnsubscribeDocument
            | RequestEvent::UnsubscribeCollection
            | RequestEvent::Update
            | RequestEvent::Add
            | RequestEvent::Remove
            | RequestEvent::AddFile
            | RequestEvent::DeleteFile => AccessMode::Write,
        }
    }
}

impl FromStr for RequestEvent {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEvent(s.to_string()))
    }
}

impl fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as it travels on the wire.
///
/// `event` stays a string so that an unknown event still yields a response
/// carrying the request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    /// Correlation id echoed in the response.
    pub request_id: String,
    /// Event name.
    pub event: String,
    /// Target path.
    pub path: Path,
    /// Payload for Update, Add and AddFile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// File bytes for AddFile, encoded as a CBOR byte string.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub data: Option<Vec<u8>>,
}

impl RequestMessage {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }

    /// Recovers the request id from a frame that failed to decode fully.
    pub fn peek_request_id(bytes: &[u8]) -> Option<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Envelope {
            request_id: String,
        }

        from_cbor::<Envelope>(bytes).ok().map(|e| e.request_id)
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Subscribe to a document.
    SubscribeDocument(DocumentPath),
    /// Subscribe to a collection.
    SubscribeCollection(CollectionPath),
    /// Drop a document subscription.
    UnsubscribeDocument(DocumentPath),
    /// Drop a collection subscription.
    UnsubscribeCollection(CollectionPath),
    /// Read a document.
    Get(DocumentPath),
    /// Read a collection.
    List(CollectionPath),
    /// Merge a partial value into a document.
    Update(DocumentPath, Document),
    /// Add a document.
    Add(CollectionPath, Document),
    /// Remove a document.
    Remove(DocumentPath),
    /// Store a file.
    AddFile(CollectionPath, FileUpload),
    /// Delete a file.
    DeleteFile(DocumentPath),
    /// Locate a file.
    GetDownloadUrl(DocumentPath),
}

impl Request {
    /// Interprets a wire request.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownEvent`] for an unrecognised event,
    /// [`ProtocolError::InvalidRequest`] if the path kind or payload does
    /// not fit the event.
    pub fn from_message(message: RequestMessage) -> ProtocolResult<Self> {
        let event: RequestEvent = message.event.parse()?;
        let path = message.path;

        let request = match event {
            RequestEvent::SubscribeDocument => Request::SubscribeDocument(document_path(path)?),
            RequestEvent::SubscribeCollection => {
                Request::SubscribeCollection(collection_path(path)?)
            }
            RequestEvent::UnsubscribeDocument => {
                Request::UnsubscribeDocument(document_path(path)?)
            }
            RequestEvent::UnsubscribeCollection => {
                Request::UnsubscribeCollection(collection_path(path)?)
            }
            RequestEvent::Get => Request::Get(document_path(path)?),
            RequestEvent::List => Request::List(collection_path(path)?),
            RequestEvent::Update => {
                Request::Update(document_path(path)?, object_payload(message.value)?)
            }
            RequestEvent::Add => Request::Add(collection_path(path)?, object_payload(message.value)?),
            RequestEvent::Remove => Request::Remove(document_path(path)?),
            RequestEvent::AddFile => {
                let metadata = object_payload(message.value)?;
                let name = text_attribute(&metadata, "name")?;
                let content_type = text_attribute(&metadata, "type")?;
                let data = message
                    .data
                    .ok_or_else(|| ProtocolError::invalid_request("data is missing"))?;
                Request::AddFile(
                    collection_path(path)?,
                    FileUpload::new(name, content_type, data),
                )
            }
            RequestEvent::DeleteFile => Request::DeleteFile(document_path(path)?),
            RequestEvent::GetDownloadUrl => Request::GetDownloadUrl(document_path(path)?),
        };
        Ok(request)
    }

    /// Builds the wire form of this request.
    pub fn into_message(self, request_id: impl Into<String>) -> RequestMessage {
        let event = self.event();
        let (path, value, data): (Path, Option<Value>, Option<Vec<u8>>) = match self {
            Request::SubscribeDocument(p)
            | Request::UnsubscribeDocument(p)
            | Request::Get(p)
            | Request::Remove(p)
            | Request::DeleteFile(p)
            | Request::GetDownloadUrl(p) => (p.into(), None, None),
            Request::SubscribeCollection(p)
            | Request::UnsubscribeCollection(p)
            | Request::List(p) => (p.into(), None, None),
            Request::Update(p, value) => (p.into(), Some(Value::Object(value)), None),
            Request::Add(p, value) => (p.into(), Some(Value::Object(value)), None),
            Request::AddFile(p, file) => (
                p.into(),
                Some(Value::Object(file.metadata())),
                Some(file.data),
            ),
        };

        RequestMessage {
            request_id: request_id.into(),
            event: event.as_str().to_string(),
            path,
            value,
            data,
        }
    }

    /// Returns the event kind.
    pub fn event(&self) -> RequestEvent {
        match self {
            Request::SubscribeDocument(_) => RequestEvent::SubscribeDocument,
            Request::SubscribeCollection(_) => RequestEvent::SubscribeCollection,
            Request::UnsubscribeDocument(_) => RequestEvent::UnsubscribeDocument,
            Request::UnsubscribeCollection(_) => RequestEvent::UnsubscribeCollection,
            Request::Get(_) => RequestEvent::Get,
            Request::List(_) => RequestEvent::List,
            Request::Update(..) => RequestEvent::Update,
            Request::Add(..) => RequestEvent::Add,
            Request::Remove(_) => RequestEvent::Remove,
            Request::AddFile(..) => RequestEvent::AddFile,
            Request::DeleteFile(_) => RequestEvent::DeleteFile,
            Request::GetDownloadUrl(_) => RequestEvent::GetDownloadUrl,
        }
    }

    /// Returns the target path.
    pub fn path(&self) -> Path {
        match self {
            Request::SubscribeDocument(p)
            | Request::UnsubscribeDocument(p)
            | Request::Get(p)
            | Request::Update(p, _)
            | Request::Remove(p)
            | Request::DeleteFile(p)
            | Request::GetDownloadUrl(p) => p.clone().into(),
            Request::SubscribeCollection(p)
            | Request::UnsubscribeCollection(p)
            | Request::List(p)
            | Request::Add(p, _)
            | Request::AddFile(p, _) => p.clone().into(),
        }
    }
}

fn document_path(path: Path) -> ProtocolResult<DocumentPath> {
    match path {
        Path::Document(path) => Ok(path),
        Path::Collection(_) => Err(ProtocolError::invalid_request(
            "expected a document path",
        )),
    }
}

fn collection_path(path: Path) -> ProtocolResult<CollectionPath> {
    match path {
        Path::Collection(path) => Ok(path),
        Path::Document(_) => Err(ProtocolError::invalid_request(
            "expected a collection path",
        )),
    }
}

fn object_payload(value: Option<Value>) -> ProtocolResult<Document> {
    match value {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(ProtocolError::invalid_request("Payload must be Object")),
    }
}

fn text_attribute(metadata: &Document, name: &str) -> ProtocolResult<String> {
    metadata
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::invalid_request(format!("{name} must be String")))
}

/// Stable error codes carried by responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Authorization denied.
    Forbidden,
    /// The request named an unknown event.
    UnknownEvent,
    /// The request's path or payload was malformed.
    InvalidRequest,
    /// Any other failure.
    Internal,
}

/// Error part of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorPayload {
    /// Creates an error payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
        }
    }

    /// Returns the message, or an empty string.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

impl From<&CoreError> for ErrorPayload {
    fn from(err: &CoreError) -> Self {
        let code = match err {
            CoreError::Forbidden { .. } => ErrorCode::Forbidden,
            CoreError::UnknownEvent(_) => ErrorCode::UnknownEvent,
            CoreError::EmptyPath
            | CoreError::InvalidPath(_)
            | CoreError::InvalidPayload(_)
            | CoreError::MissingAttribute { .. } => ErrorCode::InvalidRequest,
            _ => ErrorCode::Internal,
        };
        Self::new(code, err.to_string())
    }
}

impl From<&ProtocolError> for ErrorPayload {
    fn from(err: &ProtocolError) -> Self {
        let code = match err {
            ProtocolError::UnknownEvent(_) => ErrorCode::UnknownEvent,
            ProtocolError::InvalidRequest(_) | ProtocolError::Decode { .. } => {
                ErrorCode::InvalidRequest
            }
            _ => ErrorCode::Internal,
        };
        Self::new(code, err.to_string())
    }
}

/// Reply to exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    /// Id of the request being answered.
    pub request_id: String,
    /// Result value, absent for operations without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set when the request failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseMessage {
    /// Creates a successful response.
    pub fn ok(request_id: impl Into<String>, result: Option<Value>) -> Self {
        Self {
            request_id: request_id.into(),
            result,
            error: None,
        }
    }

    /// Creates a failed response.
    pub fn err(request_id: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            request_id: request_id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Splits into the result or the error.
    pub fn into_result(self) -> Result<Option<Value>, ErrorPayload> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

/// Push of one document's state to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMessage {
    /// Subscribed path: the document itself or its collection.
    pub path: Path,
    /// Id of the document.
    pub id: String,
    /// Current value; absent when the document was removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Document>,
}

/// Any message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Reply to a request.
    Response(ResponseMessage),
    /// Subscription push.
    Snapshot(SnapshotMessage),
}

impl ServerMessage {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

impl From<ResponseMessage> for ServerMessage {
    fn from(message: ResponseMessage) -> Self {
        ServerMessage::Response(message)
    }
}

impl From<SnapshotMessage> for ServerMessage {
    fn from(message: SnapshotMessage) -> Self {
        ServerMessage::Snapshot(message)
    }
}
