//! Per-client sessions.
//!
//! A [`Connection`] terminates one client's transport. It answers every
//! request with exactly one response and relays bus publications for the
//! paths the client subscribed to.
//!
//! # Subscriptions
//!
//! Subscriptions are reference counted per encoded path. The first
//! subscription to a path attaches one relay listener to the bus; further
//! subscriptions to the same path only bump the count. The listener is
//! detached when the count returns to zero, and every listener still
//! attached is detached when the connection is dropped.

use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use docsync_core::{
    AccessMode, CoreError, CoreResult, EventBus, ListenerId, Path, Publication, Value,
};
use docsync_protocol::{
    ErrorCode, ErrorPayload, FrameReceiver, FrameSender, ProtocolError, Request, RequestMessage,
    ResponseMessage, ServerMessage, SnapshotMessage,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Registration {
    count: usize,
    listener: ListenerId,
}

struct Session {
    id: String,
    handler: RequestHandler,
    outbound: FrameSender,
    subscriptions: Mutex<HashMap<String, Registration>>,
}

impl Session {
    fn bus(&self) -> &EventBus {
        &self.handler.context().bus
    }

    fn max_frame_len(&self) -> usize {
        self.handler.context().config.max_frame_len
    }

    fn send(&self, message: ServerMessage) {
        deliver(&self.outbound, &self.id, self.max_frame_len(), message);
    }

    fn relay(&self) -> Arc<dyn Fn(&Publication) + Send + Sync> {
        let outbound = self.outbound.clone();
        let session = self.id.clone();
        let max_frame_len = self.max_frame_len();
        Arc::new(move |publication: &Publication| {
            let message = ServerMessage::Snapshot(SnapshotMessage {
                path: publication.path.clone(),
                id: publication.id.clone(),
                value: publication.value.clone(),
            });
            deliver(&outbound, &session, max_frame_len, message);
        })
    }
}

/// Encodes `message` into a frame no longer than `max_frame_len`.
fn encode_frame(message: &ServerMessage, max_frame_len: usize) -> ServerResult<Vec<u8>> {
    let frame = message.encode()?;
    if frame.len() > max_frame_len {
        return Err(ProtocolError::FrameTooLarge {
            len: frame.len(),
            max: max_frame_len,
        }
        .into());
    }
    Ok(frame)
}

/// Sends one message to the client.
///
/// A response that cannot be framed is replaced by an `Internal` error for
/// the same request. A snapshot that cannot be framed would leave the
/// client's view stale, so the transport is closed instead.
fn deliver(outbound: &FrameSender, session: &str, max_frame_len: usize, message: ServerMessage) {
    let frame = match (encode_frame(&message, max_frame_len), message) {
        (Ok(frame), _) => frame,
        (Err(err), ServerMessage::Response(response)) => {
            warn!(
                %session,
                request_id = %response.request_id,
                error = %err,
                "response replaced by error"
            );
            let fallback = ServerMessage::Response(ResponseMessage::err(
                response.request_id,
                ErrorPayload::new(ErrorCode::Internal, "response exceeds max frame length"),
            ));
            match encode_frame(&fallback, max_frame_len) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%session, error = %err, "closing transport");
                    outbound.close();
                    return;
                }
            }
        }
        (Err(err), ServerMessage::Snapshot(snapshot)) => {
            warn!(
                %session,
                id = %snapshot.id,
                error = %err,
                "snapshot undeliverable, closing transport"
            );
            outbound.close();
            return;
        }
    };
    if let Err(err) = outbound.send(frame) {
        debug!(%session, error = %err, "dropping outbound message");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (topic, registration) in subscriptions {
            self.handler.context().bus.off(&topic, registration.listener);
        }
        info!(session = %self.id, "session closed");
    }
}

/// One client session.
#[derive(Clone)]
pub struct Connection {
    session: Arc<Session>,
}

impl Connection {
    /// Opens a session that sends responses and snapshots to `outbound`.
    pub fn new(context: Arc<HandlerContext>, outbound: FrameSender) -> Self {
        let id = Uuid::new_v4().to_string();
        info!(session = %id, "session opened");
        Self {
            session: Arc::new(Session {
                handler: RequestHandler::new(context, id.clone()),
                id,
                outbound,
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the session id, which rule predicates see as the user id.
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Returns the subscription count for `path`.
    pub fn subscription_count(&self, path: &Path) -> usize {
        self.session
            .subscriptions
            .lock()
            .get(&path.encode())
            .map_or(0, |registration| registration.count)
    }

    /// Returns the number of paths with an attached relay.
    pub fn active_subscriptions(&self) -> usize {
        self.session.subscriptions.lock().len()
    }

    /// Reads requests until the transport closes.
    ///
    /// Each request runs on its own task, so responses may be sent in a
    /// different order than the requests arrived.
    pub async fn serve(self, mut inbound: FrameReceiver) {
        while let Some(frame) = inbound.recv().await {
            let connection = self.clone();
            tokio::spawn(async move {
                if let Some(response) = connection.handle_frame(&frame).await {
                    connection.session.send(ServerMessage::Response(response));
                }
            });
        }
        debug!(session = %self.session.id, "transport closed");
    }

    /// Decodes and handles one inbound frame.
    ///
    /// Returns `None` if the frame is too malformed to name a request id.
    pub async fn handle_frame(&self, frame: &[u8]) -> Option<ResponseMessage> {
        match RequestMessage::decode(frame) {
            Ok(message) => Some(self.handle(message).await),
            Err(err) => {
                warn!(session = %self.session.id, error = %err, "malformed request");
                RequestMessage::peek_request_id(frame)
                    .map(|request_id| ResponseMessage::err(request_id, ErrorPayload::from(&err)))
            }
        }
    }

    /// Handles one request and builds its response.
    pub async fn handle(&self, message: RequestMessage) -> ResponseMessage {
        let request_id = message.request_id.clone();
        let event = message.event.clone();

        let result = match Request::from_message(message) {
            Ok(request) => self.dispatch(request).await,
            Err(err) => Err(CoreError::from(err)),
        };

        match result {
            Ok(value) => ResponseMessage::ok(request_id, value),
            Err(err) => {
                if err.is_forbidden() {
                    debug!(session = %self.session.id, %event, error = %err, "request forbidden");
                } else {
                    warn!(session = %self.session.id, %event, error = %err, "request failed");
                }
                ResponseMessage::err(request_id, ErrorPayload::from(&err))
            }
        }
    }

    async fn dispatch(&self, request: Request) -> CoreResult<Option<Value>> {
        let handler = &self.session.handler;
        match request {
            Request::SubscribeDocument(path) => {
                self.subscribe(path.into()).await?;
                Ok(None)
            }
            Request::SubscribeCollection(path) => {
                self.subscribe(path.into()).await?;
                Ok(None)
            }
            Request::UnsubscribeDocument(path) => {
                self.unsubscribe(path.into()).await?;
                Ok(None)
            }
            Request::UnsubscribeCollection(path) => {
                self.unsubscribe(path.into()).await?;
                Ok(None)
            }
            Request::Get(path) => Ok(handler.get(&path).await?.map(Value::Object)),
            Request::List(path) => {
                let entries = handler.list(&path).await?;
                Ok(Some(Value::Array(
                    entries
                        .into_iter()
                        .map(|(id, value)| Value::Array(vec![Value::String(id), Value::Object(value)]))
                        .collect(),
                )))
            }
            Request::Update(path, patch) => {
                Ok(Some(Value::Object(handler.update(&path, patch).await?)))
            }
            Request::Add(path, value) => Ok(Some(Value::String(handler.add(&path, value).await?))),
            Request::Remove(path) => {
                handler.remove(&path).await?;
                Ok(None)
            }
            Request::AddFile(path, file) => {
                Ok(Some(Value::String(handler.add_file(&path, file).await?)))
            }
            Request::DeleteFile(path) => {
                handler.delete_file(&path).await?;
                Ok(None)
            }
            Request::GetDownloadUrl(path) => {
                Ok(Some(Value::String(handler.download_url(&path).await?)))
            }
        }
    }

    async fn subscribe(&self, path: Path) -> CoreResult<()> {
        let session = &self.session;
        session
            .handler
            .authorize(&path, AccessMode::Read)
            .await?;

        let topic = path.encode();
        let bus = session.bus();
        let datastore = &session.handler.context().datastore;
        let _sequence = bus.sequence().await;

        let snapshots = match &path {
            Path::Document(document) => vec![SnapshotMessage {
                path: path.clone(),
                id: document.id()?.to_string(),
                value: datastore.get(document).await?,
            }],
            Path::Collection(collection) => datastore
                .list(collection)
                .await?
                .into_iter()
                .map(|(id, value)| SnapshotMessage {
                    path: path.clone(),
                    id,
                    value: Some(value),
                })
                .collect(),
        };

        {
            let mut subscriptions = session.subscriptions.lock();
            match subscriptions.get_mut(&topic) {
                Some(registration) => registration.count += 1,
                None => {
                    let listener = bus.on(topic.clone(), session.relay());
                    debug!(session = %session.id, %topic, "relay attached");
                    subscriptions.insert(topic, Registration { count: 1, listener });
                }
            }
        }

        for snapshot in snapshots {
            session.send(ServerMessage::Snapshot(snapshot));
        }
        Ok(())
    }

    async fn unsubscribe(&self, path: Path) -> CoreResult<()> {
        let session = &self.session;
        session
            .handler
            .authorize(&path, AccessMode::Write)
            .await?;

        let topic = path.encode();
        let mut subscriptions = session.subscriptions.lock();
        if let Some(registration) = subscriptions.get_mut(&topic) {
            registration.count -= 1;
            if registration.count == 0 {
                if let Some(registration) = subscriptions.remove(&topic) {
                    session.bus().off(&topic, registration.listener);
                    debug!(session = %session.id, %topic, "relay detached");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use docsync_core::{
        value::into_document, CollectionPath, Document, DocumentPath, MemoryDatastore, Rule,
        RuleSet,
    };
    use docsync_protocol::FrameChannel;
    use serde_json::json;

    struct Harness {
        connection: Connection,
        bus: EventBus,
        client_rx: FrameReceiver,
        next_id: usize,
    }

    impl Harness {
        fn new(rules: &[Rule]) -> Self {
            let bus = EventBus::new();
            let context = Arc::new(HandlerContext::new(
                ServerConfig::default(),
                RuleSet::compile(rules),
                Arc::new(MemoryDatastore::new()),
                bus.clone(),
            ));
            let (server_end, client_end) = FrameChannel::pair();
            let (_client_tx, client_rx) = client_end.into_parts();
            Self {
                connection: Connection::new(context, server_end.sender()),
                bus,
                client_rx,
                next_id: 0,
            }
        }

        async fn send(&mut self, request: Request) -> ResponseMessage {
            self.next_id += 1;
            let message = request.into_message(format!("r{}", self.next_id));
            self.connection.handle(message).await
        }

        fn snapshots(&mut self) -> Vec<SnapshotMessage> {
            let mut out = Vec::new();
            while let Some(frame) = self.client_rx.try_recv() {
                match ServerMessage::decode(&frame).unwrap() {
                    ServerMessage::Snapshot(snapshot) => out.push(snapshot),
                    ServerMessage::Response(_) => {}
                }
            }
            out
        }
    }

    fn doc(value: serde_json::Value) -> Document {
        into_document(value).unwrap()
    }

    fn posts() -> CollectionPath {
        CollectionPath::root("posts")
    }

    #[tokio::test]
    async fn refcounted_subscriptions() {
        let mut h = Harness::new(&[Rule::allow_all("/posts/:id")]);
        let path = DocumentPath::root("posts", "a");
        let topic = path.encode();

        assert!(h.send(Request::SubscribeDocument(path.clone())).await.error.is_none());
        assert!(h.send(Request::SubscribeDocument(path.clone())).await.error.is_none());
        assert_eq!(h.bus.listener_count(&topic), 1);
        assert_eq!(h.connection.subscription_count(&path.clone().into()), 2);

        h.send(Request::UnsubscribeDocument(path.clone())).await;
        assert_eq!(h.bus.listener_count(&topic), 1);

        h.send(Request::UnsubscribeDocument(path.clone())).await;
        assert_eq!(h.bus.listener_count(&topic), 0);
        assert_eq!(h.connection.active_subscriptions(), 0);

        let response = h.send(Request::UnsubscribeDocument(path)).await;
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn subscribe_pushes_current_state_then_changes() {
        let mut h = Harness::new(&[Rule::allow_all("/posts/:id")]);
        let a = posts().document_path("a");
        h.send(Request::Update(a.clone(), doc(json!({"n": 1})))).await;

        h.send(Request::SubscribeCollection(posts())).await;
        let initial = h.snapshots();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].id, "a");
        assert_eq!(initial[0].path, Path::Collection(posts()));

        h.send(Request::Remove(a)).await;
        let later = h.snapshots();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].value, None);
    }

    #[tokio::test]
    async fn document_subscription_to_missing_document() {
        let mut h = Harness::new(&[Rule::allow_all("/posts/:id")]);
        h.send(Request::SubscribeDocument(posts().document_path("ghost")))
            .await;
        let snapshots = h.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, "ghost");
        assert_eq!(snapshots[0].value, None);
    }

    #[tokio::test]
    async fn forbidden_has_stable_code() {
        let mut h = Harness::new(&[Rule::new("/posts/:id").read(true)]);
        let response = h.send(Request::Add(posts(), doc(json!({"t": 1})))).await;
        let error = response.into_result().unwrap_err();
        assert_eq!(error.code, Some(ErrorCode::Forbidden));
    }

    #[tokio::test]
    async fn unsubscribe_checks_write_access() {
        let mut h = Harness::new(&[Rule::new("/posts/:id").read(true)]);
        let path = posts().document_path("a");
        assert!(h.send(Request::SubscribeDocument(path.clone())).await.error.is_none());

        let response = h.send(Request::UnsubscribeDocument(path.clone())).await;
        assert_eq!(
            response.error.and_then(|e| e.code),
            Some(ErrorCode::Forbidden)
        );
        assert_eq!(h.bus.listener_count(&path.encode()), 1);
    }

    #[tokio::test]
    async fn unknown_event_is_answered() {
        let h = Harness::new(&[]);
        let response = h
            .connection
            .handle(RequestMessage {
                request_id: "x".into(),
                event: "Explode".into(),
                path: DocumentPath::root("a", "b").into(),
                value: None,
                data: None,
            })
            .await;
        assert_eq!(response.request_id, "x");
        let error = response.into_result().unwrap_err();
        assert_eq!(error.code, Some(ErrorCode::UnknownEvent));
        assert_eq!(error.message(), "Unknown event (Explode)");
    }

    #[tokio::test]
    async fn update_returns_merged_value_and_add_returns_id() {
        let mut h = Harness::new(&[Rule::allow_all("/posts/:id")]);
        let response = h.send(Request::Add(posts(), doc(json!({"title": "a"})))).await;
        let id = response.result.and_then(|v| v.as_str().map(str::to_string)).unwrap();

        let response = h
            .send(Request::Update(posts().document_path(id.as_str()), doc(json!({"tags": ["x"]}))))
            .await;
        assert_eq!(response.result, Some(json!({"title": "a", "tags": ["x"]})));

        let response = h.send(Request::List(posts())).await;
        assert_eq!(
            response.result,
            Some(json!([[id, {"title": "a", "tags": ["x"]}]]))
        );
    }

    #[tokio::test]
    async fn empty_path_is_invalid_request() {
        let mut h = Harness::new(&[Rule::allow_all("/posts/:id")]);
        let response = h.send(Request::Get(DocumentPath::default())).await;
        assert_eq!(
            response.error.and_then(|e| e.code),
            Some(ErrorCode::InvalidRequest)
        );
    }

    #[tokio::test]
    async fn dropping_connection_detaches_relays() {
        let mut h = Harness::new(&[Rule::allow_all("/posts/:id")]);
        h.send(Request::SubscribeCollection(posts())).await;
        h.send(Request::SubscribeDocument(posts().document_path("a"))).await;
        assert_eq!(h.bus.total_listeners(), 2);

        let Harness { connection, bus, .. } = h;
        drop(connection);
        assert_eq!(bus.total_listeners(), 0);
    }

    #[tokio::test]
    async fn oversized_response_is_answered_with_an_error() {
        let (server_end, client_end) = FrameChannel::pair();
        let (_client_tx, mut client_rx) = client_end.into_parts();
        let response = ResponseMessage::ok("big", Some(json!({"blob": "x".repeat(512)})));

        deliver(&server_end.sender(), "s", 256, ServerMessage::Response(response));

        let frame = client_rx.recv().await.unwrap();
        assert_eq!(
            ServerMessage::decode(&frame).unwrap(),
            ServerMessage::Response(ResponseMessage::err(
                "big",
                ErrorPayload::new(ErrorCode::Internal, "response exceeds max frame length"),
            ))
        );
        assert!(!server_end.sender().is_closed());
    }

    #[tokio::test]
    async fn oversized_snapshot_closes_the_transport() {
        let (server_end, client_end) = FrameChannel::pair();
        let (_client_tx, mut client_rx) = client_end.into_parts();
        let snapshot = SnapshotMessage {
            path: Path::Collection(posts()),
            id: "a".into(),
            value: Some(doc(json!({"blob": "x".repeat(512)}))),
        };

        deliver(&server_end.sender(), "s", 256, ServerMessage::Snapshot(snapshot));

        assert_eq!(client_rx.recv().await, None);
        assert!(server_end.sender().is_closed());
    }
}
