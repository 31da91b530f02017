//! Backend that forwards every operation to a remote server.

use crate::config::ClientConfig;
use crate::error::{remote_error, unexpected_result};
use async_trait::async_trait;
use docsync_core::{
    Backend, Callback, CollectionPath, CoreError, CoreResult, Document, DocumentPath, FileUpload,
    Path, Subscription, Value,
};
use docsync_protocol::{
    FrameChannel, FrameReceiver, FrameSender, Request, ResponseMessage, ServerMessage,
    SnapshotMessage,
};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

struct Shared {
    sender: FrameSender,
    config: ClientConfig,
    pending: Mutex<HashMap<String, oneshot::Sender<ResponseMessage>>>,
    listeners: RwLock<HashMap<String, Vec<(u64, Callback)>>>,
    next_listener: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.pending.lock().clear();
    }

    async fn call(&self, request: Request) -> CoreResult<Option<Value>> {
        let event = request.event();
        let path = request.path();
        let request_id = Uuid::new_v4().to_string();
        let frame = request.into_message(request_id.clone()).encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);
        if self.closed.load(Ordering::Acquire) {
            self.pending.lock().remove(&request_id);
            return Err(CoreError::Transport("connection closed".into()));
        }
        if let Err(err) = self.sender.send(frame) {
            self.pending.lock().remove(&request_id);
            return Err(err.into());
        }

        let response = match self.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(response) => response,
                Err(_) => {
                    self.pending.lock().remove(&request_id);
                    debug!(%request_id, %event, "request timed out");
                    return Err(CoreError::Timeout);
                }
            },
            None => rx.await,
        };
        let response =
            response.map_err(|_| CoreError::Transport("connection closed".into()))?;
        response
            .into_result()
            .map_err(|error| remote_error(event, &path, error))
    }

    fn add_listener(&self, topic: String, callback: Callback) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().entry(topic).or_default().push((id, callback));
        id
    }

    fn remove_listener(&self, topic: &str, id: u64) {
        let mut listeners = self.listeners.write();
        if let Some(entries) = listeners.get_mut(topic) {
            entries.retain(|(entry, _)| *entry != id);
            if entries.is_empty() {
                listeners.remove(topic);
            }
        }
    }

    fn deliver(&self, snapshot: SnapshotMessage) {
        let callbacks: Vec<Callback> = self
            .listeners
            .read()
            .get(&snapshot.path.encode())
            .map(|entries| entries.iter().map(|(_, callback)| Arc::clone(callback)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(&snapshot.id, snapshot.value.as_ref());
        }
    }
}

async fn dispatch(shared: Arc<Shared>, mut inbound: FrameReceiver) {
    while let Some(frame) = inbound.recv().await {
        match ServerMessage::decode(&frame) {
            Ok(ServerMessage::Response(response)) => {
                let waiter = shared.pending.lock().remove(&response.request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!(request_id = %response.request_id, "unmatched response"),
                }
            }
            Ok(ServerMessage::Snapshot(snapshot)) => shared.deliver(snapshot),
            Err(err) => warn!(error = %err, "dropping malformed server message"),
        }
    }
    debug!("server connection closed");
    shared.close();
}

/// A [`Backend`] served by a remote docsync server.
///
/// Requests are correlated with responses by a fresh request id; they may
/// complete in any order. Snapshots pushed by the server are delivered to
/// every local callback subscribed to the snapshot's path.
///
/// Authorization happens on the server. Its error codes are mapped back to
/// the [`CoreError`] kinds a local backend returns, so a denied request
/// still fails with [`CoreError::Forbidden`].
pub struct RpcBackend {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
}

impl RpcBackend {
    /// Wraps one end of a frame transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(channel: FrameChannel, config: ClientConfig) -> Self {
        let (sender, inbound) = channel.into_parts();
        let shared = Arc::new(Shared {
            sender,
            config,
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), inbound));
        Self { shared, dispatcher }
    }

    /// Connects to a server over TCP.
    pub async fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> CoreResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let channel = FrameChannel::from_stream(stream, config.max_frame_len);
        Ok(Self::new(channel, config))
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Returns true once the transport has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    async fn subscribe(
        &self,
        path: Path,
        callback: Callback,
        subscribe: Request,
        unsubscribe: Request,
    ) -> CoreResult<Subscription> {
        let topic = path.encode();
        let listener = self.shared.add_listener(topic.clone(), callback);

        if let Err(err) = self.shared.call(subscribe).await {
            self.shared.remove_listener(&topic, listener);
            return Err(err);
        }

        let shared = Arc::clone(&self.shared);
        Ok(Subscription::new(move || {
            async move {
                shared.remove_listener(&topic, listener);
                shared.call(unsubscribe).await.map(|_| ())
            }
            .boxed()
        }))
    }
}

impl Drop for RpcBackend {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.shared.close();
    }
}

#[async_trait]
impl Backend for RpcBackend {
    async fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: Callback,
    ) -> CoreResult<Subscription> {
        self.subscribe(
            path.clone().into(),
            callback,
            Request::SubscribeDocument(path.clone()),
            Request::UnsubscribeDocument(path.clone()),
        )
        .await
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        callback: Callback,
    ) -> CoreResult<Subscription> {
        self.subscribe(
            path.clone().into(),
            callback,
            Request::SubscribeCollection(path.clone()),
            Request::UnsubscribeCollection(path.clone()),
        )
        .await
    }

    async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>> {
        let request = Request::Get(path.clone());
        let event = request.event();
        match self.shared.call(request).await? {
            None => Ok(None),
            Some(Value::Object(document)) => Ok(Some(document)),
            other => Err(unexpected_result(event, "an object", &other)),
        }
    }

    async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>> {
        let request = Request::List(path.clone());
        let event = request.event();
        let entries = match self.shared.call(request).await? {
            Some(Value::Array(entries)) => entries,
            other => return Err(unexpected_result(event, "an array", &other)),
        };

        entries
            .into_iter()
            .map(|entry| match entry {
                Value::Array(pair) => match <[Value; 2]>::try_from(pair) {
                    Ok([Value::String(id), Value::Object(document)]) => Ok((id, document)),
                    Ok(pair) => Err(unexpected_result(
                        event,
                        "[id, object] entries",
                        &Some(Value::Array(pair.into())),
                    )),
                    Err(pair) => Err(unexpected_result(
                        event,
                        "[id, object] entries",
                        &Some(Value::Array(pair)),
                    )),
                },
                other => Err(unexpected_result(event, "[id, object] entries", &Some(other))),
            })
            .collect()
    }

    async fn update(&self, path: &DocumentPath, patch: Document) -> CoreResult<Document> {
        let request = Request::Update(path.clone(), patch);
        let event = request.event();
        match self.shared.call(request).await? {
            Some(Value::Object(document)) => Ok(document),
            other => Err(unexpected_result(event, "an object", &other)),
        }
    }

    async fn add(&self, path: &CollectionPath, value: Document) -> CoreResult<String> {
        expect_string(&self.shared, Request::Add(path.clone(), value)).await
    }

    async fn remove(&self, path: &DocumentPath) -> CoreResult<()> {
        self.shared.call(Request::Remove(path.clone())).await?;
        Ok(())
    }

    async fn add_file(&self, path: &CollectionPath, file: FileUpload) -> CoreResult<String> {
        expect_string(&self.shared, Request::AddFile(path.clone(), file)).await
    }

    async fn delete_file(&self, path: &DocumentPath) -> CoreResult<()> {
        self.shared.call(Request::DeleteFile(path.clone())).await?;
        Ok(())
    }

    async fn file_url(&self, path: &DocumentPath) -> CoreResult<String> {
        expect_string(&self.shared, Request::GetDownloadUrl(path.clone())).await
    }
}

async fn expect_string(shared: &Shared, request: Request) -> CoreResult<String> {
    let event = request.event();
    match shared.call(request).await? {
        Some(Value::String(value)) => Ok(value),
        other => Err(unexpected_result(event, "a string", &other)),
    }
}
