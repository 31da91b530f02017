//! Main sync server.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::handler::HandlerContext;
use docsync_core::{Datastore, EventBus, MemoryDatastore, Rule, RuleSet};
use docsync_protocol::FrameChannel;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The sync server.
///
/// Owns the rules, the datastore and the bus shared by every connection.
/// Transports are handed to [`SyncServer::accept`], which runs one
/// [`Connection`] per transport until it closes.
///
/// # Example
///
/// ```rust,ignore
/// use docsync_core::Rule;
/// use docsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default(), &[Rule::allow_all("/posts/:id")]);
/// server.listen().await?;
/// ```
#[derive(Clone)]
pub struct SyncServer {
    context: Arc<HandlerContext>,
    connections: Arc<AtomicUsize>,
}

impl SyncServer {
    /// Creates a server over an empty in-memory datastore.
    pub fn new(config: ServerConfig, rules: &[Rule]) -> Self {
        Self::with_datastore(
            config,
            RuleSet::compile(rules),
            Arc::new(MemoryDatastore::new()),
            EventBus::new(),
        )
    }

    /// Creates a server over an existing datastore and bus.
    ///
    /// Every writer to `datastore` must publish on `bus` for subscribers to
    /// observe its changes.
    pub fn with_datastore(
        config: ServerConfig,
        rules: RuleSet,
        datastore: Arc<dyn Datastore>,
        bus: EventBus,
    ) -> Self {
        Self {
            context: Arc::new(HandlerContext::new(config, rules, datastore, bus)),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the bus mutations are published on.
    pub fn bus(&self) -> &EventBus {
        &self.context.bus
    }

    /// Returns the datastore.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.context.datastore
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    fn reserve_slot(&self) -> ServerResult<ConnectionSlot> {
        let max = self.context.config.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            })
            .map_err(|_| ServerError::ConnectionLimit(max))?;
        Ok(ConnectionSlot(Arc::clone(&self.connections)))
    }

    /// Starts serving one transport.
    ///
    /// The returned task finishes once the peer closes the transport.
    ///
    /// # Errors
    ///
    /// [`ServerError::ConnectionLimit`] if `max_connections` transports are
    /// already being served. The channel is dropped, closing it.
    pub fn accept(&self, channel: FrameChannel) -> ServerResult<JoinHandle<()>> {
        let slot = self.reserve_slot()?;
        let (outbound, inbound) = channel.into_parts();
        let connection = Connection::new(Arc::clone(&self.context), outbound);

        Ok(tokio::spawn(async move {
            let _slot = slot;
            connection.serve(inbound).await;
        }))
    }

    /// Opens an in-process connection and returns the client end.
    pub fn connect_local(&self) -> ServerResult<FrameChannel> {
        let (server_end, client_end) = FrameChannel::pair();
        self.accept(server_end)?;
        Ok(client_end)
    }

    /// Binds the configured address and serves TCP clients.
    ///
    /// Only fails if the address cannot be bound.
    pub async fn listen(&self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.context.config.bind_addr).await?;
        self.serve_listener(listener).await;
        Ok(())
    }

    /// Serves TCP clients from an already bound listener.
    ///
    /// Accept errors are logged and never end the loop.
    pub async fn serve_listener(&self, listener: TcpListener) {
        info!(addr = ?listener.local_addr().ok(), "sync server listening");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    if let Some(backoff) = accept_backoff(&err) {
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };
            if let Err(err) = stream.set_nodelay(true) {
                warn!(%peer, error = %err, "failed to set TCP_NODELAY");
            }

            let channel = FrameChannel::from_stream(stream, self.context.config.max_frame_len);
            match self.accept(channel) {
                Ok(_) => info!(%peer, "client connected"),
                Err(err) => warn!(%peer, error = %err, "client rejected"),
            }
        }
    }
}

/// Pause before accepting again after `err`.
///
/// Errors about a single aborted handshake retry at once. Anything else,
/// such as running out of file descriptors, backs off so the loop does
/// not spin.
fn accept_backoff(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
