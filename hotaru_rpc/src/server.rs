//! The server half of the connection lifecycle (§4.3, §6.2): accept
//! connections, run the credential handshake on each, and track
//! connected peers, generalized from the teacher's `App`/`AppBuilder`
//! accept loop (`tokio::select!` over `TcpListener::accept()` and
//! `ctrl_c`) onto this protocol's per-connection handshake.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;

use crate::client::NetworkClient;
use crate::config::NetworkConfig;
use crate::connection::core::NetworkConnection;
use crate::connection::stream::TcpConnectionStream;
use crate::connection::tls::{accept_tls, build_tls_acceptor, TlsServerConfig};
use crate::error::{NetworkError, Result};
use crate::message::Credentials;
use crate::value::WireValue;

/// A boxed future, the same shape the teacher's middleware layer uses
/// for its `BoxFuture<C>` handler signature.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Decides whether a peer's [`Credentials`] are accepted (§6.2). The
/// default (no function registered) accepts everyone.
pub type AuthenticateFn = Arc<dyn Fn(Credentials, SocketAddr) -> BoxFuture<'static, bool> + Send + Sync>;

/// Runs once per newly authenticated connection, before background
/// listening starts — the natural place to call `use_instance`/
/// `use_constructor`/`use_factory` (§3).
pub type SetupFn = Arc<dyn Fn(Arc<NetworkConnection>) + Send + Sync>;

/// Tracks every currently connected peer, keyed by an internally
/// assigned id. A plain `RwLock<HashMap<..>>` is enough here — unlike
/// [`crate::connection::core::HandlerList`], nothing here stores a
/// closure, so there's no `Sync` hazard in sharing it across the
/// server's accept loop and each connection's cleanup task.
#[derive(Default)]
pub struct PeerRegistry {
    next_id: AtomicU64,
    peers: SyncRwLock<HashMap<u64, NetworkClient>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, client: NetworkClient) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.peers.write().insert(id, client);
        id
    }

    fn remove(&self, id: u64) {
        self.peers.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn connected_peers(&self) -> Vec<NetworkClient> {
        self.peers.read().values().cloned().collect()
    }
}

/// Builder for a [`Server`], mirroring [`crate::client::ClientBuilder`]'s
/// chain-of-setters idiom (§6.4).
pub struct ServerBuilder {
    config: NetworkConfig,
    tls: Option<TlsServerConfig>,
    authenticate: Option<AuthenticateFn>,
    setup: Option<SetupFn>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: NetworkConfig::default().with_listening(true),
            tls: None,
            authenticate: None,
            setup: None,
        }
    }

    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tls(mut self, config: TlsServerConfig) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn authenticate(
        mut self,
        f: impl Fn(Credentials, SocketAddr) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    ) -> Self {
        self.authenticate = Some(Arc::new(f));
        self
    }

    /// Runs `f` against each connection right after it's authenticated
    /// and before background listening starts.
    pub fn on_connected(mut self, f: impl Fn(Arc<NetworkConnection>) + Send + Sync + 'static) -> Self {
        self.setup = Some(Arc::new(f));
        self
    }

    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<Server> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| NetworkError::ConnectionOpen(err.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| NetworkError::ConnectionOpen(err.to_string()))?;
        let tls_acceptor = match &self.tls {
            Some(tls_config) => Some(build_tls_acceptor(tls_config)?),
            None => None,
        };

        Ok(Server {
            listener,
            local_addr,
            config: Arc::new(self.config),
            tls_acceptor,
            authenticate: self.authenticate,
            setup: self.setup,
            peers: Arc::new(PeerRegistry::new()),
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound listener that accepts, authenticates, and registers peer
/// connections (§4.3).
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<NetworkConfig>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    authenticate: Option<AuthenticateFn>,
    setup: Option<SetupFn>,
    peers: Arc<PeerRegistry>,
}

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Accepts connections until `ctrl_c` is received, same shutdown
    /// trigger the teacher's `App::run` listens for.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (tcp, addr) = accepted.map_err(|err| NetworkError::ConnectionOpen(err.to_string()))?;
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_connection(tcp, addr).await {
                            tracing::warn!(%addr, error = %err, "connection setup failed");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, tcp: TcpStream, addr: SocketAddr) -> Result<()> {
        let stream = match &self.tls_acceptor {
            Some(acceptor) => accept_tls(tcp, acceptor).await?,
            None => TcpConnectionStream::new_tcp(tcp),
        };

        let mut handshake_config = (*self.config).clone();
        handshake_config.listening = false;
        let connection = NetworkConnection::new(stream, Arc::new(handshake_config));

        let credentials_frame = connection.read_frame_raw().await?;
        // §6.2 step 2: a non-empty frame that isn't a Credentials object
        // rejects the connection outright, without ever invoking the
        // authenticate callback.
        let credentials = match Credentials::from_frame(&credentials_frame) {
            Ok(credentials) => credentials,
            Err(_) => {
                connection.close().await;
                return Err(NetworkError::ClientAuthentication);
            }
        };

        let accepted = match &self.authenticate {
            Some(authenticate) => authenticate(credentials, addr).await,
            None => true,
        };

        let ack = WireValue::Bool(accepted).into_frame(0, 0, self.config.encoding, self.config.serializer.as_ref())?;
        connection.write_frame_raw(ack).await?;

        if !accepted {
            connection.close().await;
            return Err(NetworkError::ClientAuthentication);
        }

        if let Some(setup) = &self.setup {
            setup(connection.clone());
        }

        // §4.3: "After this exchange both sides enable background
        // listening" — unconditionally, not gated on configuration
        // (`config.listening` only governs a directly-constructed
        // `NetworkConnection`'s initial state).
        connection.set_listening(true).await;

        let client = NetworkClient::from_connection(connection.clone());
        let id = self.peers.insert(client);
        self.spawn_peer_cleanup(connection, id);

        Ok(())
    }

    /// Removes a peer from the registry once its connection closes.
    /// The `Disposer` only ever lives inside this task's local scope —
    /// never inside [`PeerRegistry`] itself, which keeps the registry's
    /// shared state free of stored closures.
    fn spawn_peer_cleanup(&self, connection: Arc<NetworkConnection>, id: u64) {
        let peers = self.peers.clone();
        tokio::spawn(async move {
            let notify = Arc::new(Notify::new());
            let notify_from_handler = notify.clone();
            let _disposer = connection.on_closed(move |_| {
                notify_from_handler.notify_one();
            });
            notify.notified().await;
            peers.remove(id);
        });
    }
}
