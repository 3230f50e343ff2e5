//! The client half of the connection lifecycle (§4.3, §6.2): dial a
//! peer, run the credential handshake, and hand back a connected
//! [`NetworkClient`].

use std::ops::Deref;
use std::sync::Arc;

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::config::NetworkConfig;
use crate::connection::core::NetworkConnection;
use crate::connection::stream::TcpConnectionStream;
use crate::connection::tls::{connect_tls, TlsClientConfig};
use crate::error::{NetworkError, Result};
use crate::message::Credentials;
use crate::value::WireValue;

/// A connected client-side handle. Derefs to [`NetworkConnection`] so
/// `write_object`/`read_object`/`get_controller`/`on_*` are all called
/// directly on it.
#[derive(Clone)]
pub struct NetworkClient {
    connection: Arc<NetworkConnection>,
}

impl NetworkClient {
    pub fn connection(&self) -> &Arc<NetworkConnection> {
        &self.connection
    }

    pub(crate) fn from_connection(connection: Arc<NetworkConnection>) -> Self {
        Self { connection }
    }

    /// Fire-and-forget send: the peer-facade name for
    /// [`NetworkConnection::write_object`] (§2's "GetController<T> and
    /// SendAsync").
    pub async fn send_async(&self, value: WireValue) -> Result<()> {
        self.connection.write_object(value).await
    }
}

impl Deref for NetworkClient {
    type Target = NetworkConnection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

/// Builder for a client connection, mirroring the teacher's
/// `ConnectionBuilder` chain-of-setters (§6.4). TLS is opt-in via
/// [`ClientBuilder::tls`]; credentials default to anonymous.
pub struct ClientBuilder {
    config: NetworkConfig,
    credentials: Credentials,
    tls: Option<(TlsClientConfig, String)>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: NetworkConfig::default(),
            credentials: Credentials::anonymous(),
            tls: None,
        }
    }

    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Enables TLS for the connection; `server_name` is validated against
    /// the peer certificate during the handshake (§4.3).
    pub fn tls(mut self, config: TlsClientConfig, server_name: impl Into<String>) -> Self {
        self.tls = Some((config, server_name.into()));
        self
    }

    /// Dials `addr`, runs the credential handshake (§6.2), and enables
    /// background listening if the connection's config asked for it.
    /// The handshake itself always runs with listening held off so no
    /// application or RMI frame is dispatched before authentication
    /// completes.
    pub async fn connect(self, addr: impl ToSocketAddrs) -> Result<NetworkClient> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|err| NetworkError::ConnectionOpen(err.to_string()))?;

        let stream = match &self.tls {
            Some((tls_config, server_name)) => connect_tls(tcp, server_name, tls_config).await?,
            None => TcpConnectionStream::new_tcp(tcp),
        };

        // `config.listening` only governs the initial state of a
        // directly-constructed `NetworkConnection` (see
        // `NetworkConnectionBuilder`); the credential handshake (§6.2)
        // always runs with listening held off regardless, and §4.3
        // requires both sides to enable it unconditionally afterward.
        let mut handshake_config = self.config.clone();
        handshake_config.listening = false;

        let connection = NetworkConnection::new(stream, Arc::new(handshake_config));

        let credentials_frame = self.credentials.into_frame(self.config.encoding)?;
        connection.write_frame_raw(credentials_frame).await?;

        // §6.2 step 4: anything other than a `true` ack — a malformed
        // frame or the server simply closing the connection to reject —
        // is reported identically as ClientAuthentication.
        let accepted = match connection.read_frame_raw().await {
            Ok(frame) => match WireValue::from_frame(frame, self.config.serializer.as_ref()) {
                Ok(WireValue::Bool(accepted)) => accepted,
                _ => false,
            },
            Err(_) => false,
        };

        if !accepted {
            connection.close().await;
            return Err(NetworkError::ClientAuthentication);
        }

        // §4.3: "After this exchange both sides enable background
        // listening" — unconditionally, not gated on configuration.
        connection.set_listening(true).await;

        Ok(NetworkClient { connection })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience entry point equivalent to `ClientBuilder::new().connect(addr)`.
pub async fn connect(addr: impl ToSocketAddrs) -> Result<NetworkClient> {
    ClientBuilder::new().connect(addr).await
}
