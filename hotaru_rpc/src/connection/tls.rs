//! TLS 1.2/1.3 handshake helpers for both roles (§4.3).
//!
//! The client path is a close adaptation of the teacher's
//! `ConnectionBuilder::try_connect` TLS branch; the server path
//! generalizes the same `rustls` crypto-provider setup to
//! `ServerConfig`/`TlsAcceptor`, since the teacher never needed to accept
//! TLS itself.

use std::io::{BufReader, Cursor};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pemfile::Item;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use webpki_roots::TLS_SERVER_ROOTS;

use crate::connection::stream::TcpConnectionStream;
use crate::error::{NetworkError, Result};

/// What the client side needs to validate the server's certificate.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Custom root CA, PEM-encoded. Falls back to the Mozilla bundle
    /// shipped by `webpki-roots` when absent, matching the teacher.
    pub root_cert_pem: Option<Vec<u8>>,
}

pub async fn connect_tls(
    tcp: TcpStream,
    server_name: &str,
    config: &TlsClientConfig,
) -> Result<TcpConnectionStream> {
    let mut root_store = RootCertStore::empty();

    if let Some(pem) = &config.root_cert_pem {
        let mut reader = BufReader::new(Cursor::new(pem));
        let certs = rustls_pemfile::read_all(&mut reader)
            .into_iter()
            .filter_map(|item| match item {
                Ok(Item::X509Certificate(cert)) => Some(cert),
                _ => None,
            });
        root_store.add_parsable_certificates(certs);
    } else {
        root_store.extend(TLS_SERVER_ROOTS.iter().cloned());
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NetworkError::ConnectionOpen(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(tls_config));
    let name = ServerName::try_from(server_name.to_owned())
        .map_err(|_| NetworkError::ConnectionOpen(format!("invalid server name '{server_name}'")))?;

    let tls_stream = connector
        .connect(name, tcp)
        .await
        .map_err(|e| NetworkError::ConnectionOpen(e.to_string()))?;

    Ok(TcpConnectionStream::new_tls_client(tls_stream))
}

/// What the server side needs to present to connecting clients.
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    pub cert_chain_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// Builds a reusable [`TlsAcceptor`] from a PEM certificate chain and key.
/// Call once at server startup; the returned acceptor is cheap to clone
/// and share across accepted connections.
pub fn build_tls_acceptor(config: &TlsServerConfig) -> Result<TlsAcceptor> {
    let mut cert_reader = BufReader::new(Cursor::new(&config.cert_chain_pem));
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .filter_map(|item| item.ok())
        .collect();
    if certs.is_empty() {
        return Err(NetworkError::ConnectionOpen(
            "no certificates found in cert_chain_pem".into(),
        ));
    }

    let mut key_reader = BufReader::new(Cursor::new(&config.key_pem));
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| NetworkError::ConnectionOpen(e.to_string()))?
        .ok_or_else(|| NetworkError::ConnectionOpen("no private key found in key_pem".into()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NetworkError::ConnectionOpen(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| NetworkError::ConnectionOpen(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

pub async fn accept_tls(tcp: TcpStream, acceptor: &TlsAcceptor) -> Result<TcpConnectionStream> {
    let tls_stream = acceptor
        .accept(tcp)
        .await
        .map_err(|e| NetworkError::ConnectionOpen(e.to_string()))?;
    Ok(TcpConnectionStream::new_tls_server(tls_stream))
}
