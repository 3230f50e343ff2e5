//! Duplex, framed, bidirectional object messaging and remote method
//! invocation over a single TCP (optionally TLS) connection.
//!
//! A [`connection::NetworkConnection`] is the unit everything else is
//! built on: `write_object`/`read_object` exchange plain application
//! values, `use_instance`/`use_constructor`/`use_factory` expose local
//! [`connection::Controller`]s to the peer, and `get_controller` returns
//! a [`connection::RemoteController`] handle for calling back out. Both
//! directions share the same wire and the same connection, which is
//! what makes this duplex rather than request/response.
//!
//! [`client::ClientBuilder`] dials out; [`server::ServerBuilder`] binds
//! and accepts. Both run the credential handshake described in the
//! protocol's connection-establishment section before handing back a
//! connection that's safe to read from or write to.

pub mod client;
pub mod codepage;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod message;
pub mod serializer;
pub mod server;
pub mod value;

pub use client::{connect, ClientBuilder, NetworkClient};
pub use codepage::CodePage;
pub use config::NetworkConfig;
pub use connection::{
    Controller, ControllerRegistry, Disposer, DispatchError, NetworkConnection, NetworkConnectionBuilder,
    RemoteCallDispatcher, RemoteController,
};
pub use error::{ControllerErrorKind, NetworkError, Result};
pub use frame::{Frame, TypeCode};
pub use message::{Credentials, ExceptionCode, InvokeRequest, InvokeResult};
pub use serializer::{JsonSerializer, Serializer, SerializerError};
pub use server::{AuthenticateFn, PeerRegistry, Server, ServerBuilder};
pub use value::WireValue;
