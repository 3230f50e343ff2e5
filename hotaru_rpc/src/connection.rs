//! The core: one connected byte stream, the RMI engine, and the
//! controller dispatcher that runs on top of it (§4.2).

pub mod calls;
pub mod controller;
pub mod core;
pub mod stream;
pub mod tls;

pub use self::calls::{CallOutcome, CallTable};
pub use self::controller::{Controller, ControllerRegistry, DispatchError, ProxyCache, RemoteCallDispatcher, RemoteController};
pub use self::core::{ConnectionState, Disposer, NetworkConnection, NetworkConnectionBuilder};
pub use self::stream::{split_connection, TcpConnectionStream};
pub use self::tls::{accept_tls, build_tls_acceptor, connect_tls, TlsClientConfig, TlsServerConfig};
