//! Error taxonomy for the connection, framing, serialization, and RMI layers.

use std::fmt;
use std::io;

/// The kinds of failure a [`crate::connection::NetworkConnection`] can
/// surface, grouped the way the protocol specification groups them.
#[derive(Debug, Clone)]
pub enum NetworkError {
    /// TCP/TLS establishment failed before the credential handshake.
    ConnectionOpen(String),
    /// The credential exchange was rejected by the remote peer.
    ClientAuthentication,
    /// The remote peer closed the stream, or I/O failed mid-frame. Fatal.
    ConnectionBroken,
    /// A framing invariant was violated (unreadable header, inconsistent
    /// lengths). Fatal.
    ProtocolViolation(String),
    /// A single frame's payload could not be encoded.
    SerializationError {
        type_name: String,
        message_id: i32,
        in_response_to_id: i32,
        cause: String,
    },
    /// A single frame's payload named a type the receiver can't resolve.
    SerializationTypeNotFound {
        type_name: String,
        message_id: i32,
        in_response_to_id: i32,
    },
    /// An RMI call failed on the remote side.
    ControllerInvocation(ControllerErrorKind),
    /// The connection has already been closed or broken.
    ObjectDisposed,
}

/// Substates of [`NetworkError::ControllerInvocation`] (§7).
#[derive(Debug, Clone)]
pub enum ControllerErrorKind {
    OperationCancelled,
    DataReceivingError(String),
    ControllerNotFound { identifier: String },
    MethodNotFound { identifier: String, method: String },
    MethodInvokeException { message: String, full_exception: String },
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionOpen(err) => write!(f, "failed to open connection: {err}"),
            Self::ClientAuthentication => write!(f, "credential exchange rejected"),
            Self::ConnectionBroken => write!(f, "connection broken"),
            Self::ProtocolViolation(err) => write!(f, "protocol violation: {err}"),
            Self::SerializationError { type_name, message_id, in_response_to_id, cause } => write!(
                f,
                "serialization error for type '{type_name}' (message_id={message_id}, in_response_to={in_response_to_id}): {cause}"
            ),
            Self::SerializationTypeNotFound { type_name, message_id, in_response_to_id } => write!(
                f,
                "unknown type '{type_name}' (message_id={message_id}, in_response_to={in_response_to_id})"
            ),
            Self::ControllerInvocation(kind) => write!(f, "controller invocation failed: {kind}"),
            Self::ObjectDisposed => write!(f, "connection has been disposed"),
        }
    }
}

impl fmt::Display for ControllerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperationCancelled => write!(f, "operation cancelled"),
            Self::DataReceivingError(err) => write!(f, "data receiving error: {err}"),
            Self::ControllerNotFound { identifier } => write!(f, "controller not found: {identifier}"),
            Self::MethodNotFound { identifier, method } => {
                write!(f, "method not found: {identifier}::{method}")
            }
            Self::MethodInvokeException { message, .. } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionBroken
        } else {
            Self::ProtocolViolation(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
