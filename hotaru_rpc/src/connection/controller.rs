//! Controller registration, resolution, and the statically-typed proxy
//! that replaces the original's reflection-based dynamic dispatch (§9's
//! "Reflection-based proxies" redesign flag).
//!
//! Both [`ControllerRegistry`] (local controllers, looked up by
//! identifier string when an incoming RMI request arrives) and
//! [`ProxyCache`] (remote controller handles, looked up by the same kind
//! of identifier when local code wants to call out) are grounded on
//! `hotaru_core::client::registry::ClientRegistry`'s `RwLock<HashMap<...>>`
//! of type-erased entries, keyed by string.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::NetworkError;

/// A local service object, identified on the wire by [`Controller::identifier`]
/// (§6.3), invoked by method name with positional parameter-type matching
/// in place of reflection.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Resolves the request to one of this controller's methods and runs
    /// it. Implementations do the parameter-type-name matching §4.2.2
    /// describes (typically a `match (method, parameter_types)`), and
    /// return [`DispatchError::MethodNotFound`] when nothing matches.
    async fn dispatch(
        &self,
        method: &str,
        parameter_types: &[String],
        parameters: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, DispatchError>;
}

/// Failure modes a [`Controller::dispatch`] implementation reports; these
/// map directly onto §7's RMI substates.
#[derive(Debug, Clone)]
pub enum DispatchError {
    MethodNotFound,
    Invoke { message: String, full_exception: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotFound => write!(f, "method not found"),
            Self::Invoke { message, .. } => write!(f, "{message}"),
        }
    }
}

/// How a controller comes into being the first time it's resolved (§3:
/// "a concrete instance, a zero-arg constructor, or a factory that takes
/// the peer object and returns an instance").
enum ControllerSource {
    Instance(Arc<dyn Controller>),
    Constructor(Arc<dyn Fn() -> Arc<dyn Controller> + Send + Sync>),
    Factory(Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> Arc<dyn Controller> + Send + Sync>),
}

/// Append-only registry of local controllers, keyed by identifier string
/// (§6.3). A successful resolution is memoized for the connection's
/// lifetime, matching the append-only invariant in §3.
#[derive(Default)]
pub struct ControllerRegistry {
    sources: RwLock<HashMap<String, ControllerSource>>,
    resolved: RwLock<HashMap<String, Arc<dyn Controller>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_instance(&self, identifier: impl Into<String>, instance: Arc<dyn Controller>) {
        self.sources
            .write()
            .insert(identifier.into(), ControllerSource::Instance(instance));
    }

    pub fn use_constructor(
        &self,
        identifier: impl Into<String>,
        ctor: impl Fn() -> Arc<dyn Controller> + Send + Sync + 'static,
    ) {
        self.sources
            .write()
            .insert(identifier.into(), ControllerSource::Constructor(Arc::new(ctor)));
    }

    pub fn use_factory(
        &self,
        identifier: impl Into<String>,
        factory: impl Fn(Arc<dyn Any + Send + Sync>) -> Arc<dyn Controller> + Send + Sync + 'static,
    ) {
        self.sources
            .write()
            .insert(identifier.into(), ControllerSource::Factory(Arc::new(factory)));
    }

    /// Resolves `identifier` to a controller instance, memoizing on first
    /// success. `peer` is handed to factory-style registrations only.
    pub fn resolve(&self, identifier: &str, peer: &Arc<dyn Any + Send + Sync>) -> Option<Arc<dyn Controller>> {
        if let Some(existing) = self.resolved.read().get(identifier) {
            return Some(existing.clone());
        }

        let source = self.sources.read();
        let instance = match source.get(identifier)? {
            ControllerSource::Instance(instance) => instance.clone(),
            ControllerSource::Constructor(ctor) => ctor(),
            ControllerSource::Factory(factory) => factory(peer.clone()),
        };
        drop(source);

        self.resolved
            .write()
            .entry(identifier.to_string())
            .or_insert(instance)
            .clone()
            .into()
    }
}

/// Anything capable of carrying out the outgoing RMI call path (§4.2.2,
/// steps 1-5). Implemented by [`crate::connection::core::NetworkConnection`];
/// kept as a trait so [`RemoteController`] doesn't need to know about the
/// core's internals.
#[async_trait]
pub trait RemoteCallDispatcher: Send + Sync {
    async fn call_raw(
        &self,
        controller: &str,
        method: &str,
        parameter_types: Vec<String>,
        parameters: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, NetworkError>;
}

/// The statically-typed stand-in for a reflection-generated proxy
/// (§9): every method call a generated proxy would have marshalled is
/// instead an explicit `call::<Params, Return>(...)`.
#[derive(Clone)]
pub struct RemoteController {
    identifier: String,
    dispatcher: Arc<dyn RemoteCallDispatcher>,
}

impl RemoteController {
    pub fn new(identifier: impl Into<String>, dispatcher: Arc<dyn RemoteCallDispatcher>) -> Self {
        Self { identifier: identifier.into(), dispatcher }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Invokes `method` on the remote controller, encoding `params` as the
    /// positional parameter list and decoding the result as `R`.
    pub async fn call<P, R>(&self, method: &str, parameter_types: &[&str], params: P) -> Result<R, NetworkError>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let parameters = match serde_json::to_value(params) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(serde_json::Value::Null) => Vec::new(),
            Ok(other) => vec![other],
            Err(err) => {
                return Err(NetworkError::SerializationError {
                    type_name: parameter_types.join(","),
                    message_id: 0,
                    in_response_to_id: 0,
                    cause: err.to_string(),
                });
            }
        };

        let parameter_types = parameter_types.iter().map(|s| s.to_string()).collect();
        let result = self
            .dispatcher
            .call_raw(&self.identifier, method, parameter_types, parameters)
            .await?;

        serde_json::from_value(result).map_err(|err| NetworkError::SerializationError {
            type_name: std::any::type_name::<R>().to_string(),
            message_id: 0,
            in_response_to_id: 0,
            cause: err.to_string(),
        })
    }
}

/// Per-connection cache of [`RemoteController`]s, keyed by identifier
/// string — the statically-typed equivalent of the proxy cache keyed by
/// interface type in the original (§3).
#[derive(Default)]
pub struct ProxyCache {
    entries: RwLock<HashMap<String, RemoteController>>,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        identifier: &str,
        dispatcher: &Arc<dyn RemoteCallDispatcher>,
    ) -> RemoteController {
        if let Some(existing) = self.entries.read().get(identifier) {
            return existing.clone();
        }
        self.entries
            .write()
            .entry(identifier.to_string())
            .or_insert_with(|| RemoteController::new(identifier, dispatcher.clone()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Controller for Echo {
        async fn dispatch(
            &self,
            method: &str,
            parameter_types: &[String],
            parameters: Vec<serde_json::Value>,
        ) -> Result<serde_json::Value, DispatchError> {
            if method == "Echo" && parameter_types == ["i32"] {
                Ok(parameters[0].clone())
            } else {
                Err(DispatchError::MethodNotFound)
            }
        }
    }

    #[test]
    fn instance_resolution_is_memoized() {
        let registry = ControllerRegistry::new();
        registry.use_instance("demo::Echo, demo", Arc::new(Echo));
        let peer: Arc<dyn Any + Send + Sync> = Arc::new(());
        let a = registry.resolve("demo::Echo, demo", &peer).unwrap();
        let b = registry.resolve("demo::Echo, demo", &peer).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_identifier_resolves_to_none() {
        let registry = ControllerRegistry::new();
        let peer: Arc<dyn Any + Send + Sync> = Arc::new(());
        assert!(registry.resolve("nope", &peer).is_none());
    }

    #[test]
    fn constructor_runs_once_per_connection() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let registry = ControllerRegistry::new();
        registry.use_constructor("demo::Echo, demo", || {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Arc::new(Echo)
        });
        let peer: Arc<dyn Any + Send + Sync> = Arc::new(());
        let _ = registry.resolve("demo::Echo, demo", &peer);
        let _ = registry.resolve("demo::Echo, demo", &peer);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
