//! The configuration surface recognized by [`crate::server::Server`] and
//! [`crate::client::Client`] (§6.4).

use std::sync::{Arc, OnceLock};

use crate::codepage::CodePage;
use crate::serializer::{JsonSerializer, Serializer};

/// `{ encoding, serializer, disconnect_clients_on_dispose, listening }`
/// from §6.4, with the same defaults: UTF-8, a JSON serializer, `true`,
/// `false`.
#[derive(Clone)]
pub struct NetworkConfig {
    pub encoding: CodePage,
    pub serializer: Arc<dyn Serializer>,
    pub disconnect_clients_on_dispose: bool,
    pub listening: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            encoding: CodePage::UTF8,
            serializer: Arc::new(JsonSerializer::new()),
            disconnect_clients_on_dispose: true,
            listening: false,
        }
    }
}

impl NetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(mut self, encoding: CodePage) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_disconnect_clients_on_dispose(mut self, value: bool) -> Self {
        self.disconnect_clients_on_dispose = value;
        self
    }

    pub fn with_listening(mut self, value: bool) -> Self {
        self.listening = value;
        self
    }

    /// Replaces the §9 "process-wide mutable default" with a slot that is
    /// immutable after first use: the first caller to ask for the shared
    /// default wins, eliminating the original's configuration race
    /// without forcing every caller to thread an explicit `NetworkConfig`
    /// through code that's happy with the defaults.
    pub fn shared_default() -> Arc<NetworkConfig> {
        static DEFAULT: OnceLock<Arc<NetworkConfig>> = OnceLock::new();
        DEFAULT
            .get_or_init(|| Arc::new(NetworkConfig::default()))
            .clone()
    }
}

impl std::fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("encoding", &self.encoding)
            .field("disconnect_clients_on_dispose", &self.disconnect_clients_on_dispose)
            .field("listening", &self.listening)
            .finish_non_exhaustive()
    }
}
