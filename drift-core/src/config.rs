//! Session configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything needed to open and negotiate one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Proxy address (`host:port`).
    pub address: String,
    /// Remote protocol requested with `select`, e.g. `vnc` or `rdp`.
    pub protocol: String,
    /// TCP dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Interval between `nop` keepalives in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Connection parameters answered during the handshake, by name.
    pub parameters: BTreeMap<String, String>,
    /// Client capabilities advertised during the handshake.
    pub handshake: HandshakeOptions,
}

/// Display size and media capabilities sent before `connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeOptions {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    /// Supported audio mimetypes.
    pub audio: Vec<String>,
    /// Supported video mimetypes.
    pub video: Vec<String>,
    /// Supported image mimetypes.
    pub image: Vec<String>,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4822".into(),
            protocol: "vnc".into(),
            connect_timeout_ms: 5000,
            keepalive_interval_ms: 5000,
            parameters: BTreeMap::new(),
            handshake: HandshakeOptions::default(),
        }
    }
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            dpi: 96,
            audio: Vec::new(),
            video: Vec::new(),
            image: Vec::new(),
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────

impl SessionConfig {
    pub fn new(address: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            protocol: protocol.into(),
            ..Self::default()
        }
    }

    /// Builder-style parameter insert.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Value answered for a parameter the server asked for. Unknown
    /// protocol version names are echoed so the client speaks whatever
    /// version the server offers.
    pub fn parameter_value(&self, name: &str) -> String {
        match self.parameters.get(name) {
            Some(value) => value.clone(),
            None if name.starts_with("VERSION_") => name.to_string(),
            None => String::new(),
        }
    }
}
