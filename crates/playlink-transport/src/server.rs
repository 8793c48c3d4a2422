//! Signaling server configuration.

use serde::{Deserialize, Serialize};

/// One candidate signaling server. A host is configured with an ordered
/// list of these and tries them in turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingServer {
    /// Label used in logs.
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_secure")]
    pub secure: bool,
}

fn default_path() -> String {
    "/".to_owned()
}

fn default_secure() -> bool {
    true
}

impl SignalingServer {
    /// A TLS server on the default path.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            path: default_path(),
            secure: true,
        }
    }

    /// A plaintext server, mostly useful for local relays in tests.
    pub fn insecure(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            secure: false,
            ..Self::new(name, host, port)
        }
    }

    /// WebSocket URL for this server.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }

    /// The public relay used when nothing else is configured.
    pub fn public_default() -> Vec<Self> {
        vec![Self::new("public", "0.peerjs.com", 443)]
    }
}
