//! Client and server configuration.

use serde::{Deserialize, Serialize};
use stomper_session::SessionConfig;

/// The protocol version this crate speaks.
pub const PROTOCOL_VERSION: &str = "1.2";

/// Settings for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sent as the CONNECT `login` header when set.
    pub login: Option<String>,
    /// Sent as the CONNECT `passcode` header when set.
    pub passcode: Option<String>,
    /// CONNECT `accept-version` header.
    pub accept_version: String,
    /// Ask for a RECEIPT on DISCONNECT and wait for it before closing.
    pub disconnect_receipt: bool,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            login: None,
            passcode: None,
            accept_version: PROTOCOL_VERSION.to_string(),
            disconnect_receipt: true,
            session: SessionConfig::default(),
        }
    }
}

/// Settings shared by every connection a server accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// CONNECTED `server` header.
    pub server_name: String,
    /// CONNECTED `version` header.
    pub version: String,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: concat!("stomper/", env!("CARGO_PKG_VERSION")).to_string(),
            version: PROTOCOL_VERSION.to_string(),
            session: SessionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.accept_version, "1.2");
        assert!(config.disconnect_receipt);
        assert!(config.login.is_none());
    }

    #[test]
    fn test_client_config_from_partial_json() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"login": "guest", "disconnect_receipt": false}"#).unwrap();
        assert_eq!(config.login.as_deref(), Some("guest"));
        assert!(!config.disconnect_receipt);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_server_config_names_the_crate() {
        let config = ServerConfig::default();
        assert!(config.server_name.starts_with("stomper/"));
        assert_eq!(config.version, PROTOCOL_VERSION);
    }
}
