//! Session configuration.

use crate::connection::Holdability;
use serde::{Deserialize, Serialize};

/// Default DRDA listener port.
pub const DEFAULT_PORT: u16 = 1527;

/// SSL mode requested from the network server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SslMode {
    /// Plain socket
    #[default]
    Off,
    /// Encrypted, server certificate not checked
    Basic,
    /// Encrypted, server certificate verified
    PeerAuthentication,
}

/// Configuration for one logical session.
///
/// Identity fields (`host` through `ssl_mode`) are fixed once a session is
/// built from the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    pub ssl_mode: SslMode,
    /// Login timeout in milliseconds (0 = wait forever)
    pub login_timeout_ms: u64,
    /// Holdability new statements inherit
    pub default_holdability: Holdability,
    /// Whether closing the session closes its open statements on the server
    pub close_statements_on_close: bool,
    /// Whether `close` may proceed while a unit of work is open
    pub allow_close_in_unit_of_work: bool,
    /// Session runs under an XA resource (global transactions possible)
    pub xa: bool,
    /// Server product level (`CSS` + `VVRRM`), normally learned at connect
    pub product_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            user: "APP".to_string(),
            password: None,
            database: String::new(),
            ssl_mode: SslMode::default(),
            login_timeout_ms: 0,
            default_holdability: Holdability::HoldCursorsOverCommit,
            close_statements_on_close: true,
            allow_close_in_unit_of_work: false,
            xa: false,
            product_level: "CSS10110".to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a config for the given database name.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    /// Parse a config from a JSON document; absent fields take defaults.
    #[allow(clippy::result_large_err)]
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user name.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set the login timeout.
    pub fn login_timeout(mut self, ms: u64) -> Self {
        self.login_timeout_ms = ms;
        self
    }

    pub fn default_holdability(mut self, holdability: Holdability) -> Self {
        self.default_holdability = holdability;
        self
    }

    pub fn close_statements_on_close(mut self, enabled: bool) -> Self {
        self.close_statements_on_close = enabled;
        self
    }

    pub fn allow_close_in_unit_of_work(mut self, enabled: bool) -> Self {
        self.allow_close_in_unit_of_work = enabled;
        self
    }

    /// Mark the session as running under an XA resource.
    pub fn xa(mut self, enabled: bool) -> Self {
        self.xa = enabled;
        self
    }

    /// Set the server product level string.
    pub fn product_level(mut self, level: impl Into<String>) -> Self {
        self.product_level = level.into();
        self
    }

    /// `host:port/database` as shown in logs.
    pub fn server_address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 1527);
        assert_eq!(config.ssl_mode, SslMode::Off);
        assert!(config.close_statements_on_close);
        assert!(!config.allow_close_in_unit_of_work);
        assert!(!config.xa);
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new("sample")
            .host("db.internal")
            .port(1600)
            .user("dba")
            .password("secret")
            .ssl_mode(SslMode::PeerAuthentication)
            .login_timeout(5000)
            .xa(true);

        assert_eq!(config.server_address(), "db.internal:1600/sample");
        assert_eq!(config.user, "dba");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.ssl_mode, SslMode::PeerAuthentication);
        assert_eq!(config.login_timeout_ms, 5000);
        assert!(config.xa);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = SessionConfig::from_json(
            r#"{"database": "toursdb", "ssl_mode": "Basic", "default_holdability": "CloseCursorsAtCommit"}"#,
        )
        .unwrap();
        assert_eq!(config.database, "toursdb");
        assert_eq!(config.ssl_mode, SslMode::Basic);
        assert_eq!(config.default_holdability, Holdability::CloseCursorsAtCommit);
        assert_eq!(config.port, DEFAULT_PORT);

        let err = SessionConfig::from_json("{not json").unwrap_err();
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_password_not_serialized() {
        let json = serde_json::to_string(&SessionConfig::new("db").password("pw")).unwrap();
        assert!(!json.contains("pw\""));
        assert!(!json.contains("password"));
    }
}
