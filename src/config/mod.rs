//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `netconf` binary)
//!
//! # Default capabilities
//!
//! The capability list a session advertises comes from its [`SessionConfig`].
//! When none is given, the process-wide default set by
//! [`set_default_capabilities`] is used. That default is a deliberate global:
//! set it once during startup, before any session is constructed. Sessions
//! snapshot it at construction time, so later writes never affect sessions
//! that already exist.

use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};
use crate::protocol::framer::DEFAULT_MAX_MESSAGE_SIZE;
use crate::protocol::{CapabilitySet, WithDefaultsMode};

lazy_static! {
    static ref DEFAULT_CAPABILITIES: RwLock<CapabilitySet> =
        RwLock::new(CapabilitySet::engine_defaults());
}

/// Replace the process-wide default capability list.
pub fn set_default_capabilities(capabilities: CapabilitySet) {
    let mut guard = DEFAULT_CAPABILITIES
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    tracing::debug!(count = capabilities.len(), "default capabilities replaced");
    *guard = capabilities;
}

/// Snapshot of the process-wide default capability list.
pub fn default_capabilities() -> CapabilitySet {
    DEFAULT_CAPABILITIES
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
}

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session configuration
    #[serde(default)]
    pub session: SessionSettings,

    /// Server configuration
    #[serde(default)]
    pub server: ServerSettings,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| NetconfError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| NetconfError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(caps) = std::env::var("NETCONF_CAPABILITIES") {
            config.session.capabilities = parse_capability_list(&caps);
        }
        if let Ok(val) = std::env::var("NETCONF_RPC_TIMEOUT") {
            if let Ok(val) = val.parse() {
                config.session.rpc_timeout_secs = val;
            }
        }
        if let Ok(val) = std::env::var("NETCONF_HELLO_TIMEOUT") {
            if let Ok(val) = val.parse() {
                config.session.hello_timeout_secs = val;
            }
        }
        if let Ok(val) = std::env::var("NETCONF_MAX_MESSAGE_SIZE") {
            if let Ok(val) = val.parse() {
                config.session.max_message_size = val;
            }
        }

        config
    }

    /// Default config file location (`~/.config/netconf/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("netconf").join("config.toml"))
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let defaults = SessionSettings::default();
        let pick = |mine: u64, theirs: u64, default: u64| if theirs == default { mine } else { theirs };

        Self {
            session: SessionSettings {
                capabilities: if other.session.capabilities.is_empty() {
                    self.session.capabilities
                } else {
                    other.session.capabilities
                },
                rpc_timeout_secs: pick(
                    self.session.rpc_timeout_secs,
                    other.session.rpc_timeout_secs,
                    defaults.rpc_timeout_secs,
                ),
                hello_timeout_secs: pick(
                    self.session.hello_timeout_secs,
                    other.session.hello_timeout_secs,
                    defaults.hello_timeout_secs,
                ),
                max_message_size: if other.session.max_message_size == defaults.max_message_size {
                    self.session.max_message_size
                } else {
                    other.session.max_message_size
                },
            },
            server: {
                let server_defaults = ServerSettings::default();
                ServerSettings {
                    host: if other.server.host == server_defaults.host {
                        self.server.host
                    } else {
                        other.server.host
                    },
                    port: if other.server.port == server_defaults.port {
                        self.server.port
                    } else {
                        other.server.port
                    },
                    with_defaults: other.server.with_defaults.or(self.server.with_defaults),
                    also_supported: other.server.also_supported.or(self.server.also_supported),
                }
            },
        }
    }

    /// Immutable session parameters derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        let capabilities = if self.session.capabilities.is_empty() {
            default_capabilities()
        } else {
            self.session.capabilities.iter().map(String::as_str).collect()
        };
        SessionConfig {
            capabilities,
            rpc_timeout: Duration::from_secs(self.session.rpc_timeout_secs),
            hello_timeout: Duration::from_secs(self.session.hello_timeout_secs),
            max_message_size: self.session.max_message_size,
        }
    }
}

fn parse_capability_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `[session]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Advertised capability URIs; empty means the process default
    pub capabilities: Vec<String>,

    /// Seconds to wait for each rpc-reply
    pub rpc_timeout_secs: u64,

    /// Seconds to wait for the peer's hello
    pub hello_timeout_secs: u64,

    /// Largest accepted inbound message in bytes
    pub max_message_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            rpc_timeout_secs: 30,
            hello_timeout_secs: 60,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind the development TCP listener to
    pub host: String,

    /// Port of the development TCP listener
    pub port: u16,

    /// with-defaults basic mode applied when a request carries none
    pub with_defaults: Option<WithDefaultsMode>,

    /// with-defaults modes accepted besides the basic mode (default: all)
    pub also_supported: Option<Vec<WithDefaultsMode>>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8300,
            with_defaults: None,
            also_supported: None,
        }
    }
}

impl ServerSettings {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parameters fixed at session construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Capabilities advertised in our hello
    pub capabilities: CapabilitySet,
    /// Reply timeout for client operations
    pub rpc_timeout: Duration,
    /// Timeout for the hello exchange
    pub hello_timeout: Duration,
    /// Largest accepted inbound message
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session_config()
    }
}

impl SessionConfig {
    /// Advertise `capabilities` instead of the process default.
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the reply timeout.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the hello timeout.
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::uri;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.rpc_timeout_secs, 30);
        assert_eq!(config.server.listen_addr(), "127.0.0.1:8300");
        assert!(config.server.with_defaults.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [session]
            capabilities = [
                "urn:ietf:params:netconf:base:1.0",
                "urn:ietf:params:netconf:capability:startup:1.0",
            ]
            rpc_timeout_secs = 5

            [server]
            port = 9830
            with_defaults = "report-all"
            also_supported = ["trim"]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9830);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.with_defaults, Some(WithDefaultsMode::ReportAll));
        assert_eq!(config.server.also_supported, Some(vec![WithDefaultsMode::Trim]));

        let session = config.session_config();
        assert_eq!(session.rpc_timeout, Duration::from_secs(5));
        assert_eq!(session.hello_timeout, Duration::from_secs(60));
        assert!(session.capabilities.contains(uri::STARTUP));
        assert!(!session.capabilities.contains(uri::BASE_1_1));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nhello_timeout_secs = 3").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.session.hello_timeout_secs, 3);
    }

    #[test]
    fn test_config_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NetconfError::Config(_)));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session\nrpc_timeout_secs = ").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(NetconfError::Config(_))
        ));
    }

    #[test]
    fn test_capability_list_parsing() {
        assert_eq!(
            parse_capability_list(" a , b,,c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_merge_prefers_non_default_values() {
        let base: Config = toml::from_str("[session]\nrpc_timeout_secs = 10").unwrap();
        let overlay: Config = toml::from_str("[session]\nhello_timeout_secs = 2").unwrap();
        let merged = base.merge(overlay);
        assert_eq!(merged.session.rpc_timeout_secs, 10);
        assert_eq!(merged.session.hello_timeout_secs, 2);
    }

    #[test]
    fn test_merge_keeps_file_listener_over_defaults() {
        let file: Config = toml::from_str("[server]\nhost = \"0.0.0.0\"\nport = 9000").unwrap();
        let merged = file.merge(Config::default());
        assert_eq!(merged.server.listen_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_empty_capabilities_use_process_default() {
        let session = Config::default().session_config();
        assert!(session.capabilities.contains(uri::BASE_1_0));
    }
}
