//! Connection and server configuration.

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{RpcError, RpcResult};
use crate::transport::{DEFAULT_ADDRESS, DEFAULT_PORT};
use crate::wire::SerializerKind;

/// Default number of idle workers kept per connection.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Default security level.
pub const DEFAULT_SECURITY_LEVEL: u8 = 3;

/// Per-connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Idle workers retained between inbound calls. Extra workers are
    /// spawned on demand and exit once idle.
    pub pool_size: usize,
    /// Opaque level handed to the application.
    pub security_level: u8,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Honor by-reference calls from the peer.
    pub ref_call_enabled: bool,
    /// Envelope serializer. Both peers must agree.
    pub serializer: SerializerKind,
    /// Prefix of the connection's thread names.
    pub thread_prefix: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            security_level: DEFAULT_SECURITY_LEVEL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            ref_call_enabled: false,
            serializer: SerializerKind::default(),
            thread_prefix: "robj".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> RpcResult<()> {
        if self.max_frame_size == 0 {
            return Err(RpcError::InvalidConfig(
                "max_frame_size must be greater than 0".to_string(),
            ));
        }
        if u32::try_from(self.max_frame_size).is_err() {
            return Err(RpcError::InvalidConfig(
                "max_frame_size must fit in a 32-bit length prefix".to_string(),
            ));
        }
        if self.thread_prefix.is_empty() {
            return Err(RpcError::InvalidConfig(
                "thread_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> RpcResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RpcError::InvalidConfig(format!("bad connection config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }
}

/// Builder for `ConnectionConfig`.
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the idle worker count.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the security level.
    #[must_use]
    pub fn security_level(mut self, level: u8) -> Self {
        self.config.security_level = level;
        self
    }

    /// Set the maximum frame payload.
    #[must_use]
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Enable or disable by-reference calls.
    #[must_use]
    pub fn ref_call_enabled(mut self, enabled: bool) -> Self {
        self.config.ref_call_enabled = enabled;
        self
    }

    /// Select the serializer.
    #[must_use]
    pub fn serializer(mut self, kind: SerializerKind) -> Self {
        self.config.serializer = kind;
        self
    }

    /// Set the thread name prefix.
    #[must_use]
    pub fn thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_prefix = prefix.into();
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> RpcResult<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings of a listening [`crate::server::Server`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub address: String,
    /// Bind port; 0 picks a free port
    pub port: u16,
    /// Settings applied to every accepted connection
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Listen on `address:port`.
    pub fn bind(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            connection: ConnectionConfig::default(),
        }
    }

    /// Use `connection` for accepted connections.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> RpcResult<()> {
        if self.address.is_empty() {
            return Err(RpcError::InvalidConfig(
                "address must not be empty".to_string(),
            ));
        }
        self.connection.validate()
    }
}
