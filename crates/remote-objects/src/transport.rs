//! Transport abstraction
//!
//! A transport is any reliable, ordered byte stream that can be split into
//! independently usable halves: the reader thread owns one clone, senders
//! share another under the connection's send lock, and a third is kept to
//! shut the stream down.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RpcError, RpcResult};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 4044;

/// Default server bind address.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Default client host.
pub const DEFAULT_HOST: &str = "localhost";

/// Byte stream a connection runs over.
pub trait Transport: Read + Write + Send + Sync + 'static {
    /// Independent handle to the same stream.
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>>;

    /// Shut both directions down, waking a blocked reader.
    fn shutdown(&self) -> io::Result<()>;

    /// Apply stream options before the connection starts.
    fn configure(&self) -> io::Result<()> {
        Ok(())
    }

    /// Human-readable peer description.
    fn description(&self) -> String;
}

impl Transport for TcpStream {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn configure(&self) -> io::Result<()> {
        self.set_nodelay(true)
    }

    fn description(&self) -> String {
        self.peer_addr()
            .map_or_else(|_| "tcp (unconnected)".to_string(), |addr| format!("tcp {addr}"))
    }
}

#[cfg(unix)]
impl Transport for UnixStream {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }

    fn description(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => match addr.as_pathname() {
                Some(path) => format!("unix {}", path.display()),
                None => "unix (unnamed)".to_string(),
            },
            Err(_) => "unix (unconnected)".to_string(),
        }
    }
}

/// Where to connect or listen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    /// TCP transport (cross-platform)
    Tcp {
        /// Host name or address
        address: String,
        /// Port number
        port: u16,
    },
    /// Unix Domain Socket (Unix only)
    #[cfg(unix)]
    UnixSocket {
        /// Socket file path
        socket_path: PathBuf,
    },
}

impl TransportType {
    /// TCP to `localhost` on the default port
    pub fn tcp() -> Self {
        TransportType::Tcp {
            address: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }

    /// TCP with custom address and port
    pub fn tcp_with_address(address: impl Into<String>, port: u16) -> Self {
        TransportType::Tcp {
            address: address.into(),
            port,
        }
    }

    /// Unix Domain Socket at `path`
    #[cfg(unix)]
    pub fn unix_socket(path: impl Into<PathBuf>) -> Self {
        TransportType::UnixSocket {
            socket_path: path.into(),
        }
    }

    /// Parse a client endpoint.
    ///
    /// Accepts `host`, `host:port`, `[v6addr]:port` and, on Unix,
    /// `unix:/path`. Empty parts fall back to `localhost` and the default
    /// port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not a number.
    pub fn parse_client(endpoint: &str) -> RpcResult<Self> {
        Self::parse(endpoint, DEFAULT_HOST, false)
    }

    /// Parse a server endpoint.
    ///
    /// Like [`TransportType::parse_client`], but a bare number is a port and
    /// the address defaults to all interfaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not a number.
    pub fn parse_server(endpoint: &str) -> RpcResult<Self> {
        Self::parse(endpoint, DEFAULT_ADDRESS, true)
    }

    fn parse(endpoint: &str, default_host: &str, bare_port: bool) -> RpcResult<Self> {
        let endpoint = endpoint.trim();

        #[cfg(unix)]
        if let Some(path) = endpoint.strip_prefix("unix:") {
            return Ok(Self::unix_socket(path));
        }

        if bare_port && !endpoint.is_empty() && endpoint.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Self::tcp_with_address(default_host, parse_port(endpoint)?));
        }

        let (host, port) = match endpoint.rsplit_once(':') {
            // a bare IPv6 address has more than one colon and no brackets
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                (host, parse_port(port)?)
            }
            _ => (endpoint, DEFAULT_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = if host.is_empty() { default_host } else { host };
        Ok(Self::tcp_with_address(host, port))
    }

    /// Open a client stream.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the peer cannot be reached.
    pub fn connect(&self) -> RpcResult<Box<dyn Transport>> {
        match self {
            TransportType::Tcp { address, port } => {
                let stream = TcpStream::connect((address.as_str(), *port)).map_err(|e| {
                    RpcError::connection(format!("cannot connect to {}: {e}", self.description()))
                })?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            TransportType::UnixSocket { socket_path } => {
                let stream = UnixStream::connect(socket_path).map_err(|e| {
                    RpcError::connection(format!("cannot connect to {}: {e}", self.description()))
                })?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Get a human-readable description of the transport
    pub fn description(&self) -> String {
        match self {
            TransportType::Tcp { address, port } => format!("TCP {address}:{port}"),
            #[cfg(unix)]
            TransportType::UnixSocket { socket_path } => {
                format!("Unix socket {}", socket_path.display())
            }
        }
    }
}

impl Default for TransportType {
    fn default() -> Self {
        Self::tcp()
    }
}

fn parse_port(port: &str) -> RpcResult<u16> {
    port.parse()
        .map_err(|e| RpcError::InvalidConfig(format!("invalid port '{port}': {e}")))
}
