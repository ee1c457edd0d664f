//! TCP server exporting one root object to every client.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionBuilder};
use crate::error::{RpcError, RpcResult};
use crate::security::{DenyList, SecurityPolicy};
use crate::value::RemoteObject;

/// Server state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting connections
    Running,
    /// Shutting down or stopped
    Stopped,
}

struct ServerShared {
    config: ServerConfig,
    root: Arc<dyn RemoteObject>,
    policy: Arc<dyn SecurityPolicy>,
    connections: Mutex<Vec<Connection>>,
    stopping: AtomicBool,
}

/// Accepts connections and serves the same root object on each.
pub struct Server {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind and start accepting with the default deny list.
    ///
    /// # Errors
    ///
    /// Fails if the root object would be passed by value, the configuration
    /// is invalid or the address cannot be bound.
    pub fn bind(config: ServerConfig, root: Arc<dyn RemoteObject>) -> RpcResult<Self> {
        Self::bind_with_policy(config, root, Arc::new(DenyList::default()))
    }

    /// Bind and start accepting, checking inbound calls against `policy`.
    ///
    /// # Errors
    ///
    /// See [`Server::bind`].
    pub fn bind_with_policy(
        config: ServerConfig,
        root: Arc<dyn RemoteObject>,
        policy: Arc<dyn SecurityPolicy>,
    ) -> RpcResult<Self> {
        config.validate()?;
        if root.by_value().is_some() {
            return Err(RpcError::InvalidConfig(format!(
                "root object {} must be sent by reference",
                root.describe()
            )));
        }

        let listener = TcpListener::bind((config.address.as_str(), config.port)).map_err(|e| {
            RpcError::connection(format!("cannot bind {}:{}: {e}", config.address, config.port))
        })?;
        let local_addr = listener.local_addr()?;
        let prefix = config.connection.thread_prefix.clone();

        let shared = Arc::new(ServerShared {
            config,
            root,
            policy,
            connections: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
        });

        let accept = thread::Builder::new()
            .name(format!("{prefix}-accept"))
            .spawn({
                let shared = Arc::clone(&shared);
                move || accept_loop(&shared, &listener)
            })?;

        info!("Listening on {local_addr}");
        Ok(Self {
            shared,
            local_addr,
            accept: Mutex::new(Some(accept)),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        if self.shared.stopping.load(Ordering::Acquire) {
            ServerState::Stopped
        } else {
            ServerState::Running
        }
    }

    /// Open connections, with ended ones pruned.
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections = self.shared.connections.lock();
        connections.retain(|c| !c.is_closed());
        connections.clone()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping server on {}", self.local_addr);

        // wake the accept loop
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(if wake.is_ipv4() {
                std::net::Ipv4Addr::LOCALHOST.into()
            } else {
                std::net::Ipv6Addr::LOCALHOST.into()
            });
        }
        if let Err(e) = TcpStream::connect(wake) {
            debug!("wake-up connect failed: {e}");
        }

        let connections = std::mem::take(&mut *self.shared.connections.lock());
        for conn in connections {
            if let Err(e) = conn.close() {
                debug!(connection = conn.serial(), "close failed: {e}");
            }
        }
    }

    /// Block until the accept loop ends.
    pub fn join(&self) {
        let handle = self.accept.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("accept thread panicked");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(shared: &ServerShared, listener: &TcpListener) {
    for stream in listener.incoming() {
        if shared.stopping.load(Ordering::Acquire) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        let opened = ConnectionBuilder::new()
            .config(shared.config.connection.clone())
            .root(Arc::clone(&shared.root))
            .shared_policy(Arc::clone(&shared.policy))
            .open(stream);
        match opened {
            Ok(conn) => {
                debug!(connection = conn.serial(), peer = conn.peer(), "accepted");
                let mut connections = shared.connections.lock();
                // shutdown flips the flag before it takes the list
                if shared.stopping.load(Ordering::Acquire) {
                    drop(connections);
                    if let Err(e) = conn.close() {
                        debug!(connection = conn.serial(), "close failed: {e}");
                    }
                    break;
                }
                connections.retain(|c| !c.is_closed());
                connections.push(conn);
            }
            Err(e) => warn!("could not open connection: {e}"),
        }
    }
    debug!("accept loop finished");
}
