//! Command implementations for robjctl

pub mod bench;
pub mod call;
pub mod serve;

use clap::Args;
use remote_objects::{Connection, ConnectionBuilder, ConnectionConfig};
use tracing::debug;

use crate::error::CliError;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (`addr:port`, `addr` or `port`)
    #[arg(short, long, default_value = "0.0.0.0:4044")]
    pub listen: String,

    /// Initial entry of the served map (`key=value`, key becomes a symbol)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub entries: Vec<String>,

    /// Additional method to refuse to remote callers
    #[arg(long, value_name = "METHOD")]
    pub deny: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server endpoint (`host[:port]` or `unix:/path`)
    #[arg(short, long, env = "ROBJCTL_ENDPOINT", default_value = "localhost:4044")]
    pub endpoint: String,

    /// Ask for the result by reference
    #[arg(long)]
    pub by_ref: bool,

    /// Pass a block that prints every value yielded to it
    #[arg(long)]
    pub block: bool,

    /// Method to call on the remote root object
    pub method: String,

    /// Arguments: integers, floats, `:symbols`, `nil`, `true`/`false` or strings
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Server endpoint (`host[:port]` or `unix:/path`)
    #[arg(short, long, env = "ROBJCTL_ENDPOINT", default_value = "localhost:4044")]
    pub endpoint: String,

    /// Number of increments
    #[arg(short = 'n', long, default_value_t = 10_000)]
    pub iterations: u64,

    /// Counter key in the remote map
    #[arg(short, long, default_value = "counter")]
    pub key: String,

    /// Concurrent callers sharing the connection
    #[arg(short, long, default_value_t = 1)]
    pub threads: usize,
}

/// Open a client connection with the given settings.
fn connect(endpoint: &str, config: ConnectionConfig) -> Result<Connection, CliError> {
    debug!("Connecting to {endpoint}");
    Ok(ConnectionBuilder::new().config(config).connect(endpoint)?)
}

/// Close a client connection and wait for its reader to finish.
fn disconnect(conn: &Connection) {
    if let Err(e) = conn.close() {
        debug!("close failed: {e}");
    }
    conn.join();
}
