//! Serve a shared map as root object

use std::sync::Arc;

use anyhow::Result;
use remote_objects::objects::SharedMap;
use remote_objects::security::DenyList;
use remote_objects::{ConnectionConfig, Server, ServerConfig, TransportType, Value};
use tracing::info;

use crate::commands::ServeArgs;
use crate::error::CliError;
use crate::output;
use crate::values;

/// Parse `key=value` into a symbol key and a parsed value.
fn parse_entry(raw: &str) -> Result<(Value, Value), CliError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((Value::sym(key), values::parse_arg(value))),
        _ => Err(CliError::InvalidArgument(format!(
            "expected KEY=VALUE, got '{raw}'"
        ))),
    }
}

pub fn execute(args: &ServeArgs, config: ConnectionConfig, json: bool) -> Result<()> {
    let (address, port) = match TransportType::parse_server(&args.listen).map_err(CliError::from)? {
        TransportType::Tcp { address, port } => (address, port),
        #[cfg(unix)]
        TransportType::UnixSocket { socket_path } => {
            return Err(CliError::InvalidArgument(format!(
                "cannot listen on {}: only TCP listeners are supported",
                socket_path.display()
            ))
            .into());
        }
    };

    let entries = args
        .entries
        .iter()
        .map(|raw| parse_entry(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let policy = args
        .deny
        .iter()
        .fold(DenyList::default(), |policy, method| policy.deny(method.as_str()));
    info!(
        "Serving a map with {} entries, denying {:?}",
        entries.len(),
        policy.denied().collect::<Vec<_>>()
    );

    let server = Server::bind_with_policy(
        ServerConfig::bind(address, port).with_connection(config),
        Arc::new(SharedMap::with_entries(entries)),
        Arc::new(policy),
    )
    .map_err(CliError::from)?;

    output::print_listening(server.local_addr(), json);
    server.join();
    Ok(())
}
