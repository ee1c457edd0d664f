//! Call a method on the remote root object

use anyhow::Result;
use remote_objects::{ConnectionConfig, RpcResult, Value};

use crate::commands::{CallArgs, connect, disconnect};
use crate::error::CliError;
use crate::output;
use crate::values;

pub fn execute(args: &CallArgs, config: ConnectionConfig, json: bool) -> Result<()> {
    let conn = connect(&args.endpoint, config)?;
    let call_args: Vec<Value> = args.args.iter().map(|a| values::parse_arg(a)).collect();

    let print_block = |yielded: Vec<Value>| -> RpcResult<Value> {
        output::print_yield(&yielded, json);
        Ok(Value::Nil)
    };

    let root = conn.root();
    let result = if args.by_ref {
        root.call_by_ref(&args.method, call_args)
    } else if args.block {
        root.call_with_block(&args.method, call_args, Some(&print_block))
    } else {
        root.call(&args.method, call_args)
    };

    let outcome = match result {
        Ok(value) => {
            output::print_value(&value, json);
            Ok(())
        }
        Err(e) => Err(CliError::from(e).into()),
    };
    disconnect(&conn);
    outcome
}
