//! Counter benchmark against a remote map

use std::thread;
use std::time::Instant;

use anyhow::{Result, anyhow};
use remote_objects::{Connection, ConnectionConfig, RpcResult, Value};
use tracing::info;

use crate::commands::{BenchArgs, connect, disconnect};
use crate::error::CliError;
use crate::output::{self, BenchReport};
use crate::values;

/// Split `total` calls over `threads` callers.
fn shares(total: u64, threads: usize) -> Vec<u64> {
    let threads = threads.max(1) as u64;
    let base = total / threads;
    let extra = total % threads;
    (0..threads).map(|i| base + u64::from(i < extra)).collect()
}

fn increment_n(conn: &Connection, key: &Value, n: u64) -> RpcResult<()> {
    for _ in 0..n {
        conn.call("increment", vec![key.clone()])?;
    }
    Ok(())
}

pub fn execute(args: &BenchArgs, config: ConnectionConfig, json: bool) -> Result<()> {
    if args.threads == 0 {
        return Err(CliError::InvalidArgument("threads must be at least 1".to_string()).into());
    }
    let conn = connect(&args.endpoint, config)?;
    let key = Value::sym(args.key.as_str());

    let result = run(&conn, &key, args);
    disconnect(&conn);
    let (elapsed, final_value) = result?;

    let elapsed_secs = elapsed.as_secs_f64();
    let report = BenchReport {
        endpoint: args.endpoint.clone(),
        key: args.key.clone(),
        iterations: args.iterations,
        threads: args.threads,
        elapsed_secs,
        calls_per_sec: if elapsed_secs > 0.0 {
            args.iterations as f64 / elapsed_secs
        } else {
            0.0
        },
        final_value: values::to_json(&final_value),
        stats: conn.stats(),
    };
    output::print_bench(&report, json);
    Ok(())
}

fn run(conn: &Connection, key: &Value, args: &BenchArgs) -> Result<(std::time::Duration, Value)> {
    // counter ||= 1
    if conn.call("[]", vec![key.clone()]).map_err(CliError::from)?.is_nil() {
        conn.call("[]=", vec![key.clone(), Value::Int(1)])
            .map_err(CliError::from)?;
    }

    info!(
        "Running {} increments of :{} on {} thread(s)",
        args.iterations, args.key, args.threads
    );
    let start = Instant::now();
    thread::scope(|s| {
        let handles: Vec<_> = shares(args.iterations, args.threads)
            .into_iter()
            .map(|n| s.spawn(move || increment_n(conn, key, n)))
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_panic| anyhow!("benchmark thread panicked"))?
                .map_err(CliError::from)?;
        }
        Ok::<_, anyhow::Error>(())
    })?;
    let elapsed = start.elapsed();

    let final_value = conn.call("[]", vec![key.clone()]).map_err(CliError::from)?;
    Ok((elapsed, final_value))
}
