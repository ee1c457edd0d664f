//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;

use remote_objects::{StatsSnapshot, Value};

use crate::values;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format error as JSON: {e}"),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn error_type_name(error: &Error) -> &'static str {
    use crate::error::CliError;

    match error.downcast_ref::<CliError>() {
        Some(CliError::NotFound(_)) => "not_found",
        Some(CliError::InvalidArgument(_)) => "invalid_argument",
        Some(CliError::ServiceUnavailable(_)) => "service_unavailable",
        Some(CliError::PermissionDenied(_)) => "permission_denied",
        Some(CliError::InvalidConfiguration(_)) => "invalid_configuration",
        Some(CliError::Remote(_)) => "remote_error",
        Some(CliError::IoError(_)) => "io_error",
        Some(CliError::JsonError(_)) => "json_error",
        None => "error",
    }
}

fn print_json(output: &serde_json::Value, what: &str) {
    match serde_json::to_string_pretty(output) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format {what} as JSON: {e}"),
    }
}

/// Print the result of a call
pub fn print_value(value: &Value, json: bool) {
    if json {
        print_json(
            &json!({
                "success": true,
                "result": values::to_json(value)
            }),
            "result",
        );
    } else {
        println!("{}", value.inspect());
    }
}

/// Print values yielded to the block of a call
pub fn print_yield(args: &[Value], json: bool) {
    if json {
        let args: Vec<_> = args.iter().map(values::to_json).collect();
        match serde_json::to_string(&json!({ "yield": args })) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Failed to format yield as JSON: {e}"),
        }
    } else {
        let inner: Vec<String> = args.iter().map(Value::inspect).collect();
        println!("{} {}", "yield".dimmed(), inner.join(", "));
    }
}

/// Print the bound address of a running server
pub fn print_listening(addr: SocketAddr, json: bool) {
    if json {
        match serde_json::to_string(&json!({ "listening": addr.to_string() })) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Failed to format address as JSON: {e}"),
        }
    } else {
        println!("{} {}", "Listening on".green().bold(), addr);
    }
}

/// Result of a benchmark run
#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub endpoint: String,
    pub key: String,
    pub iterations: u64,
    pub threads: usize,
    pub elapsed_secs: f64,
    pub calls_per_sec: f64,
    pub final_value: serde_json::Value,
    pub stats: StatsSnapshot,
}

/// Print benchmark results
pub fn print_bench(report: &BenchReport, json: bool) {
    if json {
        match serde_json::to_value(report) {
            Ok(report) => print_json(&json!({ "success": true, "bench": report }), "benchmark"),
            Err(e) => eprintln!("Failed to format benchmark as JSON: {e}"),
        }
    } else {
        println!("{} {}", "Benchmark:".bold(), report.endpoint);
        println!("  Key: :{}", report.key);
        println!(
            "  Calls: {} on {} thread(s)",
            report.iterations, report.threads
        );
        println!("  Elapsed: {:.3} s", report.elapsed_secs);
        println!("  Throughput: {:.0} calls/s", report.calls_per_sec);
        println!("  Final value: {}", report.final_value);
        println!(
            "  Frames: {} sent, {} received",
            report.stats.frames_sent, report.stats.frames_received
        );
    }
}
