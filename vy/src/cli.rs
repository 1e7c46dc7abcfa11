//! Command-line definition and flag parsing

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;

/// vy - iterative HTTP/WebSocket request runner
#[derive(Debug, Parser)]
#[command(
    name = "vy",
    about = "Run a templated request definition until a stop condition matches",
    version
)]
pub struct Cli {
    /// Path to the YAML request definition
    #[arg(value_name = "DEFINITION")]
    pub definition: PathBuf,

    /// Target host, exposed to templates as {{host}}
    #[arg(short = 'H', long, default_value = "localhost")]
    pub host: String,

    /// Auth token, exposed to templates as {{auth_token}}
    #[arg(short = 't', long, default_value = "")]
    pub auth_token: String,

    /// Page size used to derive {{result_offset}}
    #[arg(short = 'p', long, default_value_t = 0)]
    pub page_size: usize,

    /// Extra context data as KEY=VALUE; the value is parsed as JSON
    /// when it can be, and kept as a string otherwise (repeatable)
    #[arg(short = 'e', long = "extra", value_name = "KEY=VALUE")]
    pub extra: Vec<String>,

    /// Outbound HTTP proxy URL
    #[arg(short = 'x', long)]
    pub proxy: Option<String>,

    /// Disable TLS certificate verification
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// Iteration bound for the run
    #[arg(short = 'n', long, default_value_t = 50)]
    pub max_iterations: usize,

    /// Per-exchange timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Write each response body to <name>-<iteration>.txt under DIR
    /// instead of stdout
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Render the first request and print it without sending
    #[arg(long)]
    pub dry_run: bool,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// Parse repeated `-e KEY=VALUE` pairs into the context's extra bag
pub fn parse_extras(pairs: &[String]) -> Result<HashMap<String, Value>, String> {
    let mut extra = HashMap::new();
    for pair in pairs {
        let (key, value) = parse_extra_pair(pair)?;
        extra.insert(key, value);
    }
    Ok(extra)
}

/// Split one `KEY=VALUE` pair; the value becomes a typed JSON value
/// when it parses as one, a plain string otherwise
pub fn parse_extra_pair(pair: &str) -> Result<(String, Value), String> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{pair}'"))?;
    if key.is_empty() {
        return Err(format!("expected KEY=VALUE, got '{pair}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
