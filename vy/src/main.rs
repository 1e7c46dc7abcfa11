//! vy - CLI entry point
//!
//! Loads a definition, seeds the run context from flags, and drives the
//! engine. Response bodies go to stdout or per-iteration files; logs go
//! to stderr so piped output stays clean.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use volley::cli::{self, Cli};
use volley::{Engine, EngineConfig, RequestDefinition, RunContext};

fn setup_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let definition = RequestDefinition::load_file(&cli.definition)
        .with_context(|| format!("Failed to load definition {}", cli.definition.display()))?;

    let name = if definition.name.is_empty() {
        cli.definition
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "response".to_string())
    } else {
        definition.name.clone()
    };

    let extra = cli::parse_extras(&cli.extra).map_err(|message| eyre!(message))?;
    let mut ctx = RunContext::new(&cli.host)
        .with_auth_token(&cli.auth_token)
        .with_page_size(cli.page_size)
        .with_extra(extra);

    let config = EngineConfig {
        max_iterations: cli.max_iterations,
        timeout: Duration::from_secs(cli.timeout),
        proxy: cli.proxy.clone(),
        insecure: cli.insecure,
    };
    let mut engine = Engine::new(definition, config).context("Failed to build engine")?;

    if cli.dry_run {
        let bound = engine
            .preview(&mut ctx)
            .context("Failed to render request")?;
        println!("{bound}");
        return Ok(());
    }

    if let Some(dir) = &cli.output {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let mut exchange = 0usize;
    let output_dir = cli.output.clone();
    let result = engine
        .run(&mut ctx, |body| {
            write_response(output_dir.as_deref(), &name, exchange, body);
            exchange += 1;
        })
        .await;

    if let Err(error) = &result {
        if error.is_exhaustion() {
            eprintln!(
                "{}",
                "No stop condition matched; responses received so far were still written.".yellow()
            );
        }
    }
    let report = result.context("Run failed")?;

    println!(
        "{} {} exchange(s) completed",
        "✓".green(),
        report.iterations.to_string().cyan()
    );
    Ok(())
}

/// Dispatch one response body to stdout or a per-iteration file
///
/// Sink failures are logged and swallowed; they never stop the run.
fn write_response(dir: Option<&Path>, name: &str, exchange: usize, body: &[u8]) {
    match dir {
        Some(dir) => {
            let path = dir.join(format!("{name}-{exchange}.txt"));
            if let Err(error) = fs::write(&path, body) {
                warn!(path = %path.display(), %error, "failed to write response file");
            }
        }
        None => {
            let mut stdout = std::io::stdout();
            if stdout.write_all(body).is_err() || stdout.write_all(b"\n").is_err() {
                warn!("failed to write response to stdout");
            }
        }
    }
}
