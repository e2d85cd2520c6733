//!
//! nexusfarma server binary
//! ------------------------
//! Command-line entry point for the NexusFarma access server. Configuration comes from
//! CLI flags and environment variables; see `--help`.

use anyhow::Result;
use std::env;

use nexusfarma::config::{has_flag, ServerConfig, USAGE};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber with env filter, defaulting to info
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let cfg = ServerConfig::from_args(&args)?;
    println!("nexusfarma starting on port {}", cfg.http_port);
    nexusfarma::server::run(cfg).await
}
