//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for the filter:
//! 1. `--verbose` flag (debug for this crate)
//! 2. `ENSEMBLE_LOG` environment variable (an `EnvFilter` directive)
//! 3. `info`

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "ENSEMBLE_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init(verbose: bool) -> Result<()> {
    let filter = resolve_filter(verbose, std::env::var(ENV_LOG).ok().as_deref())?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

fn resolve_filter(verbose: bool, env: Option<&str>) -> Result<EnvFilter> {
    if verbose {
        return Ok(EnvFilter::new("ensemble=debug,info"));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| anyhow::anyhow!("Invalid {} value '{}': {}", ENV_LOG, directive, e)),
        None => Ok(EnvFilter::new("info")),
    }
}
