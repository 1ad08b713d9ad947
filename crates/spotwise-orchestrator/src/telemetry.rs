//! Tracing setup for binaries embedding the orchestrator

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_DIRECTIVE: &str = "spotwise=info,info";

/// Install the global subscriber: `RUST_LOG` filter (else `default_directive`) plus fmt output.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("global tracing subscriber already installed")
}
