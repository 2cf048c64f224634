//! kubeprof
//!
//! Profiles a Kubernetes Job and collects the per-pod results.

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kubeprof_cli::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout only carries artifact paths
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    Cli::parse().run().await
}
