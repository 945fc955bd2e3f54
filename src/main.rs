//! rowpump - durable work-queue pipeline from a Postgres source to parallel
//! HTTP fan-out.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // rustls needs a process-wide default crypto provider installed before the
    // first TLS connection (the reqwest and tokio-postgres-rustls TLS stacks
    // both pull in rustls, so this must happen exactly once up front).
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = rowpump::config::log_filter(rowpump::cli::is_verbose());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    rowpump::cli::run().await
}
