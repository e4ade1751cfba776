//! Campus Portal - terminal chat client
//!
//! Reads commands from stdin and prints room traffic to stdout. Logs go to
//! stderr; set `RUST_LOG` to see them.

use campus_app::{terminal, AppPaths, Backend, FeedLinks, PortalConfig, Portal, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting Campus Portal");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run()) {
        tracing::error!("Campus Portal exited with an error: {}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let paths = AppPaths::new()?;
    let config = PortalConfig::load(paths.data_dir())?;

    let backend = Backend::open(&paths, &config)?;
    let links = FeedLinks::start(&config.feed, backend.hub()).await?;
    let backend = backend.with_upstream(links.upstream());

    let result = terminal::run(Portal::new(backend, paths, config)).await;
    links.shutdown().await;
    result
}
