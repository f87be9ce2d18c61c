//! Application entrypoint and state wiring.

use campaign_ledger::{build_state, log_filter, routes, LedgerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt().with_env_filter(log_filter(rust_log.as_deref())).init();

    // 1) config
    let config = LedgerConfig::load()?;
    info!(
        content_store = ?config.content_store.kind,
        index_store = ?config.index_store.kind,
        journal = ?config.chain.data_dir,
        "configuration loaded",
    );

    // 2) stores, chain, query engine
    let state = build_state(&config)?;
    state.ledger.verify()?;
    info!(blocks = state.ledger.chain_len(), "chain verified");

    if let Some(interval) = config.chain.verify_interval {
        state.ledger.spawn_periodic_verification(interval);
    }

    // 3) router
    let app = routes::router(state);

    // 4) serve
    let addr = config.server.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
