//! Tilawa HTTP server

use std::sync::Arc;
use tilawa_lib::{router, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tilawa=info,tilawa_lib=info,tower_http=info")),
        )
        .init();

    let config = Config::load();
    let bind = config.bind;

    // Corpus loading and the password migration are blocking file/database work
    let state = tokio::task::spawn_blocking(move || AppState::new(config)).await??;
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}
