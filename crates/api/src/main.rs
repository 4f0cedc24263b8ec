use std::sync::Arc;

use anyhow::Context;

use gatehouse_api::app::{self, services};
use gatehouse_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gatehouse_observability::init();

    let config = AppConfig::from_env()?;
    let services = Arc::new(services::build_services(&config).await?);
    let _purge = services::spawn_token_purge(services.clone(), config.purge_interval);

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
