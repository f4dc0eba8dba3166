mod api;
mod problem;
mod router;
mod service;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use tracing::info;
use task_board_storage::{Database, SqliteGateway};
use task_board_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect_with_timeout(&config.database_url, config.storage_timeout)
        .await?;
    database.run_migrations().await?;
    info!(stage = "app", "database ready");

    let gateway = SqliteGateway::new(database).with_call_timeout(config.storage_timeout);
    let service = service::TaskService::new(Arc::new(gateway));
    let state = router::AppState::new(metrics, service);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
