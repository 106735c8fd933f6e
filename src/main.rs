use rxindexer::api::{build_router, ApiState};
use rxindexer::cache::CacheManager;
use rxindexer::config::{get_global_config, init_global_config, AppConfig};
use rxindexer::metrics;
use rxindexer::node_client::{RpcClient, RpcClientConfig};
use rxindexer::projection::{init_global_refresher, refresh_balance_projection};
use rxindexer::query::QueryService;
use rxindexer::storage::StorageEngine;
use rxindexer::sync::{SyncCoordinator, SyncPhase};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

async fn run_sync_loop(coordinator: Arc<SyncCoordinator<RpcClient>>) {
    loop {
        match coordinator.run_once().await {
            Ok(0) => {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(committed) => {
                info!(committed, "sync batch committed");
            }
            Err(e) => {
                error!(error = %e, "sync iteration failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }

        if matches!(coordinator.phase().await, SyncPhase::Error(_)) {
            warn!("coordinator entered error phase, backing off");
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }
}

async fn start_http_server(bind: String, state: ApiState) {
    let app = build_router(state);
    let addr: SocketAddr = bind.parse().expect("invalid http_bind address");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind http listener");
    info!(%addr, "http server listening");
    axum::serve(listener, app).await.expect("http server failed");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    init_global_config()?;
    let raw_config = get_global_config();
    let config = AppConfig::from_config(raw_config)?;

    metrics::init_metrics()?;
    init_global_refresher(config.refresh_min_interval_secs);

    let storage = Arc::new(StorageEngine::open(&config.db_path)?);

    let node = Arc::new(RpcClient::new(RpcClientConfig {
        url: config.rpc_url.clone(),
        user: config.rpc_user.clone(),
        password: config.rpc_password.clone(),
        timeout: Duration::from_secs(config.rpc_timeout_secs),
        rate_limit_rps: config.rpc_rate_limit_rps,
        circuit_failure_threshold: config.circuit_failure_threshold,
        circuit_reset_timeout: Duration::from_secs(config.circuit_reset_timeout_secs),
        max_retries: 5,
    }));

    let coordinator = Arc::new(SyncCoordinator::new(
        node,
        storage.clone(),
        config.reorg_limit,
        config.checkpoint_interval,
    ));

    let query = Arc::new(QueryService::new(storage.clone()));
    let cache = Arc::new(CacheManager::new());
    let api_state = ApiState { query, storage: storage.clone(), cache };

    let sync_handle = tokio::spawn(run_sync_loop(coordinator));
    let http_handle = tokio::spawn(start_http_server(config.http_bind.clone(), api_state));

    // First projection refresh runs immediately so the holder table isn't
    // empty while the initial sync catches up.
    if let Err(e) = refresh_balance_projection(&storage, false).await {
        warn!(error = %e, "initial projection refresh failed");
    }

    tokio::select! {
        res = sync_handle => {
            if let Err(e) = res {
                error!(error = %e, "sync task panicked");
            }
        }
        res = http_handle => {
            if let Err(e) = res {
                error!(error = %e, "http task panicked");
            }
        }
    }

    Ok(())
}
