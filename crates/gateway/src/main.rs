//! gateway: the Tool Gateway process (§4.2 OAuth, §4.9/§4.10 MCP tool
//! surface, C9/C10/C11/C1/C2 combined). Always serves HTTP — this is a
//! multi-tenant server, not a single-client stdio tool.

mod auth;
mod context;
mod middleware;
mod server;
mod state;
mod sync_tools;
mod vault_tools;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use rmcp::transport::streamable_http_server::{session::local::LocalSessionManager, StreamableHttpService};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use git_sync::runner::SystemGitRunner;
use git_sync::GitSync;
use rag_client::{RagClient, ReqwestRagClient};
use server::GatewayServer;
use state::AppState;
use vault_data::{Config, GitCredStore, HashIndex, SyncConfigStore, UserLockRegistry, UserStore};
use vector_query::{PgVectorSearch, VectorSearch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("failed to load configuration from environment")?;
    tracing::info!(
        port = config.port,
        storage_root = %config.storage_root.display(),
        "gateway starting"
    );

    let rag: Arc<dyn RagClient> = Arc::new(ReqwestRagClient::new(
        config.rag_api_url.clone(),
        config.rag_api_jwt_secret.clone(),
    ));
    let vector_db: Arc<dyn VectorSearch> = Arc::new(
        PgVectorSearch::connect(&config.vectordb.connection_string())
            .await
            .context("failed to connect to the vector database")?,
    );
    let hash_index = Arc::new(HashIndex::new(config.storage_root.clone()));
    let git_creds = Arc::new(GitCredStore::new(config.storage_root.clone()));
    let sync_configs = Arc::new(SyncConfigStore::new(config.storage_root.clone()));
    let locks = Arc::new(UserLockRegistry::new());
    let users = Arc::new(UserStore::new());
    let runner: Arc<dyn git_sync::runner::GitRunner> = Arc::new(SystemGitRunner);
    let git_sync = Arc::new(GitSync::new(
        runner,
        rag.clone(),
        hash_index.clone(),
        git_creds.clone(),
        config.max_files_per_cycle,
        Duration::from_secs_f64(config.index_delay_secs),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        users,
        sync_configs,
        git_creds,
        hash_index,
        locks,
        rag,
        vector_db,
        git_sync,
    };

    let mcp_service = StreamableHttpService::new(
        {
            let state = state.clone();
            move || Ok(GatewayServer::new(state.clone()))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let mcp_router = Router::new()
        .nest_service("/mcp", mcp_service)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth));

    let router = Router::new()
        .route("/health", get(health))
        .route("/authorize", get(auth::authorize_get).post(auth::authorize_post))
        .route("/token", post(auth::token))
        .merge(mcp_router)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!(addr, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")?;

    tracing::info!("gateway shut down cleanly");
    Ok(())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "healthy", "service": "obsidian-sync-mcp"}))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
