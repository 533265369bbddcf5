//! 主应用程序入口
//!
//! 加载配置，选择存储后端，启动 Axum HTTP + WebSocket 服务。

use std::sync::Arc;

use anyhow::Context;
use application::MemoryStore;
use axum::http::HeaderValue;
use config::{AppConfig, ServerConfig, StorageBackend};
use infrastructure::{Infrastructure, InfrastructureConfig};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService, Repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    // RUST_LOG 优先，否则使用配置中的级别
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(config = %config.sanitize(), "configuration loaded");

    let repositories = build_repositories(&config).await?;
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(repositories, jwt_service, &config.messaging);

    let app = router(state)
        .layer(cors_layer(&config.server))
        .layer(TraceLayer::new_for_http());

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("marketplace chat listening on http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn build_repositories(config: &AppConfig) -> anyhow::Result<Repositories> {
    match config.database.backend {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage, data is lost on restart");
            let store = MemoryStore::new();
            Ok(Repositories {
                conversations: Arc::new(store.clone()),
                messages: Arc::new(store.clone()),
                users: Arc::new(store),
            })
        }
        StorageBackend::Postgres => {
            let infrastructure = Infrastructure::connect(InfrastructureConfig {
                database_url: config.database.url.clone(),
                max_connections: config.database.max_connections,
                run_migrations: config.database.run_migrations,
            })
            .await
            .context("failed to initialise postgres storage")?;
            tracing::info!("connected to postgres");

            Ok(Repositories {
                conversations: infrastructure.conversation_repository(),
                messages: infrastructure.message_repository(),
                users: infrastructure.user_repository(),
            })
        }
    }
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    if server.cors_origins.is_empty() || server.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::permissive().allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
