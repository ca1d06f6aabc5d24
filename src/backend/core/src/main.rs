//! Gatekeeper Server - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use gatekeeper_core::{
    api,
    cache::{CacheBackend, IdentityCache, InMemoryBackend, ProfileCache, RedisBackend},
    config::{CacheBackendKind, Config},
    events::{EventContextLoader, EventStore, InMemoryEventStore, PostgresEventStore},
    identity::IdentityServiceClient,
    pipeline::AuthPipeline,
    telemetry::{self, MetricsHandle},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match std::env::var("GATEKEEPER_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.log_format,
        &config.identity_service.token_header,
    )?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Gatekeeper Server");

    if let Some(port) = config.observability.metrics_port {
        let handle = telemetry::init_metrics()?;
        serve_metrics(handle, port).await?;
    }

    let client = Arc::new(IdentityServiceClient::new(&config.identity_service)?);
    tracing::info!(base_url = %client.base_url(), "Identity service client ready");

    let store: Arc<dyn EventStore> = match &config.database.url {
        Some(_) => {
            let store = PostgresEventStore::connect(&config.database).await?;
            tracing::info!("Connected to event database");
            Arc::new(store)
        }
        None => {
            tracing::warn!("database.url is not set, using an empty in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let mut builder = AuthPipeline::builder(client.clone(), client, EventContextLoader::new(store))
        .roles(config.roles.clone());

    if config.cache.enabled {
        let backend = cache_backend(&config).await?;
        builder = builder.identity_cache(IdentityCache::new(backend.clone(), &config.cache.key_prefix));
        if config.cache.cache_profiles {
            builder = builder.profile_cache(ProfileCache::new(backend, &config.cache.key_prefix));
        }
    } else {
        tracing::info!("Identity caching disabled");
    }

    let app = api::build_router(builder.build());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn cache_backend(config: &Config) -> anyhow::Result<Arc<dyn CacheBackend>> {
    let cache = &config.cache;
    let backend: Arc<dyn CacheBackend> = match cache.backend {
        CacheBackendKind::Memory => {
            let memory = Arc::new(InMemoryBackend::new(cache.ttl, cache.max_entries));
            memory.clone().spawn_sweeper(cache.sweep_interval);
            memory
        }
        CacheBackendKind::Redis => {
            Arc::new(RedisBackend::connect(&cache.redis_url, cache.key_prefix.clone(), cache.ttl).await?)
        }
    };

    tracing::info!(backend = backend.name(), ttl = ?cache.ttl, "Identity cache ready");
    Ok(backend)
}

/// Serve `/metrics` on its own port.
async fn serve_metrics(handle: MetricsHandle, port: u16) -> anyhow::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    tracing::info!(port, "Prometheus exporter listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Metrics server stopped");
        }
    });
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
