//! Main daemon command: loads configuration, wires every component, and
//! serves the HTTP gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{info, warn};

use inferno_daemon::auth::AuthGate;
use inferno_daemon::command::CommandExecutor;
use inferno_daemon::config::Configuration;
use inferno_daemon::dispatch::InferenceDispatcher;
use inferno_daemon::engine::{EngineCatalog, EngineProvider};
use inferno_daemon::events::{EventBus, EventPublisher, PersistentEventBus, SqliteEventStore};
use inferno_daemon::ratelimit::RateLimiter;
use inferno_daemon::router::{self, AppState};
use inferno_daemon::runtime::{DockerRuntimeAdapter, RuntimeAdapter};
use inferno_daemon::service::{ServiceProvider, ServiceStore, SqliteServiceStore};

/// Run the main daemon.
pub async fn run(config_path: &str) -> Result<()> {
    info!("Loading configuration from: {}", config_path);
    let config = Configuration::load(config_path)?;
    let config = Arc::new(config);

    info!("Configuration loaded successfully");
    info!("  Ingress: {}:{}", config.ingress.host, config.ingress.port);
    info!("  Data directory: {}", config.system.data_directory.display());

    let data_dir = &config.system.data_directory;

    let service_store: Arc<dyn ServiceStore> = Arc::new(SqliteServiceStore::open(
        data_dir.join("services.sqlite3").to_string_lossy().as_ref(),
    )?);

    let bus = EventBus::with_config(config.events.buffer_size, config.events.worker_count);
    let event_publisher: Arc<dyn EventPublisher> = if config.events.persistent {
        let event_store = SqliteEventStore::open(
            data_dir.join("events.sqlite3").to_string_lossy().as_ref(),
        )?;
        PersistentEventBus::with_bus(
            bus.clone(),
            event_store,
            config.events.batch_size,
            config.events.flush_period_ms,
        )
    } else {
        Arc::new(bus.clone())
    };

    let runtime_adapter: Option<Arc<dyn RuntimeAdapter>> =
        match DockerRuntimeAdapter::connect(&config.runtime.socket) {
            Ok(adapter) => Some(Arc::new(adapter)),
            Err(e) => {
                warn!("container runtime unavailable, engines will only run natively: {}", e);
                None
            }
        };

    let catalog = if config.catalog.path.is_empty() {
        EngineCatalog::default()
    } else {
        EngineCatalog::load(std::path::Path::new(&config.catalog.path))?
    };

    let engine_provider = Arc::new(EngineProvider::new(runtime_adapter, catalog, bus.clone()));
    let service_provider = Arc::new(
        ServiceProvider::new(
            service_store.clone(),
            engine_provider,
            config.runtime.env_prefix.clone(),
        )
        .await?,
    );

    let executor = Arc::new(CommandExecutor::new(service_provider, event_publisher));
    let dispatcher = Arc::new(InferenceDispatcher::new(service_store));

    let auth_gate = Arc::new(AuthGate::new(
        config.auth.enabled,
        config.auth.tokens.clone(),
        config.auth.operation_levels.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.rate, config.rate_limit.capacity));

    let state = AppState {
        auth_gate,
        rate_limiter,
        executor,
        dispatcher,
        config: config.clone(),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.ingress.host, config.ingress.port)
        .parse()
        .expect("invalid bind address");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        warn!("received shutdown signal, stopping gateway...");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    if config.ingress.ssl.enabled {
        info!("starting HTTPS gateway on {} (TLS enabled)", bind_addr);
        let tls_config =
            RustlsConfig::from_pem_file(&config.ingress.ssl.cert, &config.ingress.ssl.key)
                .await
                .map_err(|e| anyhow::anyhow!("failed to load TLS config: {}", e))?;

        axum_server::bind_rustls(bind_addr, tls_config)
            .handle(handle)
            .serve(make_service)
            .await?;
    } else {
        info!("starting HTTP gateway on {} (TLS disabled)", bind_addr);
        axum_server::bind(bind_addr)
            .handle(handle)
            .serve(make_service)
            .await?;
    }

    info!("daemon stopped");
    Ok(())
}
