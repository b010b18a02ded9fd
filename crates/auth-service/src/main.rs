use auth_service::config::Config;
use auth_service::observability::metrics::init_metrics_recorder;
use auth_service::routes::{self, AppState};
use auth_service::services::notification::LoggingNotificationSender;
use auth_service::store::{spawn_purge_task, InMemoryEphemeralStore};
use common::config::ObservabilityConfig;
use common::identity::{InMemoryIdentityStore, SubjectRecord};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let observability = ObservabilityConfig::from_vars(&std::env::vars().collect());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_service=debug,tower_http=debug".into()),
        )
        .with(
            observability
                .json_logs
                .then(|| tracing_subscriber::fmt::layer().json()),
        )
        .with((!observability.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting auth service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        access_ttl_secs = config.access_token_ttl.as_secs(),
        refresh_ttl_secs = config.refresh_token_ttl.as_secs(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let identities = Arc::new(InMemoryIdentityStore::with_subjects(
        load_identity_seed(config.identity_seed_path.as_deref()).await?,
    ));

    let cancel_token = CancellationToken::new();

    let store = Arc::new(InMemoryEphemeralStore::new());
    let purge_handle = spawn_purge_task(
        Arc::clone(&store),
        config.store_purge_interval,
        cancel_token.child_token(),
    );

    let bind_address = config.bind_address.clone();
    let state = Arc::new(
        AppState::from_config(
            config,
            identities,
            store,
            Arc::new(LoggingNotificationSender),
        )
        .map_err(|e| {
            error!("Failed to build application state: {}", e);
            e
        })?,
    );

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {}: {}", addr, e);
        e
    })?;

    info!("Auth service listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {}", e);
        e
    })?;

    cancel_token.cancel();
    if let Err(e) = purge_handle.await {
        error!("Purge task failed to stop cleanly: {}", e);
    }

    info!("Auth service shutdown complete");

    Ok(())
}

/// Subjects to preload, from a JSON array of `SubjectRecord`s.
async fn load_identity_seed(
    path: Option<&str>,
) -> Result<Vec<SubjectRecord>, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        info!("No identity seed configured, starting with an empty identity store");
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        error!("Failed to read identity seed {}: {}", path, e);
        e
    })?;
    let records: Vec<SubjectRecord> = serde_json::from_str(&raw).map_err(|e| {
        error!("Failed to parse identity seed {}: {}", path, e);
        e
    })?;
    info!(count = records.len(), "Loaded identity seed");
    Ok(records)
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
