use chat_service::actors::spawn_reaper;
use chat_service::config::Config;
use chat_service::observability::metrics::init_metrics_recorder;
use chat_service::repositories::{InMemoryConversationStore, TripRecord};
use chat_service::routes::{self, AppState};
use common::config::ObservabilityConfig;
use common::identity::{InMemoryIdentityStore, SubjectRecord};
use serde::de::DeserializeOwned;
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
                .unwrap_or_else(|_| "chat_service=debug,tower_http=debug".into()),
        )
        .with(
            observability
                .json_logs
                .then(|| tracing_subscriber::fmt::layer().json()),
        )
        .with((!observability.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting chat service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        max_message_chars = config.max_message_chars,
        reverify_secs = config.channel_reverify_interval.map(|d| d.as_secs()),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let subjects: Vec<SubjectRecord> = load_seed("identity", config.identity_seed_path.as_deref()).await?;
    let trips: Vec<TripRecord> = load_seed("trips", config.trips_seed_path.as_deref()).await?;
    let identities = Arc::new(InMemoryIdentityStore::with_subjects(subjects));
    let conversations = Arc::new(InMemoryConversationStore::with_trips(trips));

    let cancel_token = CancellationToken::new();

    let bind_address = config.bind_address.clone();
    let reap_interval = config.room_reap_interval;
    let state = Arc::new(
        AppState::from_config(config, identities, conversations, cancel_token.clone()).map_err(
            |e| {
                error!("Failed to build application state: {}", e);
                e
            },
        )?,
    );

    let reaper_handle = spawn_reaper(
        Arc::clone(&state.rooms),
        reap_interval,
        cancel_token.child_token(),
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

    info!("Chat service listening on {}", addr);

    // Open channels are upgraded connections; cancelling the token is what
    // ends them.
    let shutdown_token = cancel_token.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_token.cancel();
    })
    .await
    .map_err(|e| {
        error!("Server error: {}", e);
        e
    })?;

    cancel_token.cancel();
    if let Err(e) = reaper_handle.await {
        error!("Room reaper failed to stop cleanly: {}", e);
    }

    info!("Chat service shutdown complete");

    Ok(())
}

/// Records to preload from a JSON array file.
async fn load_seed<T: DeserializeOwned>(
    name: &str,
    path: Option<&str>,
) -> Result<Vec<T>, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        info!("No {} seed configured, starting empty", name);
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        error!("Failed to read {} seed {}: {}", name, path, e);
        e
    })?;
    let records: Vec<T> = serde_json::from_str(&raw).map_err(|e| {
        error!("Failed to parse {} seed {}: {}", name, path, e);
        e
    })?;
    info!(count = records.len(), "Loaded {} seed", name);
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
