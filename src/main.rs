use std::sync::Arc;

use fileroom::{
    build_router, start_reaper_task, AppState, Config, EventBus, FileStore, ReaperConfig,
    RoomRegistry,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fileroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    info!(?config, "Starting file relay server");

    let store = Arc::new(FileStore::new(config.storage_root.clone()));
    store
        .init()
        .await
        .expect("Failed to prepare storage root");

    let registry = Arc::new(RoomRegistry::new());
    let event_bus = EventBus::new();

    // One reaper for the process lifetime
    tokio::spawn(start_reaper_task(
        Arc::clone(&registry),
        Arc::clone(&store),
        event_bus.clone(),
        ReaperConfig {
            interval: config.reaper_interval,
            room_ttl: config.room_ttl,
        },
    ));

    let bind_addr = config.bind_addr;
    let app_state = AppState::new(registry, store, event_bus, config);
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await.unwrap();
    info!("Server running on http://{}", bind_addr);
    axum::serve(listener, app).await.unwrap();
}
