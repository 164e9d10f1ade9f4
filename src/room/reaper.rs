use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use super::registry::RoomRegistry;
use crate::event::EventBus;
use crate::shared::AppError;
use crate::store::FileStore;

/// Configuration for the expiry reaper
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often to scan the registry for expired rooms
    pub interval: Duration,
    /// How long a room lives after creation
    pub room_ttl: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            room_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Runs the expiry reaper for the process lifetime.
///
/// Each tick removes every room past its TTL and deletes its files from
/// disk, outside the registry lock. A failing tick is logged and the loop
/// continues after a backoff that doubles up to the normal interval; the
/// reaper never exits.
#[instrument(skip(registry, store, event_bus))]
pub async fn start_reaper_task(
    registry: Arc<RoomRegistry>,
    store: Arc<FileStore>,
    event_bus: EventBus,
    config: ReaperConfig,
) {
    info!(
        interval_secs = config.interval.as_secs(),
        room_ttl_secs = config.room_ttl.as_secs(),
        "Starting expiry reaper"
    );

    let mut tick = interval(config.interval);
    let mut backoff = config.interval / 4;

    loop {
        tick.tick().await;

        match sweep_once(&registry, &store, &event_bus, config.room_ttl).await {
            Ok((rooms, files)) => {
                backoff = config.interval / 4;
                if rooms > 0 {
                    info!(rooms, files, "Reaper removed expired rooms");
                } else {
                    debug!("No expired rooms");
                }
            }
            Err(e) => {
                error!(error = %e, backoff_secs = backoff.as_secs(), "Reaper tick failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.interval);
            }
        }
    }
}

/// One reaper pass: atomically removes all expired rooms from the registry,
/// then deletes their files and drops their event channels. Returns
/// (rooms removed, files deleted).
pub async fn sweep_once(
    registry: &RoomRegistry,
    store: &FileStore,
    event_bus: &EventBus,
    room_ttl: Duration,
) -> Result<(usize, usize), AppError> {
    let reaped = registry.sweep_expired(Utc::now(), room_ttl);
    if reaped.is_empty() {
        return Ok((0, 0));
    }

    let mut files_deleted = 0;
    for (code, stored_names) in &reaped {
        files_deleted += store.delete_all(stored_names).await;
        event_bus.remove_room(code).await;
        info!(room_code = %code, "Expired room reaped");
    }

    Ok((reaped.len(), files_deleted))
}
