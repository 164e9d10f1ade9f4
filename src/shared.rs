use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::error;

use crate::config::Config;
use crate::event::EventBus;
use crate::room::registry::RoomRegistry;
use crate::store::FileStore;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub store: Arc<FileStore>,
    pub event_bus: EventBus,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<RoomRegistry>,
        store: Arc<FileStore>,
        event_bus: EventBus,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            store,
            event_bus,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Room code space exhausted")]
    CodeSpaceExhausted,

    #[error("Internal server error")]
    Internal,
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Storage(msg) => {
                // Disk-level detail goes to logs only
                error!(detail = %msg, "Storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage error".to_string(),
                )
            }
            AppError::CodeSpaceExhausted => (
                StatusCode::SERVICE_UNAVAILABLE,
                "No room codes available".to_string(),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
