// Library crate for the file relay server
// This file exposes the public API for integration tests

pub mod config;
pub mod event;
pub mod identity;
pub mod room;
pub mod shared;
pub mod store;
pub mod websockets;

// Re-export commonly used types for easier access in tests
pub use config::Config;
pub use event::{EventBus, RoomEvent};
pub use identity::UserId;
pub use room::registry::RoomRegistry;
pub use room::{build_router, start_reaper_task, ReaperConfig};
pub use shared::{AppError, AppState};
pub use store::FileStore;
