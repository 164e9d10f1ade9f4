// Public API - what other modules can use
pub use handlers::build_router;
pub use reaper::{start_reaper_task, ReaperConfig};

// Internal modules
mod handlers;
pub mod models;
pub mod reaper;
pub mod registry;
