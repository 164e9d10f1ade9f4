// Public API - what other modules can use
pub use handler::websocket_handler;
pub use messages::{event_frame, subscribed_frame, ClientMessage};

// Internal modules
mod handler;
mod messages;
