// Public API - what other modules can use
pub use bus::EventBus;
pub use events::RoomEvent;

// Internal modules
mod bus;
mod events;
