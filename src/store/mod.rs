// Public API - what other modules can use
pub use file_store::{sanitize_filename, FileStore, SavedFile};

// Internal modules
mod file_store;
