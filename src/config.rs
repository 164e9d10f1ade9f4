use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum history entries kept per room; oldest are dropped first.
pub const HISTORY_CAP: usize = 50;

/// Room codes are this many ASCII digits, leading zeros allowed.
pub const CODE_LENGTH: usize = 6;

/// Runtime configuration, read from the environment with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Directory where uploaded files are stored
    pub storage_root: PathBuf,
    /// How long a room lives after creation
    pub room_ttl: Duration,
    /// How often the reaper scans for expired rooms
    pub reaper_interval: Duration,
    /// Maximum accepted request body size for uploads
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            storage_root: PathBuf::from("uploads"),
            room_ttl: Duration::from_secs(15 * 60),
            reaper_interval: Duration::from_secs(60),
            max_upload_bytes: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl Config {
    /// Loads configuration from FILEROOM_* environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: env_parse("FILEROOM_ADDR").unwrap_or(defaults.bind_addr),
            storage_root: std::env::var("FILEROOM_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            room_ttl: env_parse("FILEROOM_ROOM_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.room_ttl),
            reaper_interval: env_parse("FILEROOM_REAPER_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            max_upload_bytes: env_parse("FILEROOM_MAX_UPLOAD_BYTES")
                .unwrap_or(defaults.max_upload_bytes),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.room_ttl, Duration::from_secs(900));
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(config.storage_root, PathBuf::from("uploads"));
    }
}
