use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::HISTORY_CAP;

/// One uploaded artifact, owned by its room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    /// Stable per-room index, assigned once and never reused
    pub index: usize,
    /// Client-supplied name, untrusted; only used for display and download names
    pub original_name: String,
    /// Collision-free on-disk name assigned by the file store
    pub stored_name: String,
    /// Size in bytes
    pub size: u64,
    /// Uppercase extension, or "FILE" when the name has none
    pub kind: String,
    /// User who uploaded the file
    pub sender: String,
}

/// A file that has been written to disk but not yet committed to a room.
/// The registry assigns the index when appending.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub original_name: String,
    pub stored_name: String,
    pub size: u64,
    pub sender: String,
}

impl PendingFile {
    pub fn into_entry(self, index: usize) -> FileEntry {
        let kind = infer_kind(&self.original_name);
        FileEntry {
            index,
            original_name: self.original_name,
            stored_name: self.stored_name,
            size: self.size,
            kind,
            sender: self.sender,
        }
    }
}

/// One line of a room's activity trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub user: String,
    pub action: String,
    /// Wall-clock display time, HH:MM:SS
    pub time: String,
}

impl HistoryEntry {
    pub fn now(user: &str, action: &str) -> Self {
        Self {
            user: user.to_string(),
            action: action.to_string(),
            time: Utc::now().format("%H:%M:%S").to_string(),
        }
    }
}

/// Mutable room state. Owned exclusively by the registry; everything handed
/// to callers is a copy.
#[derive(Debug, Clone)]
pub struct Room {
    pub created_at: DateTime<Utc>,
    pub files: Vec<FileEntry>,
    pub history: VecDeque<HistoryEntry>,
    /// Next file index to assign; only ever incremented
    pub next_index: usize,
}

impl Room {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            files: Vec::new(),
            history: VecDeque::new(),
            next_index: 0,
        }
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    pub fn stored_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.stored_name.clone()).collect()
    }
}

/// Stable copy-out of a room for rendering. Never exposes the registry's
/// mutable containers.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<FileEntry>,
    pub history: Vec<HistoryEntry>,
    pub remaining_seconds: u64,
}

fn infer_kind(original_name: &str) -> String {
    // Dotfiles count as having an extension; only a trailing dot or a name
    // with no dot at all falls back to FILE
    match original_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_uppercase(),
        _ => "FILE".to_string(),
    }
}

/// Human-readable byte size for views, e.g. "1.5 KB".
pub fn human_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
