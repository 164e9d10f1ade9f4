use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::models::{FileEntry, HistoryEntry, PendingFile, Room, RoomSnapshot};
use crate::config::CODE_LENGTH;
use crate::identity::UserId;
use crate::shared::AppError;

/// Candidate codes drawn before giving up. With live-room counts far below
/// the 10^6 code space this is unreachable in practice; hitting it means the
/// deployment needs a wider code space, not more retries.
const MAX_CODE_ATTEMPTS: usize = 10_000;

/// Produces candidate room codes: fixed-length ASCII digits, leading zeros
/// allowed. Uniqueness is the registry's job, checked under its lock.
#[derive(Debug, Default)]
pub struct CodeGenerator;

impl CodeGenerator {
    pub fn candidate(&self) -> String {
        let n: u32 = rand::rng().random_range(0..10u32.pow(CODE_LENGTH as u32));
        format!("{:0width$}", n, width = CODE_LENGTH)
    }
}

/// Owns every live room. All reads and mutations of room state go through
/// these methods, each of which holds the single registry lock only around
/// map/struct access; disk and network I/O always happens outside, on data
/// copied out while the lock was held.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
    code_gen: CodeGenerator,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            code_gen: CodeGenerator,
        }
    }

    /// Creates an empty room under a freshly generated unique code.
    ///
    /// Candidate generation and insertion happen under the same lock, so a
    /// checked code cannot be claimed by a concurrent create before insert.
    #[instrument(skip(self))]
    pub fn create_room(&self, now: DateTime<Utc>) -> Result<String, AppError> {
        let mut rooms = self.rooms.lock().unwrap();

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = self.code_gen.candidate();
            if !rooms.contains_key(&code) {
                rooms.insert(code.clone(), Room::new(now));
                info!(room_code = %code, "Room created");
                return Ok(code);
            }
        }

        warn!("Room code space exhausted");
        Err(AppError::CodeSpaceExhausted)
    }

    pub fn room_exists(&self, code: &str) -> bool {
        self.rooms.lock().unwrap().contains_key(code)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    /// Copy-out of a room's state for rendering, with the remaining TTL
    /// clamped at zero.
    pub fn snapshot(
        &self,
        code: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Option<RoomSnapshot> {
        let rooms = self.rooms.lock().unwrap();
        let room = rooms.get(code)?;

        let elapsed = (now - room.created_at).num_seconds().max(0) as u64;
        let remaining_seconds = ttl.as_secs().saturating_sub(elapsed);

        Some(RoomSnapshot {
            code: code.to_string(),
            created_at: room.created_at,
            files: room.files.clone(),
            history: room.history.iter().cloned().collect(),
            remaining_seconds,
        })
    }

    /// Appends uploaded files to a room, assigning contiguous indices from
    /// the room's counter. Concurrent appends never receive overlapping
    /// indices because assignment and append are a single locked step.
    ///
    /// Returns the finalized entries for broadcasting, or None if the room
    /// disappeared after the bytes were written.
    #[instrument(skip(self, pending))]
    pub fn append_files(&self, code: &str, pending: Vec<PendingFile>) -> Option<Vec<FileEntry>> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(code)?;

        let mut appended = Vec::with_capacity(pending.len());
        for file in pending {
            let entry = file.into_entry(room.next_index);
            room.next_index += 1;
            room.files.push(entry.clone());
            appended.push(entry);
        }

        debug!(
            room_code = %code,
            appended = appended.len(),
            total = room.files.len(),
            "Files appended to room"
        );
        Some(appended)
    }

    /// Bounds-checked lookup of one file's metadata.
    pub fn get_file(&self, code: &str, index: usize) -> Option<FileEntry> {
        let rooms = self.rooms.lock().unwrap();
        rooms.get(code)?.files.get(index).cloned()
    }

    /// Snapshot copy of a room's file list, e.g. for zip export.
    pub fn list_files(&self, code: &str) -> Option<Vec<FileEntry>> {
        let rooms = self.rooms.lock().unwrap();
        Some(rooms.get(code)?.files.clone())
    }

    /// Atomically removes a room, returning the storage names the caller must
    /// now delete from disk (outside this lock). None if the room was already
    /// gone, in which case someone else owns the deletion.
    #[instrument(skip(self))]
    pub fn destroy_room(&self, code: &str) -> Option<Vec<String>> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.remove(code)?;
        info!(room_code = %code, files = room.files.len(), "Room destroyed");
        Some(room.stored_names())
    }

    /// Appends a history line; silently a no-op when the room is absent.
    pub fn append_history(&self, code: &str, user: &UserId, action: &str) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get_mut(code) {
            room.push_history(HistoryEntry::now(user.as_str(), action));
        }
    }

    /// Atomically identifies and removes every room older than `ttl`,
    /// returning what must be deleted from disk. Safe to call concurrently
    /// with any other operation; a racing destroy and sweep hand the deletion
    /// list to exactly one of them.
    #[instrument(skip(self))]
    pub fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Vec<(String, Vec<String>)> {
        let mut rooms = self.rooms.lock().unwrap();

        let expired: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| {
                (now - room.created_at).num_seconds() > ttl.as_secs() as i64
            })
            .map(|(code, _)| code.clone())
            .collect();

        let mut reaped = Vec::with_capacity(expired.len());
        for code in expired {
            if let Some(room) = rooms.remove(&code) {
                debug!(room_code = %code, files = room.files.len(), "Room expired");
                reaped.push((code, room.stored_names()));
            }
        }
        reaped
    }
}
