use serde::{Deserialize, Serialize};

use crate::room::models::FileEntry;

/// Events fanned out to the subscribers of a room.
///
/// Events are facts about things that have already happened; delivery is
/// best-effort, at-most-once, to currently connected subscribers. Clients
/// that miss events rebuild state from the room snapshot on reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoomEvent {
    /// One upload request appended these files to the room
    FilesAdded {
        files: Vec<FileEntry>,
        sender: String,
    },

    /// Somebody downloaded a single file
    FileDownloaded { filename: String, user: String },

    /// The room was explicitly destroyed; subscribers should leave
    RoomDestroyed {},
}

impl RoomEvent {
    /// Wire-level name of the event kind
    pub fn event_type(&self) -> &'static str {
        match self {
            RoomEvent::FilesAdded { .. } => "files_added",
            RoomEvent::FileDownloaded { .. } => "file_downloaded",
            RoomEvent::RoomDestroyed {} => "room_destroyed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = RoomEvent::FileDownloaded {
            filename: "a.txt".to_string(),
            user: "user_1_0001".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "file_downloaded");
        assert_eq!(json["filename"], "a.txt");

        let destroyed = serde_json::to_value(RoomEvent::RoomDestroyed {}).unwrap();
        assert_eq!(destroyed["event"], "room_destroyed");
    }

    #[test]
    fn test_event_type_matches_wire_tag() {
        let event = RoomEvent::FilesAdded {
            files: vec![],
            sender: "u".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.event_type());
    }
}
