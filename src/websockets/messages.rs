use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::event::RoomEvent;

/// Control messages a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Stop receiving this room's events; the server closes the connection
    Unsubscribe,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Acknowledgement sent right after a successful subscription.
pub fn subscribed_frame(code: &str) -> String {
    json!({
        "event": "subscribed",
        "code": code,
        "success": true,
    })
    .to_string()
}

/// Serializes a room event for the wire. Events carry their own
/// snake_case `event` tag.
pub fn event_frame(event: &RoomEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| {
        json!({"event": "error", "message": "unserializable event"}).to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unsubscribe() {
        let msg = ClientMessage::parse(r#"{"type": "UNSUBSCRIBE"}"#);
        assert_eq!(msg, Some(ClientMessage::Unsubscribe));
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(ClientMessage::parse("not json").is_none());
        assert!(ClientMessage::parse(r#"{"type": "DANCE"}"#).is_none());
    }

    #[test]
    fn test_subscribed_frame_shape() {
        let frame = subscribed_frame("123456");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "subscribed");
        assert_eq!(value["code"], "123456");
        assert_eq!(value["success"], true);
    }

    #[test]
    fn test_event_frame_carries_tag() {
        let frame = event_frame(&RoomEvent::RoomDestroyed {});
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "room_destroyed");
    }
}
