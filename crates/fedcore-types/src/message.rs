use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Announcement,
    TrainingRound,
    ModelUpdate,
    Heartbeat,
    Discovery,
}

/// `(id, type, sender, recipients?, payload, timestamp, nonce, signature)`
/// (spec §3, §6). Signed over the canonical serialization of every field
/// except `signature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
    pub signature: String,
}

impl NetworkMessage {
    /// The exact byte sequence that is signed and verified: a JSON object
    /// with keys sorted lexicographically, `signature` excluded.
    ///
    /// `serde_json::Map` is backed by a `BTreeMap` by default (the
    /// `preserve_order` feature is not enabled in this workspace), so
    /// re-serializing through a `Map` sorts keys for free.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut map = Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert(
            "type".into(),
            serde_json::to_value(self.message_type).expect("message type always serializes"),
        );
        map.insert("sender".into(), Value::String(self.sender.clone()));
        if let Some(recipients) = &self.recipients {
            map.insert(
                "recipients".into(),
                Value::Array(recipients.iter().cloned().map(Value::String).collect()),
            );
        }
        map.insert("payload".into(), self.payload.clone());
        map.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        map.insert("nonce".into(), Value::String(self.nonce.clone()));
        serde_json::to_vec(&Value::Object(map)).expect("canonical message always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_excludes_signature() {
        let msg = NetworkMessage {
            id: "m1".into(),
            message_type: MessageType::Heartbeat,
            sender: "inst-1".into(),
            recipients: None,
            payload: serde_json::json!({"ok": true}),
            timestamp: Utc::now(),
            nonce: "abc".into(),
            signature: "should-not-appear".into(),
        };
        let bytes = msg.canonical_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("should-not-appear"));
        assert!(text.contains("\"id\":\"m1\""));
    }

    #[test]
    fn canonical_bytes_are_key_sorted() {
        let msg = NetworkMessage {
            id: "m1".into(),
            message_type: MessageType::Heartbeat,
            sender: "inst-1".into(),
            recipients: None,
            payload: Value::Null,
            timestamp: Utc::now(),
            nonce: "abc".into(),
            signature: "sig".into(),
        };
        let text = String::from_utf8(msg.canonical_bytes()).unwrap();
        let id_pos = text.find("\"id\"").unwrap();
        let sender_pos = text.find("\"sender\"").unwrap();
        let type_pos = text.find("\"type\"").unwrap();
        assert!(id_pos < sender_pos);
        assert!(sender_pos < type_pos);
    }
}
