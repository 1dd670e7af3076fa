//! Records returned by the WhatsApp automation service.
//!
//! Field names follow the in-page store (`isGroup`, `quotedMsgObj`, ...) so
//! the records deserialize straight from the sidecar's JSON.

use serde::{Deserialize, Serialize};

/// Result of opening the web client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    Unknown,
    LoggedIn,
    LoggedOut,
}

/// The logged-in account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Me {
    #[serde(rename = "me")]
    pub self_id: String,
    #[serde(default, rename = "pushname")]
    pub push_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default, rename = "formattedShortName")]
    pub short_name: String,
    #[serde(default, rename = "pushname")]
    pub push_name: String,
    #[serde(default)]
    pub formatted_name: String,
    #[serde(default)]
    pub is_me: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_super_admin: bool,
    pub contact: Contact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Unix seconds of the latest message in the chat.
    #[serde(default, rename = "t")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    /// Unix seconds.
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default, rename = "senderObj")]
    pub sender: Option<Contact>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default)]
    pub is_notification: bool,
    #[serde(default)]
    pub is_sent_by_me: bool,
    #[serde(default)]
    pub is_sent_by_me_from_web: bool,

    #[serde(default)]
    pub is_media: bool,
    #[serde(default, rename = "mimetype")]
    pub mime_type: String,
    #[serde(default, rename = "filehash")]
    pub file_hash: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub caption: String,

    #[serde(default)]
    pub location: Option<Location>,

    /// Only one level of quoting is ever rendered.
    #[serde(default, rename = "quotedMsgObj")]
    pub quoted: Option<Box<MessageRecord>>,

    pub chat: ChatRecord,
}

impl MessageRecord {
    /// Sender ID, falling back to the raw `from` field.
    pub fn author_id(&self) -> &str {
        match &self.sender {
            Some(sender) => &sender.id,
            None => &self.from,
        }
    }

    pub fn time(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub id: String,
    #[serde(default)]
    pub is_online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_store_json() {
        let json = r#"{
            "id": "true_123@c.us_ABC",
            "t": 1700000000,
            "type": "chat",
            "senderObj": {"id": "123@c.us", "pushname": "Bob", "formattedName": "+31 6 1234"},
            "body": "hi",
            "isSentByMe": false,
            "quotedMsgObj": {"id": "q", "t": 1, "body": "older", "chat": {"id": "123@c.us"}},
            "chat": {"id": "123@c.us", "name": "Bob", "isGroup": false, "t": 1700000000}
        }"#;
        let msg: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(msg.author_id(), "123@c.us");
        assert_eq!(msg.kind, "chat");
        assert_eq!(msg.quoted.as_ref().unwrap().body, "older");
        assert!(msg.location.is_none());
        assert_eq!(msg.time().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_author_falls_back_to_from() {
        let msg = MessageRecord {
            from: "555@c.us".into(),
            ..Default::default()
        };
        assert_eq!(msg.author_id(), "555@c.us");
    }

    #[test]
    fn test_login_state_wire_names() {
        let s: LoginState = serde_json::from_str("\"logged_out\"").unwrap();
        assert_eq!(s, LoginState::LoggedOut);
    }
}
