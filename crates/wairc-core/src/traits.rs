use crate::{
    error::WaircError,
    whatsapp::{ChatRecord, LoginState, Me, MessageRecord, ParticipantRecord, Presence},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

/// One live WhatsApp Web session, driven through browser automation.
///
/// Every call may fail with a generic bridge error; callers decide whether
/// a failure is fatal.
#[async_trait]
pub trait WhatsApp: Send + Sync {
    /// Load the web client page without waiting for login.
    async fn navigate(&self) -> Result<(), WaircError>;

    /// Open the web client and report whether a login is still required.
    async fn open(&self) -> Result<LoginState, WaircError>;

    /// The code to render as a login QR code.
    async fn login_code(&self) -> Result<String, WaircError>;

    /// Block until the phone has scanned the login code.
    async fn wait_login(&self) -> Result<(), WaircError>;

    async fn local_storage(&self) -> Result<HashMap<String, String>, WaircError>;

    async fn set_local_storage(&self, items: &HashMap<String, String>)
        -> Result<(), WaircError>;

    async fn me(&self) -> Result<Me, WaircError>;

    async fn all_chats(&self) -> Result<Vec<ChatRecord>, WaircError>;

    /// Members of a group chat. Direct chats have none.
    async fn participants(&self, chat_id: &str) -> Result<Vec<ParticipantRecord>, WaircError>;

    /// Messages of a chat with a timestamp at or after `since`, ascending.
    async fn messages_since(
        &self,
        chat_id: &str,
        since: i64,
    ) -> Result<Vec<MessageRecord>, WaircError>;

    /// Messages that arrived since the previous call.
    async fn new_messages(&self) -> Result<Vec<MessageRecord>, WaircError>;

    async fn logged_in(&self) -> Result<bool, WaircError>;

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), WaircError>;

    async fn set_admin(&self, chat_id: &str, user_id: &str, admin: bool)
        -> Result<(), WaircError>;

    async fn add_participant(&self, chat_id: &str, user_id: &str) -> Result<(), WaircError>;

    async fn remove_participant(&self, chat_id: &str, user_id: &str)
        -> Result<(), WaircError>;

    async fn presence(&self, user_id: &str) -> Result<Presence, WaircError>;

    /// Groups shared with the given contact.
    async fn common_groups(&self, user_id: &str) -> Result<Vec<ChatRecord>, WaircError>;

    async fn download_media(&self, message: &MessageRecord) -> Result<Vec<u8>, WaircError>;

    /// Release the underlying browser.
    async fn shutdown(&self) -> Result<(), WaircError>;
}

/// Factory for fresh WhatsApp sessions, one per IRC client.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn WhatsApp>, WaircError>;
}

/// A file exposed through the static file host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedFile {
    pub hash: String,
    pub path: std::path::PathBuf,
    pub url: String,
}

/// Side channel hosting downloaded media and login QR codes.
#[async_trait]
pub trait FileHost: Send + Sync {
    async fn add_blob(&self, hash: &str, ext: &str, bytes: &[u8])
        -> Result<HostedFile, WaircError>;

    async fn remove_file(&self, file: &HostedFile) -> Result<(), WaircError>;

    fn file_by_hash(&self, hash: &str) -> Option<HostedFile>;
}

/// Persisted identifier mapping for one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatIdentity {
    pub identifier: String,
    pub id: String,
    /// Records written before the flag existed read as direct chats.
    #[serde(default)]
    pub is_group: bool,
}

/// Everything kept between connections of the same nickname.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    #[serde(default)]
    pub last_received_receipts: HashMap<String, i64>,
    #[serde(default)]
    pub chats: Vec<ChatIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Key-value persistence of session records, keyed by nickname.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<SessionRecord>, WaircError>;

    async fn save_item(&self, key: &str, record: &SessionRecord) -> Result<(), WaircError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_record_keeps_chat_kind() {
        let json = r##"{"chats": [
            {"identifier": "#Team", "id": "1@g.us", "is_group": true},
            {"identifier": "bob", "id": "2@c.us"}
        ]}"##;
        let record: SessionRecord = serde_json::from_str(json).unwrap();
        assert!(record.chats[0].is_group);
        assert!(!record.chats[1].is_group, "missing flag reads as direct");

        let again: SessionRecord =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(again, record);
    }
}
