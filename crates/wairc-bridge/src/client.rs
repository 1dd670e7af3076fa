//! HTTP client for the automation sidecar.
//!
//! Every browser session is a resource on the sidecar
//! (`{endpoint}/sessions/{id}`); each WhatsApp operation is a `POST` of a
//! JSON argument object to `{session}/{command}`, answered with the
//! `{ok, result, error}` envelope.

use crate::types::{BridgeResponse, NewSession};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};
use wairc_core::{
    config::BridgeConfig,
    error::WaircError,
    traits::{Connector, WhatsApp},
    whatsapp::{ChatRecord, LoginState, Me, MessageRecord, ParticipantRecord, Presence},
};

/// Opens one sidecar browser session per IRC client.
pub struct HttpConnector {
    client: reqwest::Client,
    endpoint: String,
    headless: bool,
}

impl HttpConnector {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            headless: config.headless,
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self) -> Result<Arc<dyn WhatsApp>, WaircError> {
        let url = format!("{}/sessions", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&NewSession {
                headless: self.headless,
            })
            .send()
            .await
            .map_err(|e| WaircError::Bridge(format!("creating session failed: {e}")))?;

        let id: String = unwrap_envelope("create session", resp).await?.ok_or_else(|| {
            WaircError::Bridge("create session: sidecar returned no session id".into())
        })?;

        info!("opened bridge session {id}");
        Ok(Arc::new(HttpWhatsApp {
            client: self.client.clone(),
            session_url: format!("{}/sessions/{id}", self.endpoint),
        }))
    }
}

/// A single sidecar browser session.
pub struct HttpWhatsApp {
    client: reqwest::Client,
    session_url: String,
}

impl HttpWhatsApp {
    async fn request<T: DeserializeOwned>(
        &self,
        command: &str,
        args: Value,
    ) -> Result<Option<T>, WaircError> {
        debug!("bridge call {command}");
        let resp = self
            .client
            .post(format!("{}/{command}", self.session_url))
            .json(&args)
            .send()
            .await
            .map_err(|e| WaircError::Bridge(format!("{command} failed: {e}")))?;
        unwrap_envelope(command, resp).await
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> Result<T, WaircError> {
        self.request(command, args)
            .await?
            .ok_or_else(|| WaircError::Bridge(format!("{command}: empty result")))
    }

    async fn call_unit(&self, command: &str, args: Value) -> Result<(), WaircError> {
        self.request::<Value>(command, args).await.map(|_| ())
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(
    command: &str,
    resp: reqwest::Response,
) -> Result<Option<T>, WaircError> {
    let body: BridgeResponse<T> = resp
        .json()
        .await
        .map_err(|e| WaircError::Bridge(format!("{command}: invalid response: {e}")))?;

    if !body.ok {
        return Err(WaircError::Bridge(format!(
            "{command}: {}",
            body.error.unwrap_or_else(|| "unknown error".into())
        )));
    }
    Ok(body.result)
}

#[async_trait]
impl WhatsApp for HttpWhatsApp {
    async fn navigate(&self) -> Result<(), WaircError> {
        self.call_unit("navigate", json!({})).await
    }

    async fn open(&self) -> Result<LoginState, WaircError> {
        self.call("open", json!({})).await
    }

    async fn login_code(&self) -> Result<String, WaircError> {
        self.call("login_code", json!({})).await
    }

    async fn wait_login(&self) -> Result<(), WaircError> {
        self.call_unit("wait_login", json!({})).await
    }

    async fn local_storage(&self) -> Result<HashMap<String, String>, WaircError> {
        Ok(self
            .request("local_storage", json!({}))
            .await?
            .unwrap_or_default())
    }

    async fn set_local_storage(
        &self,
        items: &HashMap<String, String>,
    ) -> Result<(), WaircError> {
        self.call_unit("set_local_storage", json!({ "items": items }))
            .await
    }

    async fn me(&self) -> Result<Me, WaircError> {
        self.call("me", json!({})).await
    }

    async fn all_chats(&self) -> Result<Vec<ChatRecord>, WaircError> {
        Ok(self
            .request("all_chats", json!({}))
            .await?
            .unwrap_or_default())
    }

    async fn participants(&self, chat_id: &str) -> Result<Vec<ParticipantRecord>, WaircError> {
        Ok(self
            .request("participants", json!({ "chatId": chat_id }))
            .await?
            .unwrap_or_default())
    }

    async fn messages_since(
        &self,
        chat_id: &str,
        since: i64,
    ) -> Result<Vec<MessageRecord>, WaircError> {
        let mut messages: Vec<MessageRecord> = self
            .request("messages_since", json!({ "chatId": chat_id, "since": since }))
            .await?
            .unwrap_or_default();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn new_messages(&self) -> Result<Vec<MessageRecord>, WaircError> {
        Ok(self
            .request("new_messages", json!({}))
            .await?
            .unwrap_or_default())
    }

    async fn logged_in(&self) -> Result<bool, WaircError> {
        self.call("logged_in", json!({})).await
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> Result<(), WaircError> {
        self.call_unit("send_message", json!({ "chatId": chat_id, "body": body }))
            .await
    }

    async fn set_admin(
        &self,
        chat_id: &str,
        user_id: &str,
        admin: bool,
    ) -> Result<(), WaircError> {
        self.call_unit(
            "set_admin",
            json!({ "chatId": chat_id, "userId": user_id, "admin": admin }),
        )
        .await
    }

    async fn add_participant(&self, chat_id: &str, user_id: &str) -> Result<(), WaircError> {
        self.call_unit(
            "add_participant",
            json!({ "chatId": chat_id, "userId": user_id }),
        )
        .await
    }

    async fn remove_participant(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<(), WaircError> {
        self.call_unit(
            "remove_participant",
            json!({ "chatId": chat_id, "userId": user_id }),
        )
        .await
    }

    async fn presence(&self, user_id: &str) -> Result<Presence, WaircError> {
        self.call("presence", json!({ "userId": user_id })).await
    }

    async fn common_groups(&self, user_id: &str) -> Result<Vec<ChatRecord>, WaircError> {
        Ok(self
            .request("common_groups", json!({ "userId": user_id }))
            .await?
            .unwrap_or_default())
    }

    async fn download_media(&self, message: &MessageRecord) -> Result<Vec<u8>, WaircError> {
        let encoded: String = self
            .call(
                "download_media",
                json!({ "messageId": message.id, "chatId": message.chat.id }),
            )
            .await?;
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| WaircError::Bridge(format!("download_media: invalid base64: {e}")))
    }

    async fn shutdown(&self) -> Result<(), WaircError> {
        let resp = self
            .client
            .delete(&self.session_url)
            .send()
            .await
            .map_err(|e| WaircError::Bridge(format!("closing session failed: {e}")))?;
        unwrap_envelope::<Value>("close session", resp).await?;
        info!("closed bridge session {}", self.session_url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::types::BridgeResponse;
    use wairc_core::whatsapp::{LoginState, MessageRecord};

    #[test]
    fn test_envelope_error() {
        let body: BridgeResponse<bool> =
            serde_json::from_str(r#"{"ok": false, "error": "not logged in"}"#).unwrap();
        assert!(!body.ok);
        assert_eq!(body.error.as_deref(), Some("not logged in"));
        assert!(body.result.is_none());
    }

    #[test]
    fn test_envelope_null_result() {
        let body: BridgeResponse<serde_json::Value> =
            serde_json::from_str(r#"{"ok": true, "result": null}"#).unwrap();
        assert!(body.ok);
        assert!(body.result.is_none());
    }

    #[test]
    fn test_envelope_typed_results() {
        let body: BridgeResponse<LoginState> =
            serde_json::from_str(r#"{"ok": true, "result": "logged_in"}"#).unwrap();
        assert_eq!(body.result, Some(LoginState::LoggedIn));

        let body: BridgeResponse<Vec<MessageRecord>> = serde_json::from_str(
            r#"{"ok": true, "result": [{"id": "a", "t": 5, "chat": {"id": "c@g.us", "isGroup": true}}]}"#,
        )
        .unwrap();
        let messages = body.result.unwrap();
        assert_eq!(messages[0].timestamp, 5);
        assert!(messages[0].chat.is_group);
    }
}
