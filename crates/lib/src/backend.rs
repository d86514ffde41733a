//! Chat backend HTTP client.
//!
//! Every method forwards one named backend operation 1:1 (JSON POST under `/api/`),
//! passing parameters through unchanged and returning whatever the service returns.
//! Failures carry a structured kind so callers never have to parse error text.

use crate::identity::Principal;
use crate::store::{ChatId, ChatSummary, ImageRecord, Message, MessageEtc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8943";

/// Client for the chat backend API.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request or the service itself timed out.
    #[error("backend timed out: {0}")]
    Timeout(String),
    /// The service answered with a non-success status.
    #[error("backend service error: {0}")]
    Service(String),
    /// The request never completed (connect, decode, transport).
    #[error("backend request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(err.to_string())
        } else {
            BackendError::Request(err.to_string())
        }
    }
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

/// One (role, content) pair of conversational context for the AI call.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// A message as persisted by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub etc: MessageEtc,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Message {
            role: stored.role,
            content: stored.content,
            etc: stored.etc,
            loading: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    reply: String,
}

#[derive(Debug, Deserialize)]
struct NameReply {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AllowedReply {
    allowed: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    messages: Vec<ImageRecord>,
}

impl BackendClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// POST one operation and decode the JSON payload.
    async fn post<T: DeserializeOwned>(
        &self,
        op: &str,
        body: &serde_json::Value,
    ) -> Result<T, BackendError> {
        let url = format!("{}/api/{}", self.base_url, op);
        let res = self.client.post(&url).json(body).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let detail = format!("{}: {} {}", op, status, body);
            // Gateway/request timeouts reported by the service keep their own kind.
            if status == reqwest::StatusCode::GATEWAY_TIMEOUT
                || status == reqwest::StatusCode::REQUEST_TIMEOUT
            {
                return Err(BackendError::Timeout(detail));
            }
            return Err(BackendError::Service(detail));
        }
        let data: T = res.json().await?;
        Ok(data)
    }

    /// POST one operation where only the status matters.
    async fn post_ok(&self, op: &str, body: &serde_json::Value) -> Result<(), BackendError> {
        let _: serde_json::Value = self.post(op, body).await?;
        Ok(())
    }

    /// Ask the AI for a reply to `message` under `tag`, given trailing conversation context.
    pub async fn chat(
        &self,
        message: &str,
        tag: &str,
        history: &[HistoryEntry],
    ) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "message": message,
            "tag": tag,
            "history": history,
        });
        let data: ChatReply = self.post("chat", &body).await?;
        Ok(data.reply)
    }

    pub async fn create_new_chat(
        &self,
        principal: &Principal,
        chat_id: ChatId,
        name: &str,
    ) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "chatId": chat_id,
            "name": name,
        });
        self.post_ok("create_new_chat", &body).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_chat_message(
        &self,
        principal: &Principal,
        chat_id: ChatId,
        content: &str,
        role: &str,
        width: u32,
        height: u32,
        timestamp: u64,
    ) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "chatId": chat_id,
            "content": content,
            "role": role,
            "width": width,
            "height": height,
            "timestamp": timestamp,
        });
        self.post_ok("add_chat_message", &body).await
    }

    /// Messages persisted for the chat, starting at offset `known_len`.
    pub async fn get_chat_history(
        &self,
        principal: &Principal,
        chat_id: ChatId,
        known_len: u64,
    ) -> Result<Vec<StoredMessage>, BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "chatId": chat_id,
            "knownLen": known_len,
        });
        let data: HistoryResponse = self.post("get_chat_history", &body).await?;
        Ok(data.messages)
    }

    pub async fn delete_chat(
        &self,
        principal: &Principal,
        chat_id: ChatId,
    ) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "chatId": chat_id,
        });
        self.post_ok("delete_chat", &body).await
    }

    pub async fn rename_chat(
        &self,
        principal: &Principal,
        chat_id: ChatId,
        name: &str,
    ) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "chatId": chat_id,
            "name": name,
        });
        self.post_ok("rename_chat", &body).await
    }

    pub async fn list_chats(
        &self,
        principal: &Principal,
        archived_only: bool,
    ) -> Result<Vec<ChatSummary>, BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "archivedOnly": archived_only,
        });
        self.post("list_chats", &body).await
    }

    pub async fn set_user_name(
        &self,
        principal: &Principal,
        name: &str,
    ) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "name": name,
        });
        self.post_ok("set_user_name", &body).await
    }

    pub async fn get_user_name(&self, principal: &Principal) -> Result<String, BackendError> {
        let body = serde_json::json!({ "principal": principal });
        let data: NameReply = self.post("get_user_name", &body).await?;
        Ok(data.name)
    }

    /// Rate-limit check: whether the user may send another prompt.
    pub async fn try_increment_user_prompt(
        &self,
        principal: &Principal,
    ) -> Result<bool, BackendError> {
        let body = serde_json::json!({ "principal": principal });
        let data: AllowedReply = self.post("try_increment_user_prompt", &body).await?;
        Ok(data.allowed)
    }

    pub async fn archive_chat(
        &self,
        principal: &Principal,
        chat_id: ChatId,
        archived: bool,
    ) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "chatId": chat_id,
            "archive": archived,
        });
        self.post_ok("archive_chat", &body).await
    }

    pub async fn get_all_images(
        &self,
        principal: &Principal,
    ) -> Result<Vec<ImageRecord>, BackendError> {
        let body = serde_json::json!({ "principal": principal });
        let data: ImagesResponse = self.post("get_all_images", &body).await?;
        Ok(data.messages)
    }

    pub async fn update_image(
        &self,
        principal: &Principal,
        chat_id: ChatId,
        index: u64,
        image: &str,
    ) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "principal": principal,
            "chatId": chat_id,
            "index": index,
            "image": image,
        });
        self.post_ok("update_image", &body).await
    }

    /// Ask the AI to draw. `msg` is the placeholder image content shown while drawing.
    pub async fn ask_ai_draw(
        &self,
        query: &str,
        tag: &str,
        msg: &str,
    ) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "query": query,
            "tag": tag,
            "msg": msg,
        });
        let data: ChatReply = self.post("askaidraw", &body).await?;
        Ok(data.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_serializes_as_16_raw_bytes() {
        let id = ChatId::parse_uuid("550e8400-e29b-41d4-a716-446655440000").expect("parse");
        let value = serde_json::to_value(id).expect("serialize");
        let bytes = value.as_array().expect("byte array");
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0].as_u64(), Some(0x55));
    }

    #[test]
    fn stored_message_becomes_a_settled_entry() {
        let stored = StoredMessage {
            role: "assistant".to_string(),
            content: "hello".to_string(),
            etc: MessageEtc::text(42),
        };
        let message = Message::from(stored);
        assert!(!message.loading);
        assert_eq!(message.role, "assistant");
        assert_eq!(message.etc.timestamp_ms, 42);
    }

    #[test]
    fn history_entry_serializes_role_and_content_only() {
        let entry = HistoryEntry {
            role: "user".to_string(),
            content: "hi".to_string(),
        };
        let value = serde_json::to_value(&entry).expect("serialize");
        let obj = value.as_object().expect("object");
        assert_eq!(obj.len(), 2);
        assert_eq!(obj.get("role").and_then(|v| v.as_str()), Some("user"));
    }
}
