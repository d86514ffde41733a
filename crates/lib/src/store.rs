//! Client-side view state for the chat UI.
//!
//! One store per client: session, the open chat's messages, chat list, archive list,
//! and image gallery. Mutated only by the chat orchestration layer; read by the UI.

use crate::identity::Principal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 16-byte chat identifier, produced client-side from a random UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub [u8; 16]);

impl ChatId {
    /// Generate a fresh identifier from a UUID v4 string (hyphens stripped, hex pairs parsed).
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        Self::parse_uuid(&uuid).expect("freshly generated UUID string is well-formed")
    }

    /// Parse a UUID-like string (with or without hyphens) into 16 raw bytes.
    pub fn parse_uuid(s: &str) -> Result<Self, String> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return Err(format!("chat id must be 32 hex digits, got {}", hex.len()));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| "invalid hex".to_string())?;
            bytes[i] =
                u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex pair: {}", pair))?;
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Current user session. Never persisted; re-derived through the identity flow each run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub logged_in: bool,
    pub principal: Option<Principal>,
    pub username: String,
    pub icon: String,
}

impl Session {
    /// Logged-out defaults used at startup and after logout.
    pub fn anonymous() -> Self {
        Self {
            logged_in: false,
            principal: None,
            username: "Anonymous".to_string(),
            icon: "default".to_string(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Timestamp and display size of a message (width/height are 0 for plain text).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEtc {
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
}

impl MessageEtc {
    pub fn text(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            width: 0,
            height: 0,
        }
    }
}

/// A single message in the open chat. `loading` marks the in-flight placeholder entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub etc: MessageEtc,
    #[serde(default)]
    pub loading: bool,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            etc: MessageEtc::text(timestamp_ms),
            loading: false,
        }
    }

    /// A resolved reply under the given tag (e.g. "assistant").
    pub fn tagged(tag: impl Into<String>, content: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            role: tag.into(),
            content: content.into(),
            etc: MessageEtc::text(timestamp_ms),
            loading: false,
        }
    }

    /// The provisional placeholder shown while a reply is in flight.
    pub fn loading(tag: impl Into<String>, label: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            role: tag.into(),
            content: label.into(),
            etc: MessageEtc::text(timestamp_ms),
            loading: true,
        }
    }
}

/// One entry in the cached chat list. `msg_len` is the count of messages already
/// persisted for the chat, used to avoid re-fetching full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ChatId,
    pub name: String,
    pub msg_len: u64,
    #[serde(default)]
    pub archived: bool,
}

/// Read-only projection of messages tagged as images, loaded per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image: String,
    pub etc: MessageEtc,
}

#[derive(Default)]
struct ClientState {
    session: Session,
    current: Option<ChatId>,
    messages: Vec<Message>,
    chats: Vec<ChatSummary>,
    archived: Vec<ChatSummary>,
    images: Vec<ImageRecord>,
    reset_pending: bool,
}

/// In-memory reactive state for one client instance.
pub struct ClientStore {
    inner: Arc<RwLock<ClientState>>,
}

impl Default for ClientStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ClientState::default())),
        }
    }

    pub async fn session(&self) -> Session {
        self.inner.read().await.session.clone()
    }

    pub async fn set_session(&self, session: Session) {
        self.inner.write().await.session = session;
    }

    /// Reset session fields to the anonymous defaults.
    pub async fn clear_session(&self) {
        self.inner.write().await.session = Session::anonymous();
    }

    pub async fn set_username(&self, name: impl Into<String>) {
        self.inner.write().await.session.username = name.into();
    }

    pub async fn current(&self) -> Option<ChatId> {
        self.inner.read().await.current
    }

    pub async fn set_current(&self, id: Option<ChatId>) {
        self.inner.write().await.current = id;
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.read().await.messages.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn set_messages(&self, messages: Vec<Message>) {
        self.inner.write().await.messages = messages;
    }

    pub async fn append_messages(&self, mut messages: Vec<Message>) {
        self.inner.write().await.messages.append(&mut messages);
    }

    pub async fn clear_messages(&self) {
        self.inner.write().await.messages.clear();
    }

    /// Append a message and return its list index.
    pub async fn push_message(&self, message: Message) -> usize {
        let mut g = self.inner.write().await;
        g.messages.push(message);
        g.messages.len() - 1
    }

    /// Overwrite the entry at `index` with resolved content. This is how the in-flight
    /// placeholder becomes the final reply; the entry is never duplicated.
    pub async fn replace_message(
        &self,
        index: usize,
        content: impl Into<String>,
        loading: bool,
    ) -> Result<(), String> {
        let mut g = self.inner.write().await;
        let slot = g
            .messages
            .get_mut(index)
            .ok_or_else(|| format!("no message at index {}", index))?;
        slot.content = content.into();
        slot.loading = loading;
        Ok(())
    }

    pub async fn chats(&self) -> Vec<ChatSummary> {
        self.inner.read().await.chats.clone()
    }

    pub async fn set_chats(&self, chats: Vec<ChatSummary>) {
        self.inner.write().await.chats = chats;
    }

    pub async fn archived(&self) -> Vec<ChatSummary> {
        self.inner.read().await.archived.clone()
    }

    pub async fn set_archived(&self, chats: Vec<ChatSummary>) {
        self.inner.write().await.archived = chats;
    }

    pub async fn images(&self) -> Vec<ImageRecord> {
        self.inner.read().await.images.clone()
    }

    pub async fn set_images(&self, images: Vec<ImageRecord>) {
        self.inner.write().await.images = images;
    }

    /// Bump the cached persisted-message counter for a chat.
    pub async fn bump_msg_len(&self, id: ChatId, by: u64) {
        let mut g = self.inner.write().await;
        if let Some(chat) = g.chats.iter_mut().find(|c| c.id == id) {
            chat.msg_len += by;
        }
    }

    pub async fn set_chat_name(&self, id: ChatId, name: impl Into<String>) {
        let name = name.into();
        let mut g = self.inner.write().await;
        if let Some(chat) = g.chats.iter_mut().find(|c| c.id == id) {
            chat.name = name;
        } else if let Some(chat) = g.archived.iter_mut().find(|c| c.id == id) {
            chat.name = name;
        }
    }

    /// Drop a chat from both cached lists. When it was the open chat, the current id
    /// and message list are cleared too. Returns true if it was the open chat.
    pub async fn remove_chat(&self, id: ChatId) -> bool {
        let mut g = self.inner.write().await;
        g.chats.retain(|c| c.id != id);
        g.archived.retain(|c| c.id != id);
        if g.current == Some(id) {
            g.current = None;
            g.messages.clear();
            true
        } else {
            false
        }
    }

    /// Move a chat between the active and archive lists. Archiving the open chat
    /// clears the current id and message list.
    pub async fn set_chat_archived(&self, id: ChatId, archived: bool) {
        let mut g = self.inner.write().await;
        if archived {
            if let Some(pos) = g.chats.iter().position(|c| c.id == id) {
                let mut chat = g.chats.remove(pos);
                chat.archived = true;
                g.archived.push(chat);
            }
            if g.current == Some(id) {
                g.current = None;
                g.messages.clear();
            }
        } else if let Some(pos) = g.archived.iter().position(|c| c.id == id) {
            let mut chat = g.archived.remove(pos);
            chat.archived = false;
            g.chats.push(chat);
        }
    }

    pub async fn reset_pending(&self) -> bool {
        self.inner.read().await.reset_pending
    }

    /// Mark a failure reset as scheduled. Returns false when one is already pending.
    pub async fn try_begin_reset(&self) -> bool {
        let mut g = self.inner.write().await;
        if g.reset_pending {
            return false;
        }
        g.reset_pending = true;
        true
    }

    pub async fn finish_reset(&self) {
        self.inner.write().await.reset_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: ChatId, name: &str, msg_len: u64) -> ChatSummary {
        ChatSummary {
            id,
            name: name.to_string(),
            msg_len,
            archived: false,
        }
    }

    #[test]
    fn chat_id_parses_uuid_with_hyphens() {
        let id = ChatId::parse_uuid("550e8400-e29b-41d4-a716-446655440000").expect("parse");
        assert_eq!(id.0[0], 0x55);
        assert_eq!(id.0[15], 0x00);
        assert_eq!(id.to_string(), "550e8400e29b41d4a716446655440000");
    }

    #[test]
    fn chat_id_rejects_short_input() {
        assert!(ChatId::parse_uuid("abc").is_err());
        assert!(ChatId::parse_uuid("zz0e8400-e29b-41d4-a716-446655440000").is_err());
    }

    #[test]
    fn generated_chat_id_round_trips() {
        let id = ChatId::generate();
        let parsed = ChatId::parse_uuid(&id.to_string()).expect("parse own display form");
        assert_eq!(id, parsed);
    }

    #[tokio::test]
    async fn push_returns_stable_index_and_replace_overwrites_in_place() {
        let store = ClientStore::new();
        store.push_message(Message::user("hi", 1)).await;
        let idx = store.push_message(Message::loading("assistant", "Thinking...", 2)).await;
        assert_eq!(idx, 1);

        store.replace_message(idx, "hello there", false).await.expect("replace");
        let messages = store.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "hello there");
        assert!(!messages[1].loading);
        // timestamp from insertion time is kept
        assert_eq!(messages[1].etc.timestamp_ms, 2);
    }

    #[tokio::test]
    async fn replace_out_of_range_is_an_error() {
        let store = ClientStore::new();
        assert!(store.replace_message(0, "x", false).await.is_err());
    }

    #[tokio::test]
    async fn remove_chat_clears_current_and_messages() {
        let store = ClientStore::new();
        let id = ChatId::generate();
        store.set_chats(vec![summary(id, "one", 2)]).await;
        store.set_current(Some(id)).await;
        store.push_message(Message::user("hi", 1)).await;

        assert!(store.remove_chat(id).await);
        assert!(store.chats().await.is_empty());
        assert_eq!(store.current().await, None);
        assert!(store.messages().await.is_empty());
    }

    #[tokio::test]
    async fn archive_moves_between_lists_and_clears_open_chat() {
        let store = ClientStore::new();
        let id = ChatId::generate();
        store.set_chats(vec![summary(id, "one", 2)]).await;
        store.set_current(Some(id)).await;

        store.set_chat_archived(id, true).await;
        assert!(store.chats().await.is_empty());
        let archived = store.archived().await;
        assert_eq!(archived.len(), 1);
        assert!(archived[0].archived);
        assert_eq!(store.current().await, None);

        store.set_chat_archived(id, false).await;
        assert_eq!(store.chats().await.len(), 1);
        assert!(store.archived().await.is_empty());
    }

    #[tokio::test]
    async fn bump_msg_len_touches_only_the_given_chat() {
        let store = ClientStore::new();
        let a = ChatId::generate();
        let b = ChatId::generate();
        store.set_chats(vec![summary(a, "a", 2), summary(b, "b", 4)]).await;

        store.bump_msg_len(a, 2).await;
        let chats = store.chats().await;
        assert_eq!(chats[0].msg_len, 4);
        assert_eq!(chats[1].msg_len, 4);
    }

    #[tokio::test]
    async fn session_defaults_are_anonymous() {
        let store = ClientStore::new();
        let session = store.session().await;
        assert!(!session.logged_in);
        assert!(session.principal.is_none());
        assert_eq!(session.username, "Anonymous");
    }

    #[tokio::test]
    async fn reset_flag_is_claimed_once() {
        let store = ClientStore::new();
        assert!(store.try_begin_reset().await);
        assert!(!store.try_begin_reset().await);
        store.finish_reset().await;
        assert!(store.try_begin_reset().await);
    }
}
