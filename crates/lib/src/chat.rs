//! Chat orchestration: login/logout, chat lifecycle, and the send-message turn.
//!
//! One `ChatClient` per client instance. Every durable operation is forwarded to the
//! backend; the store only ever reflects what this layer has done. A send turn appends
//! the user message, inserts a loading placeholder, awaits the AI reply, and settles
//! the placeholder in place at its recorded index.

use crate::backend::{BackendClient, BackendError, HistoryEntry};
use crate::config::{self, Config};
use crate::descriptor::generate_image_descriptor;
use crate::identity::{DeviceIdentity, IdentityError, IdentityProvider};
use crate::store::{ChatId, ClientStore, Message, Session};
use std::sync::Arc;
use std::time::Duration;

/// Content of the placeholder entry while a reply is in flight.
pub const THINKING_LABEL: &str = "Thinking...";
/// Substituted reply when the AI call times out; the conversation continues.
pub const TIMEOUT_FALLBACK: &str = "Something Wrong";
/// Substituted reply when the AI call fails outright; a session reset follows.
pub const SERVICE_FALLBACK: &str = "AI service error. Reloading...";

pub const DEFAULT_HISTORY_WINDOW: usize = 7;
pub const DEFAULT_RESET_DELAY: Duration = Duration::from_millis(1500);

/// Grid size of generated placeholder images.
const DRAW_GRID_ROWS: u32 = 8;
const DRAW_GRID_COLS: u32 = 8;

const MAX_AUTO_TITLE_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("{0}")]
    State(String),
}

/// Client-side chat orchestrator: session flow plus chat/message lifecycle.
pub struct ChatClient {
    store: Arc<ClientStore>,
    backend: BackendClient,
    provider: Arc<dyn IdentityProvider>,
    history_window: usize,
    reset_delay: Duration,
}

impl ChatClient {
    pub fn new(
        store: Arc<ClientStore>,
        backend: BackendClient,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            backend,
            provider,
            history_window: DEFAULT_HISTORY_WINDOW,
            reset_delay: DEFAULT_RESET_DELAY,
        }
    }

    /// Build a client from config: backend URL and chat knobs come from the config,
    /// with environment overrides applied.
    pub fn from_config(
        config: &Config,
        store: Arc<ClientStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        let backend = BackendClient::new(Some(config::resolve_backend_url(config)));
        Self {
            store,
            backend,
            provider,
            history_window: config.chat.history_window,
            reset_delay: Duration::from_millis(config.chat.reset_delay_ms),
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    pub fn store(&self) -> &Arc<ClientStore> {
        &self.store
    }

    async fn principal(&self) -> Result<crate::identity::Principal, ChatError> {
        self.store
            .session()
            .await
            .principal
            .ok_or(ChatError::NotLoggedIn)
    }

    /// Run the identity-provider flow. On success the session becomes logged-in, the
    /// username is resolved from the backend, and the chat list is loaded. On failure
    /// the session is left unchanged; there is no retry.
    pub async fn login(&self, device: &DeviceIdentity) -> Result<Session, ChatError> {
        let grant = self.provider.login(device).await?;
        let name = self.backend.get_user_name(&grant.principal).await?;

        let mut session = Session::anonymous();
        session.logged_in = true;
        session.principal = Some(grant.principal);
        if !name.is_empty() {
            session.username = name;
        }
        self.store.set_session(session.clone()).await;

        self.load().await?;
        Ok(session)
    }

    /// Clear the session back to anonymous defaults and drop the open chat's messages.
    /// Cached chat/archive/image lists are left alone; they are re-fetched on next load.
    pub async fn logout(&self) -> Result<(), ChatError> {
        let session = self.store.session().await;
        self.store.clear_session().await;
        self.store.clear_messages().await;
        if let Some(principal) = session.principal {
            if let Err(e) = self.provider.logout(&principal).await {
                log::warn!("provider-side logout failed: {}", e);
            }
        }
        Ok(())
    }

    /// Set the username locally first, then persist it. The local value is not rolled
    /// back when the remote call fails; the error is still returned.
    pub async fn rename_user(&self, name: &str) -> Result<(), ChatError> {
        self.store.set_username(name).await;
        let principal = self.principal().await?;
        self.backend.set_user_name(&principal, name).await?;
        Ok(())
    }

    /// Create a new chat: generate a 16-byte id from a UUID string, persist it, reload
    /// the chat list, and make it the open chat.
    pub async fn create(&self, name: &str) -> Result<ChatId, ChatError> {
        let principal = self.principal().await?;
        let id = ChatId::generate();
        self.backend.create_new_chat(&principal, id, name).await?;
        self.load().await?;
        self.store.set_current(Some(id)).await;
        self.store.clear_messages().await;
        log::info!("created chat {} ({})", id, name);
        Ok(id)
    }

    /// Open a chat: fetch its full history and replace the message list.
    pub async fn open(&self, id: ChatId) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        let stored = self.backend.get_chat_history(&principal, id, 0).await?;
        self.store.set_current(Some(id)).await;
        self.store
            .set_messages(stored.into_iter().map(Message::from).collect())
            .await;
        Ok(())
    }

    /// Fetch only messages past the locally known length and append them.
    pub async fn refresh(&self) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        let Some(id) = self.store.current().await else {
            return Ok(());
        };
        let known_len = self.store.message_count().await as u64;
        let stored = self
            .backend
            .get_chat_history(&principal, id, known_len)
            .await?;
        self.store
            .append_messages(stored.into_iter().map(Message::from).collect())
            .await;
        Ok(())
    }

    /// Refresh the cached chat list.
    pub async fn load(&self) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        let chats = self.backend.list_chats(&principal, false).await?;
        self.store.set_chats(chats).await;
        Ok(())
    }

    /// Refresh the cached archive list.
    pub async fn load_archives(&self) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        let chats = self.backend.list_chats(&principal, true).await?;
        self.store.set_archived(chats).await;
        Ok(())
    }

    /// Refresh the cached image gallery.
    pub async fn load_images(&self) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        let images = self.backend.get_all_images(&principal).await?;
        self.store.set_images(images).await;
        Ok(())
    }

    /// Rename a chat locally first, then persist; no rollback on remote failure.
    pub async fn rename(&self, id: ChatId, name: &str) -> Result<(), ChatError> {
        self.store.set_chat_name(id, name).await;
        let principal = self.principal().await?;
        self.backend.rename_chat(&principal, id, name).await?;
        Ok(())
    }

    /// Delete a chat remotely, then drop it from the cached lists. Deleting the open
    /// chat clears the current id and the message list.
    pub async fn delete(&self, id: ChatId) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        self.backend.delete_chat(&principal, id).await?;
        self.store.remove_chat(id).await;
        Ok(())
    }

    /// Archive or restore a chat remotely, then move it between the cached lists.
    pub async fn archive(&self, id: ChatId, archived: bool) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        self.backend.archive_chat(&principal, id, archived).await?;
        self.store.set_chat_archived(id, archived).await;
        Ok(())
    }

    /// Rate-limit check: whether the user may send another prompt.
    pub async fn try_prompt(&self) -> Result<bool, ChatError> {
        let principal = self.principal().await?;
        Ok(self.backend.try_increment_user_prompt(&principal).await?)
    }

    /// Replace an image message locally first, then persist; no rollback on failure.
    pub async fn update_image(&self, index: usize, image: &str) -> Result<(), ChatError> {
        let principal = self.principal().await?;
        let id = self
            .store
            .current()
            .await
            .ok_or_else(|| ChatError::State("no chat open".to_string()))?;
        self.store
            .replace_message(index, image, false)
            .await
            .map_err(ChatError::State)?;
        self.backend
            .update_image(&principal, id, index as u64, image)
            .await?;
        Ok(())
    }

    /// One send turn. Appends the user message locally and remotely, inserts a loading
    /// placeholder, awaits the AI reply, settles the placeholder in place, persists the
    /// reply, and bumps the chat's cached message counter by 2.
    ///
    /// A timed-out AI call settles to a fixed fallback and the conversation continues.
    /// Any other AI failure settles to an error message and schedules a session reset;
    /// so does any failure escaping the turn (the persisted user message stays).
    pub async fn chat(&self, message: &str, tag: &str) -> Result<String, ChatError> {
        match self.chat_inner(message, tag).await {
            Ok(content) => Ok(content),
            Err(err) => {
                log::warn!("chat turn failed: {}", err);
                self.schedule_session_reset().await;
                Err(err)
            }
        }
    }

    async fn chat_inner(&self, message: &str, tag: &str) -> Result<String, ChatError> {
        let principal = self.principal().await?;
        let chat_id = match self.store.current().await {
            Some(id) => id,
            None => self.create(&auto_title(message)).await?,
        };

        // Context window is taken before the new user message is appended.
        let history = self.context_window().await;

        let sent_at = now_ms();
        self.store.push_message(Message::user(message, sent_at)).await;
        self.backend
            .add_chat_message(&principal, chat_id, message, "user", 0, 0, sent_at)
            .await?;

        let reply_at = now_ms();
        let placeholder = self
            .store
            .push_message(Message::loading(tag, THINKING_LABEL, reply_at))
            .await;

        let content = match self.backend.chat(message, tag, &history).await {
            Ok(reply) => reply,
            Err(err) if err.is_timeout() => {
                log::warn!("ai call timed out: {}", err);
                TIMEOUT_FALLBACK.to_string()
            }
            Err(err) => {
                log::error!("ai call failed: {}", err);
                self.schedule_session_reset().await;
                SERVICE_FALLBACK.to_string()
            }
        };

        // Settle the placeholder at its recorded index; never append a second entry.
        self.store
            .replace_message(placeholder, &content, false)
            .await
            .map_err(ChatError::State)?;
        self.backend
            .add_chat_message(&principal, chat_id, &content, tag, 0, 0, reply_at)
            .await?;
        self.store.bump_msg_len(chat_id, 2).await;
        Ok(content)
    }

    /// One draw turn: same placeholder lifecycle as `chat`, but the reply is an image.
    /// The generated grid descriptor is sent along as the provisional image content.
    pub async fn draw(&self, query: &str, tag: &str) -> Result<String, ChatError> {
        match self.draw_inner(query, tag).await {
            Ok(content) => Ok(content),
            Err(err) => {
                log::warn!("draw turn failed: {}", err);
                self.schedule_session_reset().await;
                Err(err)
            }
        }
    }

    async fn draw_inner(&self, query: &str, tag: &str) -> Result<String, ChatError> {
        let principal = self.principal().await?;
        let chat_id = match self.store.current().await {
            Some(id) => id,
            None => self.create(&auto_title(query)).await?,
        };

        let sent_at = now_ms();
        self.store.push_message(Message::user(query, sent_at)).await;
        self.backend
            .add_chat_message(&principal, chat_id, query, "user", 0, 0, sent_at)
            .await?;

        let reply_at = now_ms();
        let placeholder = self
            .store
            .push_message(Message::loading(tag, THINKING_LABEL, reply_at))
            .await;

        let provisional = generate_image_descriptor(query, DRAW_GRID_ROWS, DRAW_GRID_COLS, None);
        let content = match self.backend.ask_ai_draw(query, tag, &provisional).await {
            Ok(image) => image,
            Err(err) if err.is_timeout() => {
                log::warn!("draw call timed out: {}", err);
                TIMEOUT_FALLBACK.to_string()
            }
            Err(err) => {
                log::error!("draw call failed: {}", err);
                self.schedule_session_reset().await;
                SERVICE_FALLBACK.to_string()
            }
        };

        self.store
            .replace_message(placeholder, &content, false)
            .await
            .map_err(ChatError::State)?;
        self.backend
            .add_chat_message(
                &principal,
                chat_id,
                &content,
                tag,
                DRAW_GRID_COLS,
                DRAW_GRID_ROWS,
                reply_at,
            )
            .await?;
        self.store.bump_msg_len(chat_id, 2).await;
        Ok(content)
    }

    /// The last `history_window` messages as (role, content) pairs.
    async fn context_window(&self) -> Vec<HistoryEntry> {
        let messages = self.store.messages().await;
        let start = messages.len().saturating_sub(self.history_window);
        messages[start..]
            .iter()
            .map(|m| HistoryEntry {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Schedule a reset of the chat-session state after `reset_delay`: clear the message
    /// list, re-fetch the chat list, and re-open the current chat from the backend.
    /// Session and image state are untouched. At most one reset is pending at a time.
    async fn schedule_session_reset(&self) {
        if !self.store.try_begin_reset().await {
            return;
        }
        log::warn!(
            "scheduling chat session reset in {}ms",
            self.reset_delay.as_millis()
        );
        let store = self.store.clone();
        let backend = self.backend.clone();
        let delay = self.reset_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(principal) = store.session().await.principal else {
                store.finish_reset().await;
                return;
            };
            store.clear_messages().await;
            match backend.list_chats(&principal, false).await {
                Ok(chats) => store.set_chats(chats).await,
                Err(e) => log::warn!("reset: chat list reload failed: {}", e),
            }
            if let Some(id) = store.current().await {
                match backend.get_chat_history(&principal, id, 0).await {
                    Ok(stored) => {
                        store
                            .set_messages(stored.into_iter().map(Message::from).collect())
                            .await
                    }
                    Err(e) => log::warn!("reset: history reload failed: {}", e),
                }
            }
            store.finish_reset().await;
        });
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Title for a chat auto-created from its first message.
fn auto_title(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return "New chat".to_string();
    }
    let mut title: String = trimmed.chars().take(MAX_AUTO_TITLE_LEN).collect();
    if trimmed.chars().count() > MAX_AUTO_TITLE_LEN {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_title_truncates_long_messages() {
        assert_eq!(auto_title("Hello"), "Hello");
        assert_eq!(auto_title("   "), "New chat");
        let long = "x".repeat(40);
        let title = auto_title(&long);
        assert_eq!(title.chars().count(), MAX_AUTO_TITLE_LEN + 3);
        assert!(title.ends_with("..."));
    }
}
