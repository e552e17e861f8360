use crate::api::PricingBackend;
use crate::contract::chat::{ChatMessage, ChatRequest, ChatStreamEvent, StreamOptions};
use crate::store::{ChatStore, ContextStore};
use anyhow::{anyhow, bail, Context};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One analyst conversation with the pricing assistant.
///
/// Every request carries the current market context and a session id that
/// stays fixed for the lifetime of the session. At most one reply is in
/// flight at a time; a second send fails with [`crate::store::ChatBusy`]
/// without touching the transcript.
pub struct ChatSession {
    backend: Arc<dyn PricingBackend>,
    chat: Arc<ChatStore>,
    context: Arc<ContextStore>,
    session_id: String,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn PricingBackend>,
        chat: Arc<ChatStore>,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            backend,
            chat,
            context,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn request(&self, text: &str) -> ChatRequest {
        ChatRequest {
            message: text.to_string(),
            context: Some(self.context.context()),
            session_id: Some(self.session_id.clone()),
        }
    }

    fn open(&self, text: &str) -> anyhow::Result<String> {
        let text = text.trim();
        if text.is_empty() {
            bail!("chat message is empty");
        }
        self.chat.begin_stream()?;
        self.chat.add_message(ChatMessage::user(text));
        Ok(text.to_string())
    }

    fn last_reply(&self) -> Option<ChatMessage> {
        self.chat.snapshot().messages.pop()
    }

    /// Sends without streaming and returns the assistant reply.
    pub async fn send(&self, text: &str) -> anyhow::Result<ChatMessage> {
        let text = self.open(text)?;

        match self.backend.chat(&self.request(&text)).await {
            Ok(res) => {
                self.chat
                    .finish_stream(&res.response, res.tools_used, res.confidence);
                self.last_reply().context("chat reply was not recorded")
            }
            Err(err) => {
                self.chat.fail_stream(err.to_string());
                Err(anyhow::Error::new(err).context("chat request failed"))
            }
        }
    }

    /// Streams the reply into the chat store as it arrives.
    ///
    /// Returns the finalized assistant message, or `None` when `cancel` fired
    /// before anything was received.
    pub async fn send_streaming(
        &self,
        text: &str,
        opts: &StreamOptions,
        cancel: CancellationToken,
    ) -> anyhow::Result<Option<ChatMessage>> {
        let text = self.open(text)?;

        let mut stream = match self
            .backend
            .chat_stream(&self.request(&text), opts, cancel.clone())
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.chat.fail_stream(err.to_string());
                return Err(anyhow::Error::new(err).context("failed to open chat stream"));
            }
        };

        // The connection is closed before the reply slot is released.
        let mut final_message = None;
        while let Some(item) = stream.next_event().await {
            match item {
                Ok(ChatStreamEvent::Token(token)) => self.chat.append_token(&token),
                Ok(ChatStreamEvent::ToolCall { tool, args }) => {
                    tracing::debug!(%tool, %args, "assistant tool call");
                    self.chat.record_tool_call(&tool);
                }
                Ok(ChatStreamEvent::Message {
                    content,
                    tools_used,
                    confidence,
                }) => {
                    final_message = Some((content, tools_used, confidence));
                    break;
                }
                Ok(ChatStreamEvent::Error(message)) => {
                    drop(stream);
                    self.chat.fail_stream(message.clone());
                    return Err(anyhow!("assistant reported an error: {message}"));
                }
                Err(err) => {
                    drop(stream);
                    self.chat.fail_stream(err.to_string());
                    return Err(anyhow::Error::new(err).context("chat stream interrupted"));
                }
            }
        }
        drop(stream);

        if let Some((content, tools_used, confidence)) = final_message {
            self.chat.finish_stream(&content, tools_used, confidence);
            return Ok(self.last_reply());
        }
        if cancel.is_cancelled() {
            tracing::info!(session = %self.session_id, "chat stream cancelled");
            let before = self.chat.snapshot().messages.len();
            self.chat.cancel_stream();
            let state = self.chat.snapshot();
            return Ok(if state.messages.len() > before {
                state.messages.last().cloned()
            } else {
                None
            });
        }
        if self.chat.snapshot().streaming_content.trim().is_empty() {
            self.chat.fail_stream("chat stream ended without a reply");
            bail!("chat stream ended without a reply");
        }

        self.chat.finish_stream("", Vec::new(), None);
        Ok(self.last_reply())
    }

    pub fn clear(&self) {
        self.chat.clear();
    }
}
