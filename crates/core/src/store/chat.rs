use crate::contract::chat::{ChatMessage, Role};
use crate::storage::{load_json, save_json, KeyValueStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub const CHAT_KEY: &str = "farecast.chat";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    /// Tokens of the in-flight reply, not yet a message.
    pub streaming_content: String,
    pub is_streaming: bool,
    pub active_tools: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatBusy;

impl fmt::Display for ChatBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a chat stream is already in flight")
    }
}

impl std::error::Error for ChatBusy {}

/// Chat transcript. Finalized messages are persisted; the streaming buffer is not.
pub struct ChatStore {
    state: watch::Sender<ChatState>,
    storage: Arc<dyn KeyValueStore>,
}

impl ChatStore {
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let messages = load_json::<Vec<ChatMessage>>(storage.as_ref(), CHAT_KEY).unwrap_or_default();
        let (state, _) = watch::channel(ChatState {
            messages,
            ..Default::default()
        });
        Self { state, storage }
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.borrow().is_streaming
    }

    fn persist(&self, messages: &[ChatMessage]) {
        save_json(self.storage.as_ref(), CHAT_KEY, &messages);
    }

    pub fn add_message(&self, message: ChatMessage) {
        self.state.send_modify(|s| {
            s.messages.push(message);
            self.persist(&s.messages);
        });
    }

    /// Claims the single stream slot.
    pub fn begin_stream(&self) -> Result<(), ChatBusy> {
        let mut busy = false;
        self.state.send_if_modified(|s| {
            if s.is_streaming {
                busy = true;
                return false;
            }
            s.is_streaming = true;
            s.streaming_content.clear();
            s.active_tools.clear();
            s.error = None;
            true
        });
        if busy {
            Err(ChatBusy)
        } else {
            Ok(())
        }
    }

    pub fn append_token(&self, token: &str) {
        self.state.send_if_modified(|s| {
            if !s.is_streaming || token.is_empty() {
                return false;
            }
            s.streaming_content.push_str(token);
            true
        });
    }

    pub fn record_tool_call(&self, tool: &str) {
        self.state.send_if_modified(|s| {
            if !s.is_streaming || s.active_tools.iter().any(|t| t == tool) {
                return false;
            }
            s.active_tools.push(tool.to_string());
            true
        });
    }

    /// Turns the in-flight reply into a message. An empty `content` falls back
    /// to the buffered tokens.
    pub fn finish_stream(&self, content: &str, tools_used: Vec<String>, confidence: Option<f64>) {
        self.state.send_if_modified(|s| {
            if !s.is_streaming {
                return false;
            }
            let content = if content.is_empty() {
                std::mem::take(&mut s.streaming_content)
            } else {
                content.to_string()
            };
            let mut tools = std::mem::take(&mut s.active_tools);
            for tool in tools_used {
                if !tools.contains(&tool) {
                    tools.push(tool);
                }
            }

            s.messages
                .push(ChatMessage::new(Role::Assistant, content).with_tools(tools, confidence));
            s.streaming_content.clear();
            s.is_streaming = false;
            self.persist(&s.messages);
            true
        });
    }

    pub fn fail_stream(&self, error: impl Into<String>) {
        let error = error.into();
        self.state.send_modify(|s| {
            s.is_streaming = false;
            s.streaming_content.clear();
            s.active_tools.clear();
            s.error = Some(error);
        });
    }

    /// Stops the in-flight reply, keeping whatever arrived as a message.
    pub fn cancel_stream(&self) {
        self.state.send_if_modified(|s| {
            if !s.is_streaming {
                return false;
            }
            let partial = std::mem::take(&mut s.streaming_content);
            let tools = std::mem::take(&mut s.active_tools);
            s.is_streaming = false;
            if !partial.trim().is_empty() {
                s.messages
                    .push(ChatMessage::new(Role::Assistant, partial).with_tools(tools, None));
                self.persist(&s.messages);
            }
            true
        });
    }

    pub fn clear(&self) {
        self.state.send_replace(ChatState::default());
        if let Err(err) = self.storage.remove(CHAT_KEY) {
            tracing::warn!(error = %err, "failed to clear persisted chat");
        }
    }
}
