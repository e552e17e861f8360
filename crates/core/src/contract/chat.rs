use crate::contract::context::MarketContext;
use crate::contract::{Contract, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            tools_used: Vec::new(),
            confidence: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn with_tools(mut self, tools_used: Vec<String>, confidence: Option<f64>) -> Self {
        self.tools_used = tools_used;
        self.confidence = confidence;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<MarketContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Contract for ChatResponse {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };
        v.required_string(obj, "response");
        v.string_array(obj, "tools_used");
        let confidence = v.optional_number(obj, "confidence");
        v.range("confidence", confidence, 0.0, 1.0);
    }
}

/// Query options for `POST /api/v1/chat?stream=true`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOptions {
    pub plan: bool,
    /// Seconds between server keepalives; `None` disables them.
    pub keepalive_interval: Option<u32>,
    pub model: Option<String>,
}

impl StreamOptions {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("stream", "true".to_string())];
        if self.plan {
            pairs.push(("plan", "true".to_string()));
        }
        if let Some(interval) = self.keepalive_interval {
            pairs.push(("keepalive", "true".to_string()));
            pairs.push(("interval", interval.to_string()));
        }
        if let Some(model) = self.model.as_deref().filter(|m| !m.trim().is_empty()) {
            pairs.push(("model", model.to_string()));
        }
        pairs
    }
}

/// One decoded event of the chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    Token(String),
    ToolCall { tool: String, args: Value },
    Message {
        content: String,
        tools_used: Vec<String>,
        confidence: Option<f64>,
    },
    Error(String),
}
