use crate::contract::{Contract, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub model_loaded: Option<bool>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy") && self.model_loaded != Some(false)
    }
}

impl Contract for HealthResponse {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };
        v.required_string(obj, "status");
        v.optional_string(obj, "version");
        v.optional_bool(obj, "model_loaded");
    }
}
