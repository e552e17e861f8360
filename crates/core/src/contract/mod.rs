//! Data contracts exchanged with the pricing backend.
//!
//! Every response shape implements [`Contract`]: the raw JSON is checked
//! first and any deviation is reported as a list of [`Issue`]s carrying the
//! dotted field path, so a mismatch names the offending field instead of
//! surfacing as an opaque decode error.

pub mod chat;
pub mod context;
pub mod evidence;
pub mod health;
pub mod pricing;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    Required,
    InvalidType,
    TooSmall,
    InvalidValue,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueCode::Required => "required",
            IssueCode::InvalidType => "invalid_type",
            IssueCode::TooSmall => "too_small",
            IssueCode::InvalidValue => "invalid_value",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
    pub code: IssueCode,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { &self.path };
        write!(f, "{path}: {} ({})", self.message, self.code)
    }
}

pub trait Contract: DeserializeOwned {
    /// Checks the raw value, pushing one issue per violation.
    fn validate(value: &Value, v: &mut Validator);
}

/// Validates then decodes `value` as `C`.
pub fn decode<C: Contract>(value: &Value) -> Result<C, Vec<Issue>> {
    let mut validator = Validator::default();
    C::validate(value, &mut validator);
    let issues = validator.into_issues();
    if !issues.is_empty() {
        return Err(issues);
    }

    serde_json::from_value::<C>(value.clone()).map_err(|err| {
        vec![Issue {
            path: String::new(),
            message: err.to_string(),
            code: IssueCode::InvalidType,
        }]
    })
}

#[derive(Debug, Default)]
pub struct Validator {
    path: Vec<String>,
    issues: Vec<Issue>,
}

impl Validator {
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    fn path_with(&self, key: &str) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        if !key.is_empty() {
            parts.push(key);
        }
        parts.join(".")
    }

    pub fn push(&mut self, key: &str, code: IssueCode, message: impl Into<String>) {
        let path = self.path_with(key);
        self.issues.push(Issue {
            path,
            message: message.into(),
            code,
        });
    }

    /// Runs `f` with `key` appended to the current path.
    pub fn scoped<R>(&mut self, key: impl Into<String>, f: impl FnOnce(&mut Self) -> R) -> R {
        self.path.push(key.into());
        let out = f(self);
        self.path.pop();
        out
    }

    pub fn object<'a>(&mut self, value: &'a Value) -> Option<&'a Map<String, Value>> {
        match value {
            Value::Object(map) => Some(map),
            other => {
                self.push(
                    "",
                    IssueCode::InvalidType,
                    format!("expected object, received {}", type_name(other)),
                );
                None
            }
        }
    }

    pub fn required_number(&mut self, obj: &Map<String, Value>, key: &str) -> Option<f64> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(key, IssueCode::Required, "required");
                None
            }
            Some(value) => self.number(key, value),
        }
    }

    pub fn optional_number(&mut self, obj: &Map<String, Value>, key: &str) -> Option<f64> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => self.number(key, value),
        }
    }

    fn number(&mut self, key: &str, value: &Value) -> Option<f64> {
        match value.as_f64() {
            Some(n) if n.is_finite() => Some(n),
            _ => {
                self.push(
                    key,
                    IssueCode::InvalidType,
                    format!("expected number, received {}", type_name(value)),
                );
                None
            }
        }
    }

    pub fn required_string<'a>(&mut self, obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(key, IssueCode::Required, "required");
                None
            }
            Some(value) => self.string(key, value),
        }
    }

    pub fn optional_string<'a>(&mut self, obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => self.string(key, value),
        }
    }

    fn string<'a>(&mut self, key: &str, value: &'a Value) -> Option<&'a str> {
        match value {
            Value::String(s) => Some(s),
            other => {
                self.push(
                    key,
                    IssueCode::InvalidType,
                    format!("expected string, received {}", type_name(other)),
                );
                None
            }
        }
    }

    pub fn optional_bool(&mut self, obj: &Map<String, Value>, key: &str) -> Option<bool> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(other) => {
                self.push(
                    key,
                    IssueCode::InvalidType,
                    format!("expected boolean, received {}", type_name(other)),
                );
                None
            }
        }
    }

    /// Validates each element of an optional array field with `each`.
    /// A missing or null field is accepted and decodes as empty.
    pub fn optional_array(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        mut each: impl FnMut(&mut Self, &Value),
    ) {
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => self.scoped(key, |v| {
                for (idx, item) in items.iter().enumerate() {
                    v.scoped(idx.to_string(), |v| each(v, item));
                }
            }),
            Some(other) => self.push(
                key,
                IssueCode::InvalidType,
                format!("expected array, received {}", type_name(other)),
            ),
        }
    }

    pub fn optional_object(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        f: impl FnOnce(&mut Self, &Map<String, Value>),
    ) {
        match obj.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Object(inner)) => self.scoped(key, |v| f(v, inner)),
            Some(other) => self.push(
                key,
                IssueCode::InvalidType,
                format!("expected object, received {}", type_name(other)),
            ),
        }
    }

    pub fn required_object(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        f: impl FnOnce(&mut Self, &Map<String, Value>),
    ) {
        match obj.get(key) {
            None | Some(Value::Null) => self.push(key, IssueCode::Required, "required"),
            Some(_) => self.optional_object(obj, key, f),
        }
    }

    pub fn string_array(&mut self, obj: &Map<String, Value>, key: &str) {
        self.optional_array(obj, key, |v, item| {
            if !item.is_string() {
                v.push(
                    "",
                    IssueCode::InvalidType,
                    format!("expected string, received {}", type_name(item)),
                );
            }
        });
    }

    pub fn min(&mut self, key: &str, value: Option<f64>, min: f64) {
        if let Some(n) = value {
            if n < min {
                self.push(
                    key,
                    IssueCode::TooSmall,
                    format!("number must be greater than or equal to {min}"),
                );
            }
        }
    }

    /// Flags a number that is not an integer where a count is expected.
    pub fn integer(&mut self, obj: &Map<String, Value>, key: &str) {
        if let Some(Value::Number(n)) = obj.get(key) {
            if !n.is_u64() && !n.is_i64() {
                self.push(
                    key,
                    IssueCode::InvalidType,
                    format!("expected integer, received {n}"),
                );
            }
        }
    }

    pub fn range(&mut self, key: &str, value: Option<f64>, min: f64, max: f64) {
        if let Some(n) = value {
            if !(min..=max).contains(&n) {
                self.push(
                    key,
                    IssueCode::InvalidValue,
                    format!("number must be between {min} and {max} (got {n})"),
                );
            }
        }
    }

    pub fn one_of(&mut self, key: &str, value: Option<&str>, allowed: &[&str]) {
        if let Some(s) = value {
            if !allowed.contains(&s) {
                self.push(
                    key,
                    IssueCode::InvalidValue,
                    format!("expected one of {}, received '{s}'", allowed.join(" | ")),
                );
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
