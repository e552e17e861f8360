use crate::contract::Issue;
use serde_json::Value;
use std::fmt;

/// A backend response whose shape deviates from its contract.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub endpoint: String,
    pub issues: Vec<Issue>,
    pub raw: Value,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "response from {} failed validation ({} issue{})",
            self.endpoint,
            self.issues.len(),
            if self.issues.len() == 1 { "" } else { "s" }
        )?;
        if let Some(first) = self.issues.first() {
            write!(f, ": {first}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum ApiError {
    /// Connection, timeout or body read failure, as reported by the HTTP client.
    Transport(reqwest::Error),
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// The body was not JSON at all.
    Decode {
        endpoint: String,
        source: serde_json::Error,
    },
    Validation(ValidationError),
}

impl ApiError {
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            ApiError::Validation(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(e) => write!(f, "request failed: {e}"),
            ApiError::Status {
                endpoint,
                status,
                body,
            } => {
                write!(f, "{endpoint} returned HTTP {status}")?;
                let body = body.trim();
                if !body.is_empty() {
                    let snippet: String = body.chars().take(200).collect();
                    write!(f, ": {snippet}")?;
                }
                Ok(())
            }
            ApiError::Decode { endpoint, source } => {
                write!(f, "{endpoint} returned invalid JSON: {source}")
            }
            ApiError::Validation(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Transport(e) => Some(e),
            ApiError::Decode { source, .. } => Some(source),
            ApiError::Validation(e) => Some(e),
            ApiError::Status { .. } => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e)
    }
}
