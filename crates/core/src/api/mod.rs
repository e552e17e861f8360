pub mod error;

use crate::config::Settings;
use crate::contract::chat::{ChatRequest, ChatResponse, StreamOptions};
use crate::contract::context::MarketContext;
use crate::contract::evidence::{DocResponse, EvidenceBundle, HoneywellMapping};
use crate::contract::health::HealthResponse;
use crate::contract::pricing::{
    ExplainDecisionRequest, ExplainDecisionResponse, OptimizePriceResponse, PriceExplanation,
};
use crate::contract::{self, Contract};
use crate::sse::ChatEventStream;
use anyhow::Context;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderValue, ACCEPT};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use error::{ApiError, ValidationError};

pub const HEALTH_PATH: &str = "/health";
pub const EVIDENCE_PATH: &str = "/api/v1/evidence";
pub const EVIDENCE_DOCS_PATH: &str = "/api/v1/evidence/docs";
pub const HONEYWELL_MAPPING_PATH: &str = "/api/v1/honeywell_mapping";
pub const CHAT_PATH: &str = "/api/v1/chat";
pub const EXPLAIN_DECISION_PATH: &str = "/api/v1/explain_decision";
pub const OPTIMIZE_PRICE_PATH: &str = "/api/optimize-price";

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;
pub type ChatStream = ChatEventStream<ByteStream>;

/// Everything the analyst client needs from the pricing backend.
#[async_trait::async_trait]
pub trait PricingBackend: Send + Sync {
    async fn health(&self) -> Result<HealthResponse, ApiError>;

    async fn evidence(&self) -> Result<EvidenceBundle, ApiError>;

    async fn evidence_doc(&self, id: &str) -> Result<DocResponse, ApiError>;

    async fn honeywell_mapping(&self) -> Result<HoneywellMapping, ApiError>;

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ApiError>;

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        opts: &StreamOptions,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ApiError>;

    async fn optimize_price(&self, context: &MarketContext) -> Result<PriceExplanation, ApiError>;

    async fn explain_decision(&self, context: &MarketContext)
        -> Result<PriceExplanation, ApiError>;
}

/// HTTP client that validates every JSON response against its contract.
/// No retries: failures go straight back to the caller.
///
/// `timeout` bounds each unary request end to end. Chat streams only get the
/// connect timeout; they run until the backend closes or the caller cancels.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(&settings.api_url, settings.api_timeout)
    }

    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("failed to build pricing API http client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    pub async fn fetch_validated<C: Contract>(&self, endpoint: &str) -> Result<C, ApiError> {
        let res = self
            .http
            .get(self.url(endpoint))
            .timeout(self.timeout)
            .send()
            .await?;
        Self::read_validated(endpoint, res).await
    }

    pub async fn post_validated<C, B>(&self, endpoint: &str, body: &B) -> Result<C, ApiError>
    where
        C: Contract,
        B: Serialize + ?Sized + Sync,
    {
        let res = self
            .http
            .post(self.url(endpoint))
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        Self::read_validated(endpoint, res).await
    }

    async fn read_validated<C: Contract>(
        endpoint: &str,
        res: reqwest::Response,
    ) -> Result<C, ApiError> {
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let raw = serde_json::from_str::<Value>(&text).map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;

        match contract::decode::<C>(&raw) {
            Ok(parsed) => Ok(parsed),
            Err(issues) => {
                tracing::error!(
                    endpoint,
                    issue_count = issues.len(),
                    issues = ?issues,
                    raw = %raw,
                    "response failed schema validation"
                );
                Err(ValidationError {
                    endpoint: endpoint.to_string(),
                    issues,
                    raw,
                }
                .into())
            }
        }
    }
}

#[async_trait::async_trait]
impl PricingBackend for ApiClient {
    async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.fetch_validated(HEALTH_PATH).await
    }

    async fn evidence(&self) -> Result<EvidenceBundle, ApiError> {
        self.fetch_validated(EVIDENCE_PATH).await
    }

    async fn evidence_doc(&self, id: &str) -> Result<DocResponse, ApiError> {
        let endpoint = format!("{EVIDENCE_DOCS_PATH}/{}", encode_segment(id));
        self.fetch_validated(&endpoint).await
    }

    async fn honeywell_mapping(&self) -> Result<HoneywellMapping, ApiError> {
        self.fetch_validated(HONEYWELL_MAPPING_PATH).await
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.post_validated(CHAT_PATH, req).await
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        opts: &StreamOptions,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ApiError> {
        let res = self
            .http
            .post(self.url(CHAT_PATH))
            .query(&opts.query_pairs())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(req)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: CHAT_PATH.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(plan = opts.plan, model = ?opts.model, "chat stream opened");
        let bytes: ByteStream = res.bytes_stream().map_ok(|chunk| chunk.to_vec()).boxed();
        Ok(ChatEventStream::new(bytes, cancel))
    }

    async fn optimize_price(&self, context: &MarketContext) -> Result<PriceExplanation, ApiError> {
        let res: OptimizePriceResponse = self.post_validated(OPTIMIZE_PRICE_PATH, context).await?;
        Ok(res.into())
    }

    async fn explain_decision(
        &self,
        context: &MarketContext,
    ) -> Result<PriceExplanation, ApiError> {
        let body = ExplainDecisionRequest {
            market_context: context,
        };
        let res: ExplainDecisionResponse =
            self.post_validated(EXPLAIN_DECISION_PATH, &body).await?;
        Ok(res.into())
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
