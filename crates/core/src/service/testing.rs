use crate::api::{ApiError, ByteStream, ChatStream, PricingBackend};
use crate::contract::chat::{ChatRequest, ChatResponse, StreamOptions};
use crate::contract::context::MarketContext;
use crate::contract::evidence::{DocResponse, EvidenceBundle, HoneywellMapping};
use crate::contract::health::HealthResponse;
use crate::contract::pricing::PriceExplanation;
use crate::sse::ChatEventStream;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// In-memory backend. Anything not configured answers HTTP 503.
#[derive(Default)]
pub struct FakeBackend {
    health: Mutex<Option<HealthResponse>>,
    evidence: Mutex<Option<EvidenceBundle>>,
    docs: Mutex<HashMap<String, String>>,
    price: Mutex<Option<PriceExplanation>>,
    chat_reply: Mutex<Option<ChatResponse>>,
    stream_chunks: Mutex<Option<Vec<String>>>,
    stream_hangs: Mutex<bool>,
    calls: Mutex<HashMap<&'static str, usize>>,
    last_chat: Mutex<Option<ChatRequest>>,
}

fn unavailable(endpoint: &str) -> ApiError {
    ApiError::Status {
        endpoint: endpoint.to_string(),
        status: 503,
        body: "backend unavailable".to_string(),
    }
}

impl FakeBackend {
    fn hit(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_default() += 1;
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn set_health(&self, health: HealthResponse) {
        *self.health.lock().unwrap() = Some(health);
    }

    pub fn set_evidence(&self, bundle: Result<EvidenceBundle, ()>) {
        *self.evidence.lock().unwrap() = bundle.ok();
    }

    pub fn set_doc(&self, id: &str, content: &str) {
        self.docs
            .lock()
            .unwrap()
            .insert(id.to_string(), content.to_string());
    }

    pub fn set_price(&self, explanation: Option<PriceExplanation>) {
        *self.price.lock().unwrap() = explanation;
    }

    pub fn set_chat_reply(&self, reply: ChatResponse) {
        *self.chat_reply.lock().unwrap() = Some(reply);
    }

    /// Raw SSE chunks served by `chat_stream`. With `hang`, the stream stays
    /// open after the last chunk instead of ending.
    pub fn set_stream(&self, chunks: &[&str], hang: bool) {
        *self.stream_chunks.lock().unwrap() =
            Some(chunks.iter().map(|c| c.to_string()).collect());
        *self.stream_hangs.lock().unwrap() = hang;
    }

    pub fn last_chat(&self) -> Option<ChatRequest> {
        self.last_chat.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PricingBackend for FakeBackend {
    async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.hit("health");
        self.health
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/health"))
    }

    async fn evidence(&self) -> Result<EvidenceBundle, ApiError> {
        self.hit("evidence");
        self.evidence
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/api/v1/evidence"))
    }

    async fn evidence_doc(&self, id: &str) -> Result<DocResponse, ApiError> {
        self.hit("evidence_doc");
        match self.docs.lock().unwrap().get(id) {
            Some(content) => Ok(DocResponse {
                id: id.to_string(),
                title: None,
                content: content.clone(),
            }),
            None => Err(ApiError::Status {
                endpoint: format!("/api/v1/evidence/docs/{id}"),
                status: 404,
                body: String::new(),
            }),
        }
    }

    async fn honeywell_mapping(&self) -> Result<HoneywellMapping, ApiError> {
        self.hit("honeywell_mapping");
        Err(unavailable("/api/v1/honeywell_mapping"))
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ApiError> {
        self.hit("chat");
        *self.last_chat.lock().unwrap() = Some(req.clone());
        self.chat_reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/api/v1/chat"))
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        _opts: &StreamOptions,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ApiError> {
        self.hit("chat_stream");
        *self.last_chat.lock().unwrap() = Some(req.clone());
        let chunks = self
            .stream_chunks
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/api/v1/chat"))?;
        let hang = *self.stream_hangs.lock().unwrap();

        let body = stream::iter(chunks.into_iter().map(|c| Ok(c.into_bytes())));
        let source: ByteStream = if hang {
            body.chain(stream::pending()).boxed()
        } else {
            body.boxed()
        };
        Ok(ChatEventStream::new(source, cancel))
    }

    async fn optimize_price(&self, _context: &MarketContext) -> Result<PriceExplanation, ApiError> {
        self.hit("optimize_price");
        self.price
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/api/optimize-price"))
    }

    async fn explain_decision(
        &self,
        _context: &MarketContext,
    ) -> Result<PriceExplanation, ApiError> {
        self.hit("explain_decision");
        self.price
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("/api/v1/explain_decision"))
    }
}
