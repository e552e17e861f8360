use crate::api::{ApiClient, ApiError, PricingBackend};
use crate::config::Settings;
use crate::contract::chat::StreamOptions;
use crate::contract::pricing::PriceExplanation;
use crate::service::{ChatSession, EvidenceService, PricingMode, PricingService};
use crate::storage::{FileStore, KeyValueStore};
use crate::store::{
    BackendHealth, ChatStore, ContextStore, LayoutStore, PricingStore, StatusState, StatusStore,
};
use crate::view::{EvidenceView, ExecutiveSummary, WorkspaceView};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

/// Application state: every store and service, owned in one place and shared
/// behind an `Arc` by the binaries.
pub struct Dashboard {
    pub backend: Arc<dyn PricingBackend>,
    pub context: Arc<ContextStore>,
    pub chat: Arc<ChatStore>,
    pub layout: Arc<LayoutStore>,
    pub pricing: Arc<PricingStore>,
    pub status: Arc<StatusStore>,
    pub pricing_service: PricingService,
    pub chat_session: ChatSession,
    pub evidence: EvidenceService,
    stream_keepalive_secs: Option<u32>,
}

impl Dashboard {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let backend = ApiClient::from_settings(settings)?;
        let storage = FileStore::open(&settings.state_dir).with_context(|| {
            format!("failed to open state dir {}", settings.state_dir.display())
        })?;
        tracing::info!(
            api_url = %backend.base_url(),
            state_dir = %settings.state_dir.display(),
            "dashboard state initialized"
        );

        let mut dashboard = Self::new(
            Arc::new(backend),
            Arc::new(storage),
            settings.stage_reset_delay,
        );
        dashboard.stream_keepalive_secs = settings.stream_keepalive_secs;
        Ok(dashboard)
    }

    pub fn new(
        backend: Arc<dyn PricingBackend>,
        storage: Arc<dyn KeyValueStore>,
        stage_reset_delay: Duration,
    ) -> Self {
        let context = Arc::new(ContextStore::load(storage.clone()));
        let chat = Arc::new(ChatStore::load(storage.clone()));
        let layout = Arc::new(LayoutStore::load(storage));
        let pricing = Arc::new(PricingStore::new());
        let status = Arc::new(StatusStore::new(stage_reset_delay));

        Self {
            pricing_service: PricingService::new(backend.clone(), pricing.clone(), status.clone()),
            chat_session: ChatSession::new(backend.clone(), chat.clone(), context.clone()),
            evidence: EvidenceService::new(backend.clone()),
            backend,
            context,
            chat,
            layout,
            pricing,
            status,
            stream_keepalive_secs: None,
        }
    }

    /// Prices the current market context.
    pub async fn price(&self, mode: PricingMode) -> Result<PriceExplanation, ApiError> {
        let context = self.context.context();
        self.pricing_service.run(mode, &context).await
    }

    pub fn stream_options(&self, plan: bool, model: Option<String>) -> StreamOptions {
        StreamOptions {
            plan,
            keepalive_interval: self.stream_keepalive_secs,
            model,
        }
    }

    /// Probes `/health` and records the outcome on the status store.
    pub async fn refresh_health(&self) -> StatusState {
        match self.backend.health().await {
            Ok(health) => {
                let state = if health.is_healthy() {
                    BackendHealth::Online
                } else {
                    BackendHealth::Degraded
                };
                self.status.set_health(state, health.version);
            }
            Err(err) => {
                tracing::warn!(error = %err, "backend health check failed");
                self.status.set_health(BackendHealth::Offline, None);
            }
        }
        self.status.snapshot()
    }

    pub fn workspace(&self) -> WorkspaceView {
        WorkspaceView::build(
            &self.context.context(),
            &self.pricing.snapshot(),
            &self.status.snapshot(),
        )
    }

    pub fn executive(&self) -> ExecutiveSummary {
        ExecutiveSummary::build(
            &self.context.context(),
            &self.pricing.snapshot(),
            &self.status.snapshot(),
        )
    }

    pub async fn evidence_view(&self) -> EvidenceView {
        EvidenceView {
            bundle: self.evidence.evidence().await,
            honeywell_mapping: self.evidence.honeywell_mapping().await,
        }
    }
}
