use crate::api::{ApiError, PricingBackend, ValidationError};
use crate::contract::context::MarketContext;
use crate::contract::pricing::PriceExplanation;
use crate::contract;
use crate::store::{PricingStore, StatusStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `ValidationError::endpoint` for a context rejected before any request.
pub const MARKET_CONTEXT_SOURCE: &str = "market_context";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    /// `POST /api/optimize-price`.
    #[default]
    Optimize,
    /// `POST /api/v1/explain_decision`.
    Explain,
}

/// Runs one pricing request through the status pipeline and records the
/// outcome in the pricing store.
pub struct PricingService {
    backend: Arc<dyn PricingBackend>,
    pricing: Arc<PricingStore>,
    status: Arc<StatusStore>,
}

impl PricingService {
    pub fn new(
        backend: Arc<dyn PricingBackend>,
        pricing: Arc<PricingStore>,
        status: Arc<StatusStore>,
    ) -> Self {
        Self {
            backend,
            pricing,
            status,
        }
    }

    pub async fn optimize(&self, context: &MarketContext) -> Result<PriceExplanation, ApiError> {
        self.run(PricingMode::Optimize, context).await
    }

    pub async fn explain(&self, context: &MarketContext) -> Result<PriceExplanation, ApiError> {
        self.run(PricingMode::Explain, context).await
    }

    pub async fn run(
        &self,
        mode: PricingMode,
        context: &MarketContext,
    ) -> Result<PriceExplanation, ApiError> {
        self.status.start_pipeline();
        self.pricing.set_loading();

        match self.execute(mode, context).await {
            Ok(explanation) => {
                tracing::info!(
                    ?mode,
                    price = explanation.recommended_price,
                    contributions = explanation.feature_contributions.len(),
                    "pricing completed"
                );
                Ok(explanation)
            }
            Err(err) => {
                tracing::warn!(?mode, error = %err, "pricing failed");
                self.pricing.set_error(err.to_string());
                self.status.reset();
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        mode: PricingMode,
        context: &MarketContext,
    ) -> Result<PriceExplanation, ApiError> {
        check_context(context)?;
        self.status.advance_stage();

        let explanation = match mode {
            PricingMode::Optimize => self.backend.optimize_price(context).await?,
            PricingMode::Explain => self.backend.explain_decision(context).await?,
        };
        self.status.advance_stage();

        self.pricing.set_explanation(explanation.clone());
        self.status.advance_stage();

        self.status.complete_pipeline();
        Ok(explanation)
    }
}

/// Rejects a context the backend would refuse, before any request is made.
fn check_context(context: &MarketContext) -> Result<(), ValidationError> {
    let raw = serde_json::to_value(context).unwrap_or_default();
    contract::decode::<MarketContext>(&raw)
        .map(|_| ())
        .map_err(|issues| ValidationError {
            endpoint: MARKET_CONTEXT_SOURCE.to_string(),
            issues,
            raw,
        })
}
