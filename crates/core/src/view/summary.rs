use crate::contract::context::MarketContext;
use crate::contract::evidence::{EvidenceBundle, HoneywellMapping};
use crate::contract::pricing::{DecisionStep, DemandPoint, ProfitPoint};
use crate::store::status::PIPELINE_STAGES;
use crate::store::{BackendHealth, PricingState, StatusState};
use crate::view::charts::{
    demand_curve, feature_importance, profit_curve, segment_performance, sensitivity_band,
    CurveChart, FeatureBar, SegmentRow, SensitivityBand,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

const EXECUTIVE_DRIVERS: usize = 3;
const WORKSPACE_DRIVERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Active,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageView {
    pub index: u8,
    pub label: &'static str,
    pub state: StageState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineView {
    pub running: bool,
    pub stages: Vec<StageView>,
    pub health: BackendHealth,
    pub backend_version: Option<String>,
}

impl From<&StatusState> for PipelineView {
    fn from(status: &StatusState) -> Self {
        let stages = PIPELINE_STAGES
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let index = i as u8;
                let state = if status.completed_stages.contains(&index) {
                    StageState::Done
                } else if status.current_stage == index as i8 {
                    StageState::Active
                } else {
                    StageState::Pending
                };
                StageView { index, label, state }
            })
            .collect();

        Self {
            running: status.is_running(),
            stages,
            health: status.health,
            backend_version: status.backend_version.clone(),
        }
    }
}

/// Headline numbers for the executive tab.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutiveSummary {
    pub recommended_price: Option<f64>,
    pub historical_cost: f64,
    /// Recommended price minus historical cost.
    pub margin: Option<f64>,
    /// Margin as a percent of the recommended price.
    pub margin_pct: Option<f64>,
    pub expected_profit: Option<f64>,
    pub confidence: Option<f64>,
    pub top_drivers: Vec<FeatureBar>,
    pub rules_applied: Vec<String>,
    pub pipeline: PipelineView,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ExecutiveSummary {
    pub fn build(context: &MarketContext, pricing: &PricingState, status: &StatusState) -> Self {
        let explanation = pricing.explanation.as_ref();
        let cost = context.historical_cost_of_ride;
        let price = explanation.map(|e| e.recommended_price);
        let margin = price.map(|p| p - cost);
        let margin_pct = price
            .zip(margin)
            .filter(|(p, _)| *p > 0.0)
            .map(|(p, m)| m * 100.0 / p);

        Self {
            recommended_price: price,
            historical_cost: cost,
            margin,
            margin_pct,
            expected_profit: explanation.and_then(|e| e.expected_profit),
            confidence: explanation.and_then(|e| e.confidence),
            top_drivers: explanation
                .map(|e| feature_importance(e, EXECUTIVE_DRIVERS))
                .unwrap_or_default(),
            rules_applied: explanation
                .map(|e| e.business_rules_applied.clone())
                .unwrap_or_default(),
            pipeline: PipelineView::from(status),
            error: pricing.error.clone(),
            updated_at: pricing.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceCharts {
    pub recommended_price: f64,
    pub feature_importance: Vec<FeatureBar>,
    pub demand_curve: CurveChart<DemandPoint>,
    pub profit_curve: CurveChart<ProfitPoint>,
    pub sensitivity: SensitivityBand,
    pub segments: Vec<SegmentRow>,
    pub decision_trace: Vec<DecisionStep>,
}

/// Everything the analyst workspace renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceView {
    pub context: MarketContext,
    pub supply_demand_ratio: Option<f64>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub charts: Option<WorkspaceCharts>,
    pub pipeline: PipelineView,
}

impl WorkspaceView {
    pub fn build(context: &MarketContext, pricing: &PricingState, status: &StatusState) -> Self {
        let charts = pricing.explanation.as_ref().map(|e| WorkspaceCharts {
            recommended_price: e.recommended_price,
            feature_importance: feature_importance(e, WORKSPACE_DRIVERS),
            demand_curve: demand_curve(e),
            profit_curve: profit_curve(e),
            sensitivity: sensitivity_band(e),
            segments: segment_performance(e),
            decision_trace: e.decision_trace.clone(),
        });

        Self {
            context: context.clone(),
            supply_demand_ratio: context.supply_demand_ratio(),
            is_loading: pricing.is_loading,
            error: pricing.error.clone(),
            charts,
            pipeline: PipelineView::from(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceView {
    pub bundle: EvidenceBundle,
    pub honeywell_mapping: HoneywellMapping,
}
