//! Pricing responses.
//!
//! The backend exposes two endpoints with different field names:
//! `/api/optimize-price` ([`OptimizePriceResponse`]) and
//! `/api/v1/explain_decision` ([`ExplainDecisionResponse`]). Both normalize
//! into [`PriceExplanation`], which is what the rest of the crate consumes.

use crate::contract::context::MarketContext;
use crate::contract::{Contract, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    /// Signed effect on the price; importance-only shapes are non-negative.
    pub contribution: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandPoint {
    pub price: f64,
    pub demand: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitPoint {
    pub price: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityScenario {
    pub label: String,
    pub price: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityAnalysis {
    /// Relative band half-width, e.g. `0.1` for ±10%.
    pub band: f64,
    #[serde(default)]
    pub elasticity: Option<f64>,
    #[serde(default)]
    pub scenarios: Vec<SensitivityScenario>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPerformance {
    pub segment: String,
    pub revenue: f64,
    #[serde(default)]
    pub rides: Option<u64>,
    #[serde(default)]
    pub avg_price: Option<f64>,
}

/// A complete pricing explanation. Missing collections are always empty,
/// never partially filled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceExplanation {
    pub recommended_price: f64,
    pub expected_profit: Option<f64>,
    pub expected_demand: Option<f64>,
    pub confidence: Option<f64>,
    pub feature_contributions: Vec<FeatureContribution>,
    pub decision_trace: Vec<DecisionStep>,
    pub demand_curve: Vec<DemandPoint>,
    pub profit_curve: Vec<ProfitPoint>,
    pub segments: Vec<SegmentPerformance>,
    pub sensitivity: Option<SensitivityAnalysis>,
    pub business_rules_applied: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainDecisionRequest<'a> {
    pub market_context: &'a MarketContext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizePriceResponse {
    pub optimal_price: f64,
    #[serde(default)]
    pub expected_profit: Option<f64>,
    #[serde(default)]
    pub expected_demand: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub feature_contributions: Vec<FeatureContribution>,
    #[serde(default)]
    pub decision_trace: Vec<DecisionStep>,
    #[serde(default)]
    pub demand_curve: Vec<DemandPoint>,
    #[serde(default)]
    pub profit_curve: Vec<ProfitPoint>,
    #[serde(default)]
    pub segments: Vec<SegmentPerformance>,
    #[serde(default)]
    pub sensitivity: Option<SensitivityAnalysis>,
    #[serde(default)]
    pub business_rules: Vec<String>,
}

impl From<OptimizePriceResponse> for PriceExplanation {
    fn from(res: OptimizePriceResponse) -> Self {
        Self {
            recommended_price: res.optimal_price,
            expected_profit: res.expected_profit,
            expected_demand: res.expected_demand,
            confidence: res.confidence,
            feature_contributions: res.feature_contributions,
            decision_trace: res.decision_trace,
            demand_curve: res.demand_curve,
            profit_curve: res.profit_curve,
            segments: res.segments,
            sensitivity: res.sensitivity,
            business_rules_applied: res.business_rules,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainDecisionResponse {
    pub recommendation: Recommendation,
    #[serde(default)]
    pub feature_importance: Vec<FeatureImportance>,
    #[serde(default)]
    pub decision_trace: Option<DecisionTrace>,
    #[serde(default)]
    pub curves: Option<Curves>,
    #[serde(default)]
    pub sensitivity_analysis: Option<SensitivityAnalysis>,
    #[serde(default)]
    pub segment_performance: Vec<SegmentPerformance>,
    #[serde(default)]
    pub business_rules_applied: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recommendation {
    pub price: f64,
    #[serde(default)]
    pub expected_profit: Option<f64>,
    #[serde(default)]
    pub expected_demand: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTrace {
    #[serde(default)]
    pub steps: Vec<DecisionStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Curves {
    #[serde(default)]
    pub demand: Vec<DemandPoint>,
    #[serde(default)]
    pub profit: Vec<ProfitPoint>,
}

impl From<ExplainDecisionResponse> for PriceExplanation {
    fn from(res: ExplainDecisionResponse) -> Self {
        let (demand_curve, profit_curve) = match res.curves {
            Some(c) => (c.demand, c.profit),
            None => (Vec::new(), Vec::new()),
        };

        Self {
            recommended_price: res.recommendation.price,
            expected_profit: res.recommendation.expected_profit,
            expected_demand: res.recommendation.expected_demand,
            confidence: res.recommendation.confidence,
            feature_contributions: res
                .feature_importance
                .into_iter()
                .map(|f| FeatureContribution {
                    feature: f.feature,
                    contribution: f.importance,
                    value: f.value,
                })
                .collect(),
            decision_trace: res.decision_trace.map(|t| t.steps).unwrap_or_default(),
            demand_curve,
            profit_curve,
            segments: res.segment_performance,
            sensitivity: res.sensitivity_analysis,
            business_rules_applied: res.business_rules_applied,
        }
    }
}

fn validate_contribution(v: &mut Validator, item: &Value, amount_key: &str) {
    let Some(obj) = v.object(item) else { return };
    v.required_string(obj, "feature");
    v.required_number(obj, amount_key);
}

fn validate_step(v: &mut Validator, item: &Value) {
    let Some(obj) = v.object(item) else { return };
    v.required_string(obj, "name");
    v.required_string(obj, "status");
    let duration = v.optional_number(obj, "duration_ms");
    v.min("duration_ms", duration, 0.0);
    v.optional_string(obj, "detail");
}

fn validate_demand_point(v: &mut Validator, item: &Value) {
    let Some(obj) = v.object(item) else { return };
    v.required_number(obj, "price");
    v.required_number(obj, "demand");
}

fn validate_profit_point(v: &mut Validator, item: &Value) {
    let Some(obj) = v.object(item) else { return };
    v.required_number(obj, "price");
    v.required_number(obj, "profit");
}

fn validate_segment(v: &mut Validator, item: &Value) {
    let Some(obj) = v.object(item) else { return };
    v.required_string(obj, "segment");
    v.required_number(obj, "revenue");
    let rides = v.optional_number(obj, "rides");
    v.integer(obj, "rides");
    v.min("rides", rides, 0.0);
    v.optional_number(obj, "avg_price");
}

fn validate_sensitivity(v: &mut Validator, obj: &Map<String, Value>) {
    let band = v.required_number(obj, "band");
    v.range("band", band, 0.0, 1.0);
    v.optional_number(obj, "elasticity");
    v.optional_array(obj, "scenarios", |v, item| {
        let Some(obj) = v.object(item) else { return };
        v.required_string(obj, "label");
        v.required_number(obj, "price");
        v.required_number(obj, "profit");
    });
}

fn validate_confidence(v: &mut Validator, obj: &Map<String, Value>) {
    let confidence = v.optional_number(obj, "confidence");
    v.range("confidence", confidence, 0.0, 1.0);
}

impl Contract for OptimizePriceResponse {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };
        let price = v.required_number(obj, "optimal_price");
        v.min("optimal_price", price, 0.0);
        v.optional_number(obj, "expected_profit");
        v.optional_number(obj, "expected_demand");
        validate_confidence(v, obj);
        v.optional_array(obj, "feature_contributions", |v, item| {
            validate_contribution(v, item, "contribution")
        });
        v.optional_array(obj, "decision_trace", validate_step);
        v.optional_array(obj, "demand_curve", validate_demand_point);
        v.optional_array(obj, "profit_curve", validate_profit_point);
        v.optional_array(obj, "segments", validate_segment);
        v.optional_object(obj, "sensitivity", validate_sensitivity);
        v.string_array(obj, "business_rules");
    }
}

impl Contract for ExplainDecisionResponse {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };
        v.required_object(obj, "recommendation", |v, rec| {
            let price = v.required_number(rec, "price");
            v.min("price", price, 0.0);
            v.optional_number(rec, "expected_profit");
            v.optional_number(rec, "expected_demand");
            validate_confidence(v, rec);
        });
        v.optional_array(obj, "feature_importance", |v, item| {
            validate_contribution(v, item, "importance")
        });
        v.optional_object(obj, "decision_trace", |v, trace| {
            v.optional_array(trace, "steps", validate_step);
        });
        v.optional_object(obj, "curves", |v, curves| {
            v.optional_array(curves, "demand", validate_demand_point);
            v.optional_array(curves, "profit", validate_profit_point);
        });
        v.optional_object(obj, "sensitivity_analysis", validate_sensitivity);
        v.optional_array(obj, "segment_performance", validate_segment);
        v.string_array(obj, "business_rules_applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{decode, IssueCode};
    use serde_json::json;

    #[test]
    fn optimize_response_without_contributions_yields_empty_vec() {
        let value = json!({"optimal_price": 412.5, "expected_profit": 88.0});
        let res = decode::<OptimizePriceResponse>(&value).unwrap();
        let explanation = PriceExplanation::from(res);
        assert_eq!(explanation.recommended_price, 412.5);
        assert!(explanation.feature_contributions.is_empty());
        assert!(explanation.decision_trace.is_empty());
        assert!(explanation.sensitivity.is_none());
    }

    #[test]
    fn explain_decision_normalizes_field_names() {
        let value = json!({
            "recommendation": {"price": 399.0, "confidence": 0.82},
            "feature_importance": [
                {"feature": "Number_of_Riders", "importance": 0.4},
                {"feature": "Vehicle_Type", "importance": 0.1, "value": "Premium"}
            ],
            "decision_trace": {"steps": [
                {"name": "load_model", "status": "completed", "duration_ms": 4.2},
                {"name": "apply_rules", "status": "mystery"}
            ]},
            "curves": {
                "demand": [{"price": 300.0, "demand": 0.9}],
                "profit": [{"price": 300.0, "profit": 40.0}]
            },
            "business_rules_applied": ["min_margin"]
        });

        let explanation = PriceExplanation::from(decode::<ExplainDecisionResponse>(&value).unwrap());
        assert_eq!(explanation.recommended_price, 399.0);
        assert_eq!(explanation.confidence, Some(0.82));
        assert_eq!(explanation.feature_contributions.len(), 2);
        assert_eq!(explanation.feature_contributions[1].value, Some(json!("Premium")));
        assert_eq!(explanation.decision_trace[1].status, StepStatus::Unknown);
        assert_eq!(explanation.demand_curve.len(), 1);
        assert_eq!(explanation.profit_curve[0].profit, 40.0);
        assert_eq!(explanation.business_rules_applied, vec!["min_margin".to_string()]);
    }

    #[test]
    fn explain_decision_requires_recommendation() {
        let issues = decode::<ExplainDecisionResponse>(&json!({"feature_importance": []})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "recommendation");
        assert_eq!(issues[0].code, IssueCode::Required);
    }

    #[test]
    fn reports_paths_inside_curves() {
        let value = json!({
            "optimal_price": 10.0,
            "profit_curve": [{"price": 1.0, "profit": 2.0}, {"price": "x", "profit": 2.0}],
            "sensitivity": {"band": 3.0}
        });
        let issues = decode::<OptimizePriceResponse>(&value).unwrap_err();
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["profit_curve.1.price", "sensitivity.band"]);
    }

    #[test]
    fn fractional_segment_rides_keep_their_path() {
        let value = json!({
            "recommendation": {"price": 380.0},
            "segment_performance": [
                {"segment": "Urban", "revenue": 1200.0, "rides": 12},
                {"segment": "Rural", "revenue": 300.0, "rides": 2.5}
            ]
        });
        let issues = decode::<ExplainDecisionResponse>(&value).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "segment_performance.1.rides");
        assert_eq!(issues[0].code, IssueCode::InvalidType);
    }
}
