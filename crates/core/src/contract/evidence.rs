use crate::contract::{Contract, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub limitations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCard {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub rows: Option<u64>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// A markdown document shown on the evidence/methods tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDoc {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvidenceBundle {
    #[serde(default)]
    pub model_cards: Vec<ModelCard>,
    #[serde(default)]
    pub data_card: Option<DataCard>,
    #[serde(default)]
    pub documents: Vec<EvidenceDoc>,
}

impl EvidenceBundle {
    pub fn document(&self, id: &str) -> Option<&EvidenceDoc> {
        self.documents.iter().find(|d| d.id == id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocResponse {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMapping {
    pub ride_concept: String,
    pub honeywell_concept: String,
    #[serde(default)]
    pub rationale: String,
}

/// Mapping of ride-pricing concepts onto Honeywell's industrial pricing vocabulary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HoneywellMapping {
    #[serde(default)]
    pub mappings: Vec<ConceptMapping>,
}

fn validate_model_card(v: &mut Validator, item: &Value) {
    let Some(obj) = v.object(item) else { return };
    v.required_string(obj, "id");
    v.required_string(obj, "name");
    v.optional_string(obj, "version");
    v.optional_string(obj, "description");
    v.optional_object(obj, "metrics", |v, metrics| {
        for key in metrics.keys() {
            v.required_number(metrics, key);
        }
    });
    v.string_array(obj, "limitations");
}

fn validate_data_card(v: &mut Validator, obj: &Map<String, Value>) {
    v.required_string(obj, "name");
    v.optional_string(obj, "source");
    let rows = v.optional_number(obj, "rows");
    v.integer(obj, "rows");
    v.min("rows", rows, 0.0);
    v.string_array(obj, "features");
    v.optional_string(obj, "description");
}

impl Contract for EvidenceBundle {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };
        v.optional_array(obj, "model_cards", validate_model_card);
        v.optional_object(obj, "data_card", validate_data_card);
        v.optional_array(obj, "documents", |v, item| {
            let Some(obj) = v.object(item) else { return };
            v.required_string(obj, "id");
            v.required_string(obj, "title");
            v.optional_string(obj, "content");
        });
    }
}

impl Contract for DocResponse {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };
        v.required_string(obj, "id");
        v.optional_string(obj, "title");
        v.required_string(obj, "content");
    }
}

impl Contract for HoneywellMapping {
    fn validate(value: &Value, v: &mut Validator) {
        let Some(obj) = v.object(value) else { return };
        v.optional_array(obj, "mappings", |v, item| {
            let Some(obj) = v.object(item) else { return };
            v.required_string(obj, "ride_concept");
            v.required_string(obj, "honeywell_concept");
            v.optional_string(obj, "rationale");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::decode;
    use serde_json::json;

    #[test]
    fn decodes_bundle_with_metrics() {
        let value = json!({
            "model_cards": [{
                "id": "xgb_v3",
                "name": "Demand model",
                "metrics": {"rmse": 0.12, "r2": 0.91},
                "limitations": ["urban-heavy training data"]
            }],
            "data_card": {"name": "dynamic_pricing.csv", "rows": 1000, "features": ["Number_of_Riders"]},
            "documents": [{"id": "methodology", "title": "Methodology", "content": "# Method"}]
        });
        let bundle = decode::<EvidenceBundle>(&value).unwrap();
        assert_eq!(bundle.model_cards[0].metrics["r2"], 0.91);
        assert_eq!(bundle.data_card.as_ref().unwrap().rows, Some(1000));
        assert_eq!(bundle.document("methodology").unwrap().content, "# Method");
        assert!(bundle.document("missing").is_none());
    }

    #[test]
    fn flags_non_numeric_metric() {
        let value = json!({"model_cards": [{"id": "a", "name": "b", "metrics": {"rmse": "low"}}]});
        let issues = decode::<EvidenceBundle>(&value).unwrap_err();
        assert_eq!(issues[0].path, "model_cards.0.metrics.rmse");
    }
}
