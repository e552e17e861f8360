//! Bundled documentation served when the backend cannot provide it.

use crate::contract::evidence::{
    ConceptMapping, DataCard, EvidenceBundle, EvidenceDoc, HoneywellMapping, ModelCard,
};
use std::collections::BTreeMap;

pub const FALLBACK_DOCS: &[(&str, &str, &str)] = &[
    (
        "methodology",
        "Pricing methodology",
        "# Pricing methodology\n\n\
The recommended fare is the price that maximizes expected profit under the \
current market context. A gradient-boosted demand model estimates ride \
conversion across a grid of candidate prices; expected profit is conversion \
times margin over the historical cost of the ride. Business rules then clamp \
the result (minimum margin, maximum surge multiple, loyalty discounts).",
    ),
    (
        "model_card",
        "Demand model card",
        "# Demand model card\n\n\
**Model:** gradient-boosted trees predicting ride conversion.\n\n\
**Inputs:** rider and driver counts, location category, loyalty status, past \
rides, average rating, time of booking, vehicle type, expected duration and \
historical cost.\n\n\
**Limitations:** trained on a single-market historical dataset; extreme \
supply/demand ratios are extrapolated.",
    ),
    (
        "data_card",
        "Training data card",
        "# Training data card\n\n\
Historical ride records with one row per booking request. Categorical \
features are one-hot encoded; the cost of ride is used both as a feature and \
as the margin baseline.",
    ),
    (
        "elasticity",
        "Price elasticity",
        "# Price elasticity\n\n\
Elasticity is estimated from the slope of the demand curve around the \
recommended price. The sensitivity band shows how expected profit moves when \
demand response is stronger or weaker than estimated.",
    ),
    (
        "business_rules",
        "Business rules",
        "# Business rules\n\n\
- Price never falls below historical cost plus the minimum margin.\n\
- Surge is capped relative to the historical cost.\n\
- Gold and Silver riders receive their loyalty discount after optimization.",
    ),
];

pub fn fallback_doc(id: &str) -> Option<&'static str> {
    FALLBACK_DOCS
        .iter()
        .find(|(doc_id, _, _)| *doc_id == id)
        .map(|(_, _, content)| *content)
}

pub fn placeholder_doc(id: &str) -> String {
    format!("# {id}\n\nDocumentation for `{id}` is not available right now.")
}

pub fn fallback_bundle() -> EvidenceBundle {
    let metrics = BTreeMap::from([
        ("mae".to_string(), 0.071),
        ("r2".to_string(), 0.86),
    ]);

    EvidenceBundle {
        model_cards: vec![ModelCard {
            id: "demand_model".to_string(),
            name: "Ride demand model".to_string(),
            version: None,
            description: "Gradient-boosted conversion model used to build demand and profit curves."
                .to_string(),
            metrics,
            limitations: vec![
                "Single-market training data".to_string(),
                "Extreme supply/demand ratios are extrapolated".to_string(),
            ],
        }],
        data_card: Some(DataCard {
            name: "Historical ride bookings".to_string(),
            source: None,
            rows: None,
            features: [
                "Number_of_Riders",
                "Number_of_Drivers",
                "Location_Category",
                "Customer_Loyalty_Status",
                "Number_of_Past_Rides",
                "Average_Ratings",
                "Time_of_Booking",
                "Vehicle_Type",
                "Expected_Ride_Duration",
                "Historical_Cost_of_Ride",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
            description: "One row per booking request with the realized fare.".to_string(),
        }),
        documents: FALLBACK_DOCS
            .iter()
            .map(|(id, title, content)| EvidenceDoc {
                id: id.to_string(),
                title: title.to_string(),
                content: content.to_string(),
            })
            .collect(),
    }
}

pub fn fallback_honeywell_mapping() -> HoneywellMapping {
    let rows = [
        ("Number_of_Riders", "Order volume", "Demand pressure at quote time."),
        ("Number_of_Drivers", "Capacity / inventory", "Available supply to fulfil demand."),
        ("Customer_Loyalty_Status", "Account tier", "Contracted discount level."),
        ("Historical_Cost_of_Ride", "Cost to serve", "Margin baseline for floor pricing."),
        ("Vehicle_Type", "Product line", "Premium versus standard offering."),
    ];

    HoneywellMapping {
        mappings: rows
            .iter()
            .map(|(ride, honeywell, rationale)| ConceptMapping {
                ride_concept: ride.to_string(),
                honeywell_concept: honeywell.to_string(),
                rationale: rationale.to_string(),
            })
            .collect(),
    }
}
