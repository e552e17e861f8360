use crate::contract::pricing::{DemandPoint, PriceExplanation, ProfitPoint};
use serde::Serialize;
use std::cmp::Ordering;

/// Band used when the backend sends no sensitivity analysis.
pub const DEFAULT_SENSITIVITY_BAND: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increases,
    Decreases,
    Neutral,
}

impl Direction {
    fn of(contribution: f64) -> Self {
        if contribution > 0.0 {
            Direction::Increases
        } else if contribution < 0.0 {
            Direction::Decreases
        } else {
            Direction::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureBar {
    pub feature: String,
    pub contribution: f64,
    /// Share of the total absolute contribution, in percent.
    pub share: f64,
    pub direction: Direction,
}

/// Largest drivers first; equal magnitudes are ordered by feature name.
pub fn feature_importance(explanation: &PriceExplanation, top_n: usize) -> Vec<FeatureBar> {
    let total: f64 = explanation
        .feature_contributions
        .iter()
        .map(|c| c.contribution.abs())
        .sum();

    let mut bars: Vec<FeatureBar> = explanation
        .feature_contributions
        .iter()
        .map(|c| FeatureBar {
            feature: c.feature.clone(),
            contribution: c.contribution,
            share: if total > 0.0 {
                c.contribution.abs() / total * 100.0
            } else {
                0.0
            },
            direction: Direction::of(c.contribution),
        })
        .collect();

    bars.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    bars.truncate(top_n);
    bars
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveChart<P> {
    pub points: Vec<P>,
    /// Price with the highest expected profit, when the profit curve is known.
    pub optimal_price: Option<f64>,
}

fn by_price<P: Copy>(points: &[P], price: impl Fn(&P) -> f64) -> Vec<P> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| price(a).partial_cmp(&price(b)).unwrap_or(Ordering::Equal));
    sorted
}

/// Point of maximum profit. The first one wins on ties.
pub fn optimal_point(explanation: &PriceExplanation) -> Option<ProfitPoint> {
    explanation
        .profit_curve
        .iter()
        .copied()
        .fold(None, |best: Option<ProfitPoint>, p| match best {
            Some(b) if b.profit >= p.profit => Some(b),
            _ => Some(p),
        })
}

pub fn demand_curve(explanation: &PriceExplanation) -> CurveChart<DemandPoint> {
    CurveChart {
        points: by_price(&explanation.demand_curve, |p| p.price),
        optimal_price: optimal_point(explanation).map(|p| p.price),
    }
}

pub fn profit_curve(explanation: &PriceExplanation) -> CurveChart<ProfitPoint> {
    CurveChart {
        points: by_price(&explanation.profit_curve, |p| p.price),
        optimal_price: optimal_point(explanation).map(|p| p.price),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandPoint {
    pub price: f64,
    pub low: f64,
    pub base: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityBand {
    pub band: f64,
    pub elasticity: Option<f64>,
    pub points: Vec<BandPoint>,
    /// Lowest and highest price whose profit is within the band of the maximum.
    pub robust_range: Option<(f64, f64)>,
}

pub fn sensitivity_band(explanation: &PriceExplanation) -> SensitivityBand {
    let band = explanation
        .sensitivity
        .as_ref()
        .map(|s| s.band)
        .filter(|b| b.is_finite() && *b >= 0.0)
        .unwrap_or(DEFAULT_SENSITIVITY_BAND);

    let points: Vec<BandPoint> = by_price(&explanation.profit_curve, |p| p.price)
        .into_iter()
        .map(|p| {
            let a = p.profit * (1.0 - band);
            let b = p.profit * (1.0 + band);
            BandPoint {
                price: p.price,
                low: a.min(b),
                base: p.profit,
                high: a.max(b),
            }
        })
        .collect();

    let robust_range = optimal_point(explanation).and_then(|best| {
        let threshold = best.profit - best.profit.abs() * band;
        let prices = points
            .iter()
            .filter(|p| p.base >= threshold)
            .map(|p| p.price);
        let (lo, hi) = prices.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p), hi.max(p))
        });
        (lo <= hi).then_some((lo, hi))
    });

    SensitivityBand {
        band,
        elasticity: explanation.sensitivity.as_ref().and_then(|s| s.elasticity),
        points,
        robust_range,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentRow {
    pub segment: String,
    pub revenue: f64,
    /// Percent of total revenue across segments.
    pub share: f64,
    pub rides: Option<u64>,
    pub avg_price: Option<f64>,
}

pub fn segment_performance(explanation: &PriceExplanation) -> Vec<SegmentRow> {
    let total: f64 = explanation.segments.iter().map(|s| s.revenue.max(0.0)).sum();

    let mut rows: Vec<SegmentRow> = explanation
        .segments
        .iter()
        .map(|s| SegmentRow {
            segment: s.segment.clone(),
            revenue: s.revenue,
            share: if total > 0.0 {
                s.revenue.max(0.0) / total * 100.0
            } else {
                0.0
            },
            rides: s.rides,
            avg_price: s.avg_price,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.revenue
            .partial_cmp(&a.revenue)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.segment.cmp(&b.segment))
    });
    rows
}
