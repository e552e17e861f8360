//! Render-ready view models derived from store snapshots.

pub mod charts;
pub mod summary;

pub use charts::{
    demand_curve, feature_importance, optimal_point, profit_curve, segment_performance,
    sensitivity_band, BandPoint, CurveChart, Direction, FeatureBar, SegmentRow, SensitivityBand,
};
pub use summary::{ExecutiveSummary, EvidenceView, PipelineView, WorkspaceView};
