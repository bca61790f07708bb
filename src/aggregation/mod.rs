pub mod config;
pub mod engine;
pub mod error;
pub mod scoring;
pub mod summary;

pub use config::{AggregationConfig, ConfidencePolicy, NervousnessPolicy};
pub use engine::{Aggregator, SnapshotReader};
pub use error::AggregationError;
pub use summary::{
    ConfidenceStats, HistogramBin, LabelStats, NervousnessLevel, NervousnessStats, Quartiles,
    SessionSummary, TimelinePoint,
};
