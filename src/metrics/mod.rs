//! Metrics ingestion, windowing, and trend analysis (C1, C2, C7).

pub mod aggregator;
pub mod buffer;
pub mod trend;

pub use aggregator::{ClusterAggregate, ClusterStatus, MetricsAggregator};
pub use buffer::{AggregateKind, MetricKind, MetricsBuffer, ScalarWindow};
pub use trend::{LeakSignal, Trend};
