//! Request coalescing data source for Hetzner Cloud server and load balancer
//! metrics.

pub mod bucket;
pub mod config;
pub mod datasource;
pub mod dispatcher;
pub mod errors;
pub mod hcloud;
pub mod metrics_defs;
pub mod name_cache;
pub mod query_runner;
pub mod resource_metrics;
pub mod series;
pub mod step;
pub mod types;

#[cfg(test)]
mod testutils;

pub use datasource::{Datasource, MetricsQuery, SelectBy};
pub use errors::{QueryRunnerError, Result, UpstreamError};
pub use query_runner::QueryRunner;
pub use resource_metrics::{
    LoadBalancerMetricType, LoadBalancerMetrics, ResourceMetrics, ServerMetricType, ServerMetrics,
};
pub use types::{RequestOptions, ResourceId, ResourceKind, Step, TimeRange};
