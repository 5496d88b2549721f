use crate::errors::{QueryRunnerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identifier of a server or load balancer. Ids are never shared across kinds.
pub type ResourceId = i64;

/// Sampling interval in seconds, always at least 1.
pub type Step = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Server,
    LoadBalancer,
}

impl ResourceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Server => "server",
            ResourceKind::LoadBalancer => "load-balancer",
        }
    }

    /// Collection path segment in the Hetzner Cloud API.
    pub const fn api_path(&self) -> &'static str {
        match self {
            ResourceKind::Server => "servers",
            ResourceKind::LoadBalancer => "load_balancers",
        }
    }

    /// Key of a single resource in API response bodies.
    pub(crate) const fn api_singular(&self) -> &'static str {
        match self {
            ResourceKind::Server => "server",
            ResourceKind::LoadBalancer => "load_balancer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = QueryRunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "server" => Ok(ResourceKind::Server),
            "load-balancer" => Ok(ResourceKind::LoadBalancer),
            other => Err(QueryRunnerError::InvalidQuery(format!(
                "unknown resource type: {other}"
            ))),
        }
    }
}

/// Requested time window. Two ranges are the same bucket only if both
/// instants are exactly equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        TimeRange { from, to }
    }

    /// Length of the range, zero if `to` is before `from`.
    pub fn duration(&self) -> Duration {
        (self.to - self.from).to_std().unwrap_or_default()
    }
}

/// What a caller asked for: a set of metric types over a range at a step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOptions<T> {
    pub metric_types: Vec<T>,
    pub time_range: TimeRange,
    pub step: Step,
}

impl<T: PartialEq> RequestOptions<T> {
    pub fn new(metric_types: Vec<T>, time_range: TimeRange, step: Step) -> Self {
        RequestOptions {
            metric_types,
            time_range,
            step,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric_types.is_empty() {
            return Err(QueryRunnerError::InvalidRequest(
                "at least one metric type is required".into(),
            ));
        }
        if self.step == 0 {
            return Err(QueryRunnerError::InvalidRequest(
                "step must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Returns true if a response fetched for `self` fully satisfies `other`:
    /// same range, same step, and every type `other` asked for is present.
    pub fn matches(&self, other: &RequestOptions<T>) -> bool {
        self.time_range == other.time_range
            && self.step == other.step
            && other
                .metric_types
                .iter()
                .all(|t| self.metric_types.contains(t))
    }
}

/// One raw sample as returned by the API: `[timestamp, "value"]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, String)", into = "(f64, String)")]
pub struct MetricsValue {
    pub timestamp: f64,
    pub value: String,
}

impl From<(f64, String)> for MetricsValue {
    fn from((timestamp, value): (f64, String)) -> Self {
        MetricsValue { timestamp, value }
    }
}

impl From<MetricsValue> for (f64, String) {
    fn from(v: MetricsValue) -> Self {
        (v.timestamp, v.value)
    }
}
