//! Metric shapes for the two resource kinds.
//!
//! Servers and load balancers expose the same metrics structure from the API,
//! only the metric types and series names differ. Both shapes are generated from
//! the `resource_metrics!` template and implement [`ResourceMetrics`], which is
//! the only thing the query runner knows about them.

use crate::errors::QueryRunnerError;
use crate::types::{MetricsValue, ResourceKind, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A metric family that can be requested for a resource kind.
pub trait MetricKind: Copy + Ord + Hash + fmt::Debug + Send + Sync + 'static {
    /// Value of the `type` query parameter in the API.
    fn as_str(&self) -> &'static str;

    /// Names of the time series the API returns for this type.
    fn series(&self) -> &'static [&'static str];
}

/// Display metadata for a single time series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeriesInfo {
    pub display_name: &'static str,
    pub unit: &'static str,
}

/// Time series metrics of one resource, keyed by series name.
pub trait ResourceMetrics: Clone + fmt::Debug + Send + Sync + 'static {
    type Kind: MetricKind;

    const RESOURCE_KIND: ResourceKind;

    fn from_parts(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Step,
        time_series: HashMap<String, Vec<MetricsValue>>,
    ) -> Self;

    fn start(&self) -> DateTime<Utc>;

    fn end(&self) -> DateTime<Utc>;

    fn step(&self) -> Step;

    fn time_series(&self) -> &HashMap<String, Vec<MetricsValue>>;

    fn series_info(series: &str) -> Option<SeriesInfo>;

    /// Projects the metrics down to the series belonging to `types`.
    /// Series the upstream did not return stay absent.
    fn filter(&self, types: &[Self::Kind]) -> Self {
        let time_series = types
            .iter()
            .flat_map(|t| t.series().iter())
            .filter_map(|name| {
                self.time_series()
                    .get(*name)
                    .map(|values| (name.to_string(), values.clone()))
            })
            .collect();

        Self::from_parts(self.start(), self.end(), self.step(), time_series)
    }
}

macro_rules! resource_metrics {
    (
        $(#[$doc:meta])*
        $metrics:ident($resource_kind:expr), $kind:ident {
            $($variant:ident => $type_name:literal [$($series:literal),+ $(,)?]),+ $(,)?
        }
        series {
            $($series_name:literal => ($display:literal, $unit:literal)),* $(,)?
        }
    ) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $kind {
            $(
                #[serde(rename = $type_name)]
                $variant,
            )+
        }

        impl MetricKind for $kind {
            fn as_str(&self) -> &'static str {
                match self {
                    $($kind::$variant => $type_name,)+
                }
            }

            fn series(&self) -> &'static [&'static str] {
                match self {
                    $($kind::$variant => &[$($series),+],)+
                }
            }
        }

        impl fmt::Display for $kind {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $kind {
            type Err = QueryRunnerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($type_name => Ok($kind::$variant),)+
                    other => Err(QueryRunnerError::InvalidQuery(format!(
                        "unknown {} metrics type: {other}",
                        $resource_kind.as_str()
                    ))),
                }
            }
        }

        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Serialize)]
        pub struct $metrics {
            pub start: DateTime<Utc>,
            pub end: DateTime<Utc>,
            pub step: Step,
            pub time_series: HashMap<String, Vec<MetricsValue>>,
        }

        impl ResourceMetrics for $metrics {
            type Kind = $kind;

            const RESOURCE_KIND: ResourceKind = $resource_kind;

            fn from_parts(
                start: DateTime<Utc>,
                end: DateTime<Utc>,
                step: Step,
                time_series: HashMap<String, Vec<MetricsValue>>,
            ) -> Self {
                $metrics {
                    start,
                    end,
                    step,
                    time_series,
                }
            }

            fn start(&self) -> DateTime<Utc> {
                self.start
            }

            fn end(&self) -> DateTime<Utc> {
                self.end
            }

            fn step(&self) -> Step {
                self.step
            }

            fn time_series(&self) -> &HashMap<String, Vec<MetricsValue>> {
                &self.time_series
            }

            fn series_info(series: &str) -> Option<SeriesInfo> {
                match series {
                    $($series_name => Some(SeriesInfo {
                        display_name: $display,
                        unit: $unit,
                    }),)*
                    _ => None,
                }
            }
        }
    };
}

resource_metrics! {
    /// Metrics of a single server.
    ServerMetrics(ResourceKind::Server), ServerMetricType {
        Cpu => "cpu" ["cpu"],
        Disk => "disk" [
            "disk.0.iops.read",
            "disk.0.iops.write",
            "disk.0.bandwidth.read",
            "disk.0.bandwidth.write",
        ],
        Network => "network" [
            "network.0.pps.in",
            "network.0.pps.out",
            "network.0.bandwidth.in",
            "network.0.bandwidth.out",
        ],
    }
    series {
        "cpu" => ("Usage", "percent"),
        "disk.0.iops.read" => ("IOPS Read", "iops"),
        "disk.0.iops.write" => ("IOPS Write", "iops"),
        "disk.0.bandwidth.read" => ("Bandwidth Read", "bytes/sec(IEC)"),
        "disk.0.bandwidth.write" => ("Bandwidth Write", "bytes/sec(IEC)"),
        "network.0.pps.in" => ("PPS Received", "packets/sec"),
        "network.0.pps.out" => ("PPS Sent", "packets/sec"),
        "network.0.bandwidth.in" => ("Bandwidth Received", "bytes/sec(IEC)"),
        "network.0.bandwidth.out" => ("Bandwidth Sent", "bytes/sec(IEC)"),
    }
}

resource_metrics! {
    /// Metrics of a single load balancer.
    LoadBalancerMetrics(ResourceKind::LoadBalancer), LoadBalancerMetricType {
        OpenConnections => "open_connections" ["open_connections"],
        ConnectionsPerSecond => "connections_per_second" ["connections_per_second"],
        RequestsPerSecond => "requests_per_second" ["requests_per_second"],
        Bandwidth => "bandwidth" ["bandwidth.in", "bandwidth.out"],
    }
    series {
        "open_connections" => ("Open Connections", "short"),
        "connections_per_second" => ("Connections", "cps"),
        "requests_per_second" => ("Requests", "reqps"),
        "bandwidth.in" => ("Bandwidth Received", "bytes/sec(IEC)"),
        "bandwidth.out" => ("Bandwidth Sent", "bytes/sec(IEC)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(series: &[&str]) -> ServerMetrics {
        let time_series = series
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    vec![MetricsValue {
                        timestamp: 1.0,
                        value: "1".into(),
                    }],
                )
            })
            .collect();
        ServerMetrics::from_parts(
            DateTime::<Utc>::UNIX_EPOCH,
            DateTime::<Utc>::UNIX_EPOCH,
            60,
            time_series,
        )
    }

    #[test]
    fn test_filter_keeps_requested_series() {
        let metrics = sample(&["cpu", "disk.0.iops.read", "disk.0.iops.write", "network.0.pps.in"]);

        let cpu = metrics.filter(&[ServerMetricType::Cpu]);
        assert_eq!(cpu.time_series.len(), 1);
        assert!(cpu.time_series.contains_key("cpu"));
        assert_eq!(cpu.step, 60);

        let disk = metrics.filter(&[ServerMetricType::Disk]);
        let mut names: Vec<_> = disk.time_series.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["disk.0.iops.read", "disk.0.iops.write"]);
    }

    #[test]
    fn test_filter_does_not_invent_series() {
        let metrics = sample(&["cpu"]);
        let filtered = metrics.filter(&[ServerMetricType::Network]);
        assert!(filtered.time_series.is_empty());
    }

    #[test]
    fn test_metric_type_parsing() {
        assert_eq!(
            "cpu".parse::<ServerMetricType>().unwrap(),
            ServerMetricType::Cpu
        );
        assert_eq!(
            "bandwidth".parse::<LoadBalancerMetricType>().unwrap(),
            LoadBalancerMetricType::Bandwidth
        );
        // Resource kinds do not share metric types
        assert!("cpu".parse::<LoadBalancerMetricType>().is_err());
    }

    #[test]
    fn test_series_info() {
        assert_eq!(
            ServerMetrics::series_info("cpu"),
            Some(SeriesInfo {
                display_name: "Usage",
                unit: "percent"
            })
        );
        assert_eq!(
            LoadBalancerMetrics::series_info("bandwidth.out").map(|i| i.display_name),
            Some("Bandwidth Sent")
        );
        assert_eq!(ServerMetrics::series_info("unknown"), None);
    }
}
