//! Metrics definitions for the query runner.

use shared::metrics_defs::{MetricDef, MetricType};

pub const METRICS_REQUESTS: MetricDef = MetricDef {
    name: "query_runner.requests",
    metric_type: MetricType::Counter,
    description: "Number of metrics requests submitted. Tagged with resource_kind.",
};

pub const PENDING_REQUESTS: MetricDef = MetricDef {
    name: "query_runner.pending",
    metric_type: MetricType::Histogram,
    description: "Pending requests taken into a dispatch round. Tagged with resource_kind.",
};

pub const UPSTREAM_CALLS: MetricDef = MetricDef {
    name: "query_runner.upstream.calls",
    metric_type: MetricType::Counter,
    description: "Upstream metrics calls issued after deduplication. Tagged with resource_kind.",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "query_runner.upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Upstream metrics call duration in seconds. Tagged with resource_kind.",
};

pub const UPSTREAM_FAILURES: MetricDef = MetricDef {
    name: "query_runner.upstream.failures",
    metric_type: MetricType::Counter,
    description: "Failed upstream metrics calls. Tagged with resource_kind.",
};

pub const NAME_CACHE_HIT: MetricDef = MetricDef {
    name: "name_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of name lookups served from the cache",
};

pub const NAME_CACHE_MISS: MetricDef = MetricDef {
    name: "name_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of name lookups that required an API call",
};

pub const ALL_METRICS: &[MetricDef] = &[
    METRICS_REQUESTS,
    PENDING_REQUESTS,
    UPSTREAM_CALLS,
    UPSTREAM_DURATION,
    UPSTREAM_FAILURES,
    NAME_CACHE_HIT,
    NAME_CACHE_MISS,
];
