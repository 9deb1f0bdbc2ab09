//! Metrics definitions for the photos service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const UPSTREAM_ATTEMPTS: MetricDef = MetricDef {
    name: "upstream.attempts",
    metric_type: MetricType::Counter,
    description: "Number of HTTP attempts made against the upstream photo service",
};

pub const UPSTREAM_RETRIES: MetricDef = MetricDef {
    name: "upstream.retries",
    metric_type: MetricType::Counter,
    description: "Number of upstream attempts that were retried after a transient failure",
};

pub const UPSTREAM_FAILURES: MetricDef = MetricDef {
    name: "upstream.failures",
    metric_type: MetricType::Counter,
    description: "Number of upstream fetches that failed after all attempts",
};

pub const HTTP_REQUESTS: MetricDef = MetricDef {
    name: "http.requests",
    metric_type: MetricType::Counter,
    description: "Number of API requests served, tagged by route and status",
};

pub const HTTP_REQUEST_DURATION: MetricDef = MetricDef {
    name: "http.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to serve an API request in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    UPSTREAM_ATTEMPTS,
    UPSTREAM_RETRIES,
    UPSTREAM_FAILURES,
    HTTP_REQUESTS,
    HTTP_REQUEST_DURATION,
];
