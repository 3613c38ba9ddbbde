use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Tool request duration in seconds. Tagged with status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of tool requests currently being processed",
};

pub const RATE_LIMITED: MetricDef = MetricDef {
    name: "rate_limit.rejected",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the per-client rate limiter",
};

pub const UPLOAD_REJECTED: MetricDef = MetricDef {
    name: "upload.rejected",
    metric_type: MetricType::Counter,
    description: "Uploads rejected by validation. Tagged with reason.",
};

pub const UNKNOWN_TOOL: MetricDef = MetricDef {
    name: "tool.unknown",
    metric_type: MetricType::Counter,
    description: "Requests for a tool no category claims",
};

pub const BACKEND_UNHEALTHY: MetricDef = MetricDef {
    name: "backend.unhealthy",
    metric_type: MetricType::Counter,
    description: "Failed backend health checks. Tagged with category, reason.",
};

pub const HEALTH_CACHE_HIT: MetricDef = MetricDef {
    name: "health_cache.hit",
    metric_type: MetricType::Counter,
    description: "Health checks answered from the cache",
};

pub const FORWARD_ATTEMPTS: MetricDef = MetricDef {
    name: "forward.attempts",
    metric_type: MetricType::Counter,
    description: "Attempts to reach a backend. Tagged with category, outcome.",
};

pub const FORWARD_ATTEMPT_DURATION: MetricDef = MetricDef {
    name: "forward.attempt.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single forward attempt in seconds. Tagged with category.",
};

/// Every metric above, for describing them to the recorder at startup
pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    RATE_LIMITED,
    UPLOAD_REJECTED,
    UNKNOWN_TOOL,
    BACKEND_UNHEALTHY,
    HEALTH_CACHE_HIT,
    FORWARD_ATTEMPTS,
    FORWARD_ATTEMPT_DURATION,
];
