use shared::metrics_defs::{MetricDef, MetricType};

pub const BATCH_DURATION: MetricDef = MetricDef {
    name: "batch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to answer a whole batch in seconds. Tagged with status.",
};

pub const BATCH_QUERIES: MetricDef = MetricDef {
    name: "batch.queries",
    metric_type: MetricType::Histogram,
    description: "Number of queries carried by a batch",
};

pub const BATCHES_INFLIGHT: MetricDef = MetricDef {
    name: "batches.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of batches currently being processed",
};

pub const QUERY_DURATION: MetricDef = MetricDef {
    name: "query.duration",
    metric_type: MetricType::Histogram,
    description: "Upstream call duration in seconds. Tagged with outcome.",
};

pub const QUERY_OUTCOMES: MetricDef = MetricDef {
    name: "query.outcome",
    metric_type: MetricType::Counter,
    description: "Settled query responses. Tagged with result (value, error).",
};

pub const ALL_METRICS: &[MetricDef] = &[
    BATCH_DURATION,
    BATCH_QUERIES,
    BATCHES_INFLIGHT,
    QUERY_DURATION,
    QUERY_OUTCOMES,
];
