//! Common types for metrics definitions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Gauge => "Gauge",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

/// Registers the descriptions of `defs` with the installed recorder.
pub fn describe_all(defs: &[MetricDef]) {
    for def in defs {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Gauge => metrics::describe_gauge!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
    ($def:expr, $($labels:tt)+) => {
        metrics::counter!($def.name, $($labels)+)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
    ($def:expr, $($labels:tt)+) => {
        metrics::gauge!($def.name, $($labels)+)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
    ($def:expr, $($labels:tt)+) => {
        metrics::histogram!($def.name, $($labels)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COUNTER: MetricDef = MetricDef {
        name: "test.counter",
        metric_type: MetricType::Counter,
        description: "A counter used in tests",
    };

    #[test]
    fn test_macros_without_recorder() {
        // Without an installed recorder the metrics facade is a no-op.
        describe_all(&[TEST_COUNTER]);
        counter!(TEST_COUNTER).increment(1);
        counter!(TEST_COUNTER, "reason" => "test").increment(1);
        assert_eq!(TEST_COUNTER.metric_type.as_str(), "Counter");
    }
}
