//! Ingest record types.

use crate::session::Value;

/// A single metric observation routed to one storage tier.
///
/// `time` is unix seconds and is expected to be divisible by `rollup`;
/// `table` names the tier's storage table. A multi-tier deployment submits
/// one sample per tier for each observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub path: String,
    pub time: i64,
    pub metric: f64,
    pub rollup: i64,
    pub period: i64,
    pub ttl: i64,
    pub table: String,
}

impl Sample {
    /// Positional binding for the insert statements:
    /// `[ttl, [metric], rollup, period, path, time]`.
    ///
    /// The metric is wrapped in a single-element list because the storage
    /// column is a list of doubles.
    pub(crate) fn bind(&self) -> Vec<Value> {
        vec![
            Value::Int(self.ttl),
            Value::DoubleList(vec![self.metric]),
            Value::Int(self.rollup),
            Value::Int(self.period),
            Value::Text(self.path.clone()),
            Value::Int(self.time),
        ]
    }
}

/// Path observation forwarded to the external path index.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRecord {
    pub path: String,
    pub time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_wraps_metric_in_singleton_list() {
        let sample = Sample {
            path: "a.b".to_string(),
            time: 60,
            metric: 1.5,
            rollup: 60,
            period: 1440,
            ttl: 86400,
            table: "metric".to_string(),
        };

        assert_eq!(
            sample.bind(),
            vec![
                Value::Int(86400),
                Value::DoubleList(vec![1.5]),
                Value::Int(60),
                Value::Int(1440),
                Value::Text("a.b".to_string()),
                Value::Int(60),
            ]
        );
    }
}
