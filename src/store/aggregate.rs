//! Per-bucket aggregation.

use std::str::FromStr;

use serde::Serialize;

use super::StoreError;

/// Aggregation method applied to each time bucket of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Mean,
    Sum,
    Max,
    Min,
    Raw,
}

impl FromStr for Method {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mean" => Ok(Method::Mean),
            "sum" => Ok(Method::Sum),
            "max" => Ok(Method::Max),
            "min" => Ok(Method::Min),
            "raw" => Ok(Method::Raw),
            _ => Err(StoreError::UnknownMethod(s.to_string())),
        }
    }
}

/// A reduced bucket value: a scalar for mean/sum/max/min, the point's full
/// data list for raw.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reduced {
    Scalar(f64),
    Raw(Vec<f64>),
}

/// Reduces one bucket's data list under `method`.
///
/// `None` means the bucket stays null in the result series; only mean, max,
/// and min skip empty buckets. Sum reduces an empty bucket to 0.0 and raw
/// to an empty list.
pub fn reduce(method: Method, data: &[f64]) -> Option<Reduced> {
    match method {
        Method::Mean => {
            if data.is_empty() {
                None
            } else {
                Some(Reduced::Scalar(data.iter().sum::<f64>() / data.len() as f64))
            }
        }
        Method::Sum => Some(Reduced::Scalar(data.iter().sum())),
        Method::Max => data.iter().copied().reduce(f64::max).map(Reduced::Scalar),
        Method::Min => data.iter().copied().reduce(f64::min).map(Reduced::Scalar),
        Method::Raw => Some(Reduced::Raw(data.to_vec())),
    }
}
