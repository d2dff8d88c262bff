//! Tagged readings produced by collectors.
//!
//! A collector never hands back loosely typed data: every result is a
//! [`Reading`] whose variant tells the flattening code exactly how to
//! turn it into columns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Named readings of one subsystem.
pub type Fields = BTreeMap<String, Reading>;

/// One node of a sample tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Reading {
    /// A single value and the instant (Unix ns) right before it was read.
    Scalar {
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<i64>,
    },
    Mapping(Fields),
    Sequence(Vec<Reading>),
    Histogram(Histogram),
}

impl Reading {
    /// Scalar stamped with the time of its read.
    pub fn at(value: impl Into<Value>, time: i64) -> Self {
        Reading::Scalar {
            value: value.into(),
            time: Some(time),
        }
    }

    /// Scalar without a read timestamp (identity and static facts).
    pub fn plain(value: impl Into<Value>) -> Self {
        Reading::Scalar {
            value: value.into(),
            time: None,
        }
    }

    /// The "nothing collected" result.
    pub fn empty() -> Self {
        Reading::Mapping(Fields::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Reading::Scalar { .. } => false,
            Reading::Mapping(m) => m.is_empty(),
            Reading::Sequence(s) => s.is_empty(),
            Reading::Histogram(h) => h.buckets.is_empty(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Reading::Scalar { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Fields> {
        match self {
            Reading::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Reading]> {
        match self {
            Reading::Sequence(s) => Some(s),
            _ => None,
        }
    }
}

/// Insertion helpers for building [`Fields`].
pub trait FieldsExt {
    fn put(&mut self, name: &str, value: impl Into<Value>, time: i64);
    fn put_plain(&mut self, name: &str, value: impl Into<Value>);
    fn value_of(&self, name: &str) -> Option<&Value>;
}

impl FieldsExt for Fields {
    fn put(&mut self, name: &str, value: impl Into<Value>, time: i64) {
        self.insert(name.to_string(), Reading::at(value, time));
    }

    fn put_plain(&mut self, name: &str, value: impl Into<Value>) {
        self.insert(name.to_string(), Reading::plain(value));
    }

    fn value_of(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Reading::value)
    }
}

/// One cumulative histogram bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Upper bound as text; `"inf"` for the catch-all bucket.
    pub le: String,
    pub count: f64,
}

/// Cumulative bucket counts ordered by ascending upper bound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub buckets: Vec<Bucket>,
}

impl Histogram {
    /// Builds a histogram from `(bound, count)` pairs in any order.
    ///
    /// Infinite bounds (`+Inf`, `inf`) are normalised to `"inf"` and sort last.
    /// Bounds that are not numbers are dropped.
    pub fn from_buckets(pairs: impl IntoIterator<Item = (String, f64)>) -> Self {
        let mut keyed: Vec<(f64, Bucket)> = pairs
            .into_iter()
            .filter_map(|(le, count)| {
                let bound = parse_bound(&le)?;
                let le = if bound.is_infinite() {
                    "inf".to_string()
                } else {
                    le
                };
                let count = if count.is_finite() { count } else { 0.0 };
                Some((bound, Bucket { le, count }))
            })
            .collect();

        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);

        Self {
            buckets: keyed.into_iter().map(|(_, b)| b).collect(),
        }
    }

    pub fn get(&self, le: &str) -> Option<f64> {
        self.buckets.iter().find(|b| b.le == le).map(|b| b.count)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.le.as_str())
    }
}

fn parse_bound(le: &str) -> Option<f64> {
    match le.trim().to_ascii_lowercase().as_str() {
        "+inf" | "inf" => Some(f64::INFINITY),
        other => other.parse::<f64>().ok().filter(|v| !v.is_nan()),
    }
}
