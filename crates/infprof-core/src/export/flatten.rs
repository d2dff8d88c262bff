//! Flattening of sample trees into ordered `(column, value)` rows.

use std::fmt;
use std::str::FromStr;

use crate::model::{Fields, Reading, Sample, Value};

/// Column holding the sample timestamp; always first.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// One flattened sample, in emission order.
pub type Row = Vec<(String, Value)>;

/// How sequence sections (per-GPU, per-process) become columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlattenMode {
    /// One column per element field: `nvidia0UtilizationGpu`.
    #[default]
    Expand,
    /// One JSON text column per sequence section: `nvidiaJson`.
    Json,
}

impl FromStr for FlattenMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "expand" => Ok(FlattenMode::Expand),
            "json" => Ok(FlattenMode::Json),
            other => Err(format!("unknown flatten mode '{}'", other)),
        }
    }
}

impl fmt::Display for FlattenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlattenMode::Expand => write!(f, "expand"),
            FlattenMode::Json => write!(f, "json"),
        }
    }
}

/// Flattens one sample. Mapping sections contribute their fields without
/// the section name; everything else is keyed by the section name.
pub fn flatten_sample(sample: &Sample, mode: FlattenMode) -> Row {
    let mut row = vec![(TIMESTAMP_COLUMN.to_string(), Value::Int(sample.timestamp))];

    for (name, reading) in &sample.sections {
        match (reading, mode) {
            (Reading::Mapping(fields), _) => flatten_fields(fields, &mut row),
            (Reading::Sequence(items), FlattenMode::Json) => {
                row.push((format!("{}Count", name), Value::from(items.len())));
                row.push((format!("{}Json", name), Value::Text(to_json(reading).to_string())));
            }
            _ => flatten_into(name, reading, &mut row),
        }
    }
    row
}

fn flatten_fields(fields: &Fields, row: &mut Row) {
    for (key, reading) in fields {
        flatten_into(key, reading, row);
    }
}

fn flatten_into(key: &str, reading: &Reading, row: &mut Row) {
    match reading {
        Reading::Scalar { value, time } => {
            row.push((key.to_string(), value.clone()));
            if let Some(t) = time {
                row.push((format!("{}T", key), Value::Int(*t)));
            }
        }
        Reading::Mapping(fields) => {
            for (k, r) in fields {
                flatten_into(&format!("{}_{}", key, k), r, row);
            }
        }
        Reading::Histogram(h) => {
            for b in &h.buckets {
                row.push((format!("{}_{}", key, b.le), Value::Float(b.count)));
            }
        }
        Reading::Sequence(items) => {
            row.push((format!("{}Count", key), Value::from(items.len())));
            for (i, item) in items.iter().enumerate() {
                match item {
                    Reading::Mapping(fields) => {
                        for (k, r) in fields {
                            flatten_into(&format!("{}{}{}", key, i, capitalize(k)), r, row);
                        }
                    }
                    other => flatten_into(&format!("{}{}", key, i), other, row),
                }
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Plain JSON projection of a reading: tags and read times are dropped.
pub fn to_json(reading: &Reading) -> serde_json::Value {
    match reading {
        Reading::Scalar { value, .. } => {
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
        }
        Reading::Mapping(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, r)| (k.clone(), to_json(r)))
                .collect(),
        ),
        Reading::Sequence(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Reading::Histogram(h) => serde_json::Value::Object(
            h.buckets
                .iter()
                .map(|b| (b.le.clone(), serde_json::json!(b.count)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldsExt, Histogram};

    fn lookup<'a>(row: &'a Row, key: &str) -> Option<&'a Value> {
        row.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn gpu_sample() -> Sample {
        let mut process = Fields::new();
        process.put("pid", 4242, 7);
        process.put("name", "python3", 7);

        let mut device = Fields::new();
        device.put_plain("index", 0);
        device.put("utilizationGpu", 87, 5);
        device.insert(
            "processes".to_string(),
            Reading::Sequence(vec![Reading::Mapping(process)]),
        );

        let mut sample = Sample::new(1_000);
        sample.sections.insert(
            "nvidia".to_string(),
            Reading::Sequence(vec![Reading::Mapping(device)]),
        );
        sample
    }

    #[test]
    fn test_timestamp_first_and_mapping_unprefixed() {
        let mut cpu = Fields::new();
        cpu.put("vCpuTime", 1200, 99);
        cpu.put_plain("vLoadAvg", 0.5);
        let mut sample = Sample::new(1_000);
        sample.sections.insert("cpu".to_string(), Reading::Mapping(cpu));

        let row = flatten_sample(&sample, FlattenMode::Expand);
        assert_eq!(row[0], ("timestamp".to_string(), Value::Int(1_000)));
        assert_eq!(lookup(&row, "vCpuTime"), Some(&Value::Int(1200)));
        assert_eq!(lookup(&row, "vCpuTimeT"), Some(&Value::Int(99)));
        assert_eq!(lookup(&row, "vLoadAvg"), Some(&Value::Float(0.5)));
        assert_eq!(lookup(&row, "vLoadAvgT"), None);
    }

    #[test]
    fn test_sequence_expands_with_camel_case() {
        let row = flatten_sample(&gpu_sample(), FlattenMode::Expand);
        assert_eq!(lookup(&row, "nvidiaCount"), Some(&Value::Int(1)));
        assert_eq!(lookup(&row, "nvidia0Index"), Some(&Value::Int(0)));
        assert_eq!(lookup(&row, "nvidia0UtilizationGpu"), Some(&Value::Int(87)));
        assert_eq!(lookup(&row, "nvidia0UtilizationGpuT"), Some(&Value::Int(5)));
        assert_eq!(lookup(&row, "nvidia0ProcessesCount"), Some(&Value::Int(1)));
        assert_eq!(lookup(&row, "nvidia0Processes0Pid"), Some(&Value::Int(4242)));
        assert_eq!(
            lookup(&row, "nvidia0Processes0Name"),
            Some(&Value::from("python3"))
        );
    }

    #[test]
    fn test_json_mode_keeps_sequence_whole() {
        let row = flatten_sample(&gpu_sample(), FlattenMode::Json);
        assert_eq!(lookup(&row, "nvidiaCount"), Some(&Value::Int(1)));
        assert!(lookup(&row, "nvidia0UtilizationGpu").is_none());

        let Some(Value::Text(json)) = lookup(&row, "nvidiaJson") else {
            panic!("json column missing");
        };
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(parsed[0]["utilizationGpu"], 87);
        assert_eq!(parsed[0]["processes"][0]["name"], "python3");
    }

    #[test]
    fn test_nested_mapping_and_histogram() {
        let mut cache = Fields::new();
        cache.put_plain("L1d", 65536);
        let mut fields = Fields::new();
        fields.insert("vCpuCache".to_string(), Reading::Mapping(cache));
        fields.insert(
            "ttft_histogram".to_string(),
            Reading::Histogram(Histogram::from_buckets(vec![
                ("+Inf".to_string(), 10.0),
                ("0.5".to_string(), 3.0),
            ])),
        );
        let mut sample = Sample::new(1);
        sample.sections.insert("x".to_string(), Reading::Mapping(fields));

        let row = flatten_sample(&sample, FlattenMode::Expand);
        assert_eq!(lookup(&row, "vCpuCache_L1d"), Some(&Value::Int(65536)));

        let keys: Vec<&str> = row
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| k.starts_with("ttft"))
            .collect();
        assert_eq!(keys, vec!["ttft_histogram_0.5", "ttft_histogram_inf"]);
        assert_eq!(lookup(&row, "ttft_histogram_inf"), Some(&Value::Float(10.0)));
    }

    #[test]
    fn test_flatten_mode_from_str() {
        assert_eq!("JSON".parse::<FlattenMode>(), Ok(FlattenMode::Json));
        assert_eq!("expand".parse::<FlattenMode>(), Ok(FlattenMode::Expand));
        assert!("wide".parse::<FlattenMode>().is_err());
    }
}
