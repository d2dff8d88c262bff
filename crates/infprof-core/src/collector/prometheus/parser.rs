//! Prometheus text exposition parser.
//!
//! Turns `name{labels} value` lines into flat fields and bucketed
//! histograms with cardinality-exploding labels removed.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{Histogram, Value};

/// Labels that identify the model or engine rather than the measurement.
pub const IGNORED_LABELS: &[&str] = &[
    "model_name",
    "model",
    "engine_id",
    "engine",
    "handler",
    "method",
];

/// Namespace of inference-server metrics that get canonical names.
const VLLM_NAMESPACE: &str = "vllm:";

const SERIES_SUFFIXES: &[&str] = &["_bucket", "_sum", "_count", "_total", "_created"];

/// Raw base names and their canonical replacements.
const RENAMES: &[(&str, &str)] = &[
    ("num_requests_running", "requests_running"),
    ("num_requests_waiting", "requests_waiting"),
    ("kv_cache_usage_perc", "kv_cache_usage_percent"),
    ("num_preemptions", "preemptions"),
    ("request_success", "requests_finished"),
    ("corrupted_requests", "requests_corrupted"),
    ("prompt_tokens", "tokens_prompt"),
    ("generation_tokens", "tokens_generation"),
    ("time_to_first_token_seconds", "latency_ttft_s"),
    ("e2e_request_latency_seconds", "latency_e2e_s"),
    ("request_queue_time_seconds", "latency_queue_s"),
    ("request_inference_time_seconds", "latency_inference_s"),
    ("request_prefill_time_seconds", "latency_prefill_s"),
    ("request_decode_time_seconds", "latency_decode_s"),
    ("inter_token_latency_seconds", "latency_inter_token_s"),
    ("request_prompt_tokens", "request_size_prompt_tokens"),
    ("request_generation_tokens", "request_size_generation_tokens"),
    ("iteration_tokens", "tokens_per_step"),
];

static LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z_:][a-zA-Z0-9_:]*)(?:\{(.*)\})?\s+(\S+)(?:\s+-?\d+)?$")
        .expect("static regex")
});

/// Result of parsing one scrape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMetrics {
    pub fields: BTreeMap<String, Value>,
    /// Keyed by base name plus label suffix, without `_bucket`.
    pub histograms: BTreeMap<String, Histogram>,
}

impl ParsedMetrics {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.histograms.is_empty()
    }
}

/// Parses a sample value: any `nan` is 0, any `inf` keeps its sign.
pub fn parse_value(s: &str) -> Option<f64> {
    let lower = s.to_ascii_lowercase();
    if lower.contains("nan") {
        Some(0.0)
    } else if lower.contains("inf") {
        Some(if lower.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        })
    } else {
        lower.parse().ok()
    }
}

/// Splits `k="v",k2="v2"` on commas outside quotes, dropping ignored labels.
pub fn parse_labels(s: &str) -> BTreeMap<String, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in s.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .iter()
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            let k = k.trim();
            if k.is_empty() || IGNORED_LABELS.contains(&k) {
                return None;
            }
            Some((k.to_string(), v.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// `_k1_v1_k2_v2` over labels in key order.
pub fn label_suffix(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("_{}_{}", k, v))
        .collect()
}

/// Canonical field name for a raw metric name.
///
/// `vllm:`-namespaced names go through the rename table (suffix preserved)
/// and get a `vllm_` prefix; other names only have `:` replaced by `_`.
pub fn canonical_name(raw: &str) -> String {
    let Some(rest) = raw.strip_prefix(VLLM_NAMESPACE) else {
        return raw.replace(':', "_");
    };

    let rename = |base: &str| {
        RENAMES
            .iter()
            .find(|(from, _)| *from == base)
            .map(|(_, to)| *to)
    };

    let renamed = match rename(rest) {
        Some(to) => to.to_string(),
        None => SERIES_SUFFIXES
            .iter()
            .find_map(|suffix| {
                let base = rest.strip_suffix(suffix)?;
                rename(base).map(|to| format!("{}{}", to, suffix))
            })
            .unwrap_or_else(|| rest.to_string()),
    };
    format!("vllm_{}", renamed.replace(':', "_"))
}

/// Parses an exposition document. Comments, blanks and malformed lines are skipped.
pub fn parse_exposition(text: &str) -> ParsedMetrics {
    let mut out = ParsedMetrics::default();
    let mut buckets: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(caps) = LINE.captures(line) else {
            continue;
        };
        let raw = &caps[1];
        let Some(value) = parse_value(&caps[3]) else {
            continue;
        };
        let mut labels = caps.get(2).map(|m| parse_labels(m.as_str())).unwrap_or_default();
        let name = canonical_name(raw);

        if raw.ends_with("_bucket")
            && let Some(le) = labels.remove("le")
        {
            let base = name.strip_suffix("_bucket").unwrap_or(&name);
            let key = format!("{}{}", base, label_suffix(&labels));
            buckets.entry(key).or_default().push((le, value));
        } else if raw.ends_with("_info") && !labels.is_empty() {
            for (k, v) in &labels {
                out.fields.insert(format!("{}_{}", name, k), Value::coerce(v));
            }
        } else {
            out.fields
                .insert(format!("{}{}", name, label_suffix(&labels)), Value::Float(value));
        }
    }

    out.histograms = buckets
        .into_iter()
        .map(|(key, pairs)| (key, Histogram::from_buckets(pairs)))
        .collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets_sorted_with_inf() {
        let parsed = parse_exposition("foo_bucket{le=\"0.5\"} 3\nfoo_bucket{le=\"+Inf\"} 10\n");
        let h = &parsed.histograms["foo"];
        let keys: Vec<&str> = h.keys().collect();
        assert_eq!(keys, vec!["0.5", "inf"]);
        assert_eq!(h.get("0.5"), Some(3.0));
        assert_eq!(h.get("inf"), Some(10.0));
        assert!(parsed.fields.is_empty());
    }

    #[test]
    fn test_value_parsing() {
        assert_eq!(parse_value("NaN"), Some(0.0));
        assert_eq!(parse_value("+Inf"), Some(f64::INFINITY));
        assert_eq!(parse_value("-Inf"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_value("1.5e3"), Some(1500.0));
        assert_eq!(parse_value("abc"), None);
    }

    #[test]
    fn test_ignored_labels_and_suffix() {
        let text = "vllm:num_requests_running{engine=\"0\",model_name=\"llama\"} 4\n\
                    http_requests_total{handler=\"/metrics\",status=\"2xx\",method=\"GET\"} 17\n";
        let parsed = parse_exposition(text);
        assert_eq!(
            parsed.fields.get("vllm_requests_running"),
            Some(&Value::Float(4.0))
        );
        assert_eq!(
            parsed.fields.get("http_requests_total_status_2xx"),
            Some(&Value::Float(17.0))
        );
    }

    #[test]
    fn test_rename_keeps_series_suffix() {
        assert_eq!(
            canonical_name("vllm:time_to_first_token_seconds_bucket"),
            "vllm_latency_ttft_s_bucket"
        );
        assert_eq!(canonical_name("vllm:prompt_tokens_total"), "vllm_tokens_prompt_total");
        assert_eq!(canonical_name("vllm:kv_cache_usage_perc"), "vllm_kv_cache_usage_percent");
        assert_eq!(canonical_name("vllm:unknown_gauge"), "vllm_unknown_gauge");
        assert_eq!(canonical_name("process:cpu_seconds"), "process_cpu_seconds");
    }

    #[test]
    fn test_histogram_keyed_by_remaining_labels() {
        let text = "\
vllm:e2e_request_latency_seconds_bucket{le=\"1.0\",model_name=\"m\",finished_reason=\"stop\"} 2
vllm:e2e_request_latency_seconds_bucket{le=\"+Inf\",model_name=\"m\",finished_reason=\"stop\"} 5
vllm:e2e_request_latency_seconds_sum{model_name=\"m\",finished_reason=\"stop\"} 3.5
";
        let parsed = parse_exposition(text);
        let h = &parsed.histograms["vllm_latency_e2e_s_finished_reason_stop"];
        assert_eq!(h.get("inf"), Some(5.0));
        assert_eq!(
            parsed.fields.get("vllm_latency_e2e_s_sum_finished_reason_stop"),
            Some(&Value::Float(3.5))
        );
    }

    #[test]
    fn test_info_labels_become_fields() {
        let text = "vllm:cache_config_info{block_size=\"16\",gpu_memory_utilization=\"0.9\",cache_dtype=\"auto\"} 1\n";
        let parsed = parse_exposition(text);
        assert_eq!(
            parsed.fields.get("vllm_cache_config_info_block_size"),
            Some(&Value::Int(16))
        );
        assert_eq!(
            parsed.fields.get("vllm_cache_config_info_gpu_memory_utilization"),
            Some(&Value::Float(0.9))
        );
        assert_eq!(
            parsed.fields.get("vllm_cache_config_info_cache_dtype"),
            Some(&Value::from("auto"))
        );
    }

    #[test]
    fn test_quoted_commas_and_comments() {
        let text = "# HELP x help\n# TYPE x gauge\n\nx{path=\"/a,b\",code=\"200\"} 1 1700000000000\nbroken line here\n";
        let parsed = parse_exposition(text);
        assert_eq!(parsed.fields.len(), 1);
        assert_eq!(
            parsed.fields.get("x_code_200_path_/a,b"),
            Some(&Value::Float(1.0))
        );
    }
}
