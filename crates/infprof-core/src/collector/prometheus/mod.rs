//! Inference-server metrics scraped in Prometheus text format.

mod collector;
pub mod parser;

pub use collector::{DEFAULT_METRICS_URL, InferenceCollector, ScrapeError};
pub use parser::{ParsedMetrics, parse_exposition};
