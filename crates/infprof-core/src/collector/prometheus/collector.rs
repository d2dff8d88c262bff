//! HTTP scraper for an inference server's `/metrics` endpoint.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::debug;

use super::parser::parse_exposition;
use crate::collector::probe::now_ns;
use crate::collector::traits::MetricCollector;
use crate::model::{Fields, FieldsExt, Reading};

/// Default endpoint of a locally running server.
pub const DEFAULT_METRICS_URL: &str = "http://localhost:8000/metrics";

/// Why a scrape produced no document.
#[derive(Debug)]
pub enum ScrapeError {
    /// No HTTP client could be built.
    Client(String),
    /// Connection refused, reset or timed out.
    Request(reqwest::Error),
    Status(StatusCode),
    Body(reqwest::Error),
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeError::Client(msg) => write!(f, "http client unavailable: {}", msg),
            ScrapeError::Request(e) => write!(f, "request failed: {}", e),
            ScrapeError::Status(s) => write!(f, "unexpected status {}", s),
            ScrapeError::Body(e) => write!(f, "failed to read body: {}", e),
        }
    }
}

impl std::error::Error for ScrapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScrapeError::Request(e) | ScrapeError::Body(e) => Some(e),
            _ => None,
        }
    }
}

/// Scrapes Prometheus text from an inference server once per tick.
///
/// An unreachable endpoint is the normal state while the server starts up,
/// so every failure is "no data this tick".
pub struct InferenceCollector {
    url: String,
    client: Result<Client, String>,
}

impl InferenceCollector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| e.to_string());
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches the raw exposition document.
    pub fn scrape(&self) -> Result<String, ScrapeError> {
        let client = self
            .client
            .as_ref()
            .map_err(|e| ScrapeError::Client(e.clone()))?;
        let response = client.get(&self.url).send().map_err(ScrapeError::Request)?;
        if response.status() != StatusCode::OK {
            return Err(ScrapeError::Status(response.status()));
        }
        response.text().map_err(ScrapeError::Body)
    }
}

impl MetricCollector for InferenceCollector {
    fn name(&self) -> &'static str {
        "vllm"
    }

    fn collect(&mut self) -> Reading {
        let ts = now_ns();
        let body = match self.scrape() {
            Ok(body) => body,
            Err(e) => {
                debug!("vllm: {} ({})", e, self.url);
                return Reading::empty();
            }
        };

        let parsed = parse_exposition(&body);
        if parsed.is_empty() {
            return Reading::empty();
        }

        let mut fields = Fields::new();
        for (name, value) in parsed.fields {
            fields.put(&name, value, ts);
        }
        for (name, histogram) in parsed.histograms {
            fields.insert(format!("{}_histogram", name), Reading::Histogram(histogram));
        }
        fields.put_plain("vllmTimestamp", ts);
        Reading::Mapping(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves exactly one HTTP response and returns the endpoint URL.
    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let mut request = Vec::new();
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{}/metrics", addr)
    }

    const BODY: &str = "\
# HELP vllm:num_requests_running Number of requests currently running.
# TYPE vllm:num_requests_running gauge
vllm:num_requests_running{engine=\"0\",model_name=\"llama\"} 3.0
vllm:time_to_first_token_seconds_bucket{le=\"0.1\",model_name=\"llama\"} 7.0
vllm:time_to_first_token_seconds_bucket{le=\"+Inf\",model_name=\"llama\"} 9.0
";

    #[test]
    fn test_collect_from_endpoint() {
        let url = serve_once("200 OK", BODY);
        let mut c = InferenceCollector::new(url, Duration::from_secs(2));
        let reading = c.collect();
        let f = reading.as_mapping().unwrap();

        assert_eq!(f.value_of("vllm_requests_running"), Some(&Value::Float(3.0)));
        let Some(Reading::Histogram(h)) = f.get("vllm_latency_ttft_s_histogram") else {
            panic!("histogram missing");
        };
        assert_eq!(h.keys().collect::<Vec<_>>(), vec!["0.1", "inf"]);
        assert!(f.value_of("vllmTimestamp").is_some());
    }

    #[test]
    fn test_non_ok_status_is_empty() {
        let url = serve_once("503 Service Unavailable", "starting");
        let mut c = InferenceCollector::new(url, Duration::from_secs(2));
        assert!(matches!(c.scrape(), Err(ScrapeError::Status(s)) if s.as_u16() == 503));
    }

    #[test]
    fn test_refused_connection_is_empty() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut c = InferenceCollector::new(
            format!("http://127.0.0.1:{}/metrics", port),
            Duration::from_millis(200),
        );
        assert!(c.collect().is_empty());
    }
}
