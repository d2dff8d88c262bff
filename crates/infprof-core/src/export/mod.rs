//! Tabular export of a session.
//!
//! Samples are flattened into rows ([`flatten`]), merged into a column-union
//! [`Table`] and written as CSV, TSV or (with the `parquet` feature) Parquet.
//! JSON Lines keeps each sample nested instead ([`lines`]).

#[cfg(feature = "parquet")]
mod columnar;
mod delimited;
pub mod flatten;
pub mod lines;
mod table;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};

use crate::model::Sample;

pub use delimited::write_delimited;
pub use flatten::{FlattenMode, Row, flatten_sample};
pub use table::{ColumnKind, Table};

/// Output format of the session table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Tsv,
    Jsonl,
    Parquet,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Parquet => "parquet",
        }
    }

    /// Whether this build can write the format natively.
    pub fn is_supported(&self) -> bool {
        match self {
            ExportFormat::Parquet => cfg!(feature = "parquet"),
            _ => true,
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "tsv" => Ok(ExportFormat::Tsv),
            "jsonl" => Ok(ExportFormat::Jsonl),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(format!(
                "unknown export format '{}' (expected csv, tsv, jsonl or parquet)",
                other
            )),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Error writing a table.
#[derive(Debug)]
pub enum ExportError {
    Io(io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    #[cfg(feature = "parquet")]
    Arrow(arrow::error::ArrowError),
    #[cfg(feature = "parquet")]
    Parquet(parquet::errors::ParquetError),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "IO error: {}", e),
            ExportError::Csv(e) => write!(f, "CSV error: {}", e),
            ExportError::Json(e) => write!(f, "JSON error: {}", e),
            #[cfg(feature = "parquet")]
            ExportError::Arrow(e) => write!(f, "Arrow error: {}", e),
            #[cfg(feature = "parquet")]
            ExportError::Parquet(e) => write!(f, "Parquet error: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<io::Error> for ExportError {
    fn from(e: io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<csv::Error> for ExportError {
    fn from(e: csv::Error) -> Self {
        ExportError::Csv(e)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Json(e)
    }
}

#[cfg(feature = "parquet")]
impl From<arrow::error::ArrowError> for ExportError {
    fn from(e: arrow::error::ArrowError) -> Self {
        ExportError::Arrow(e)
    }
}

#[cfg(feature = "parquet")]
impl From<parquet::errors::ParquetError> for ExportError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        ExportError::Parquet(e)
    }
}

/// Writes `table` to `{dir}/{stem}.{ext}` and returns the path written.
///
/// A Parquet request in a build without the `parquet` feature writes CSV
/// instead. JSON Lines output holds one flat object per row.
pub fn export_table(
    table: &Table,
    dir: &Path,
    stem: &str,
    format: ExportFormat,
) -> Result<PathBuf, ExportError> {
    let format = if format.is_supported() {
        format
    } else {
        warn!(
            "{} export not available in this build, writing csv instead",
            format
        );
        ExportFormat::Csv
    };

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{}", stem, format.extension()));

    match format {
        ExportFormat::Csv | ExportFormat::Tsv => {
            let delimiter = if format == ExportFormat::Tsv { b'\t' } else { b',' };
            let file = std::fs::File::create(&path)?;
            write_delimited(table, io::BufWriter::new(file), delimiter)?;
        }
        ExportFormat::Jsonl => {
            let file = std::fs::File::create(&path)?;
            lines::write_rows(table, io::BufWriter::new(file))?;
        }
        ExportFormat::Parquet => {
            #[cfg(feature = "parquet")]
            columnar::write_parquet(table, &path)?;
        }
    }

    info!(
        "Exported {} rows x {} columns to {}",
        table.len(),
        table.columns().len(),
        path.display()
    );
    Ok(path)
}

/// Writes `{dir}/{stem}.jsonl` with one nested object per sample.
pub fn export_samples_jsonl(
    samples: &[Sample],
    dir: &Path,
    stem: &str,
) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{}", stem, ExportFormat::Jsonl.extension()));
    let file = std::fs::File::create(&path)?;
    lines::write_samples(samples, io::BufWriter::new(file))?;
    info!("Exported {} records to {}", samples.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use tempfile::TempDir;

    fn table() -> Table {
        Table::from_rows(vec![vec![
            ("timestamp".to_string(), Value::Int(1)),
            ("vLoadAvg".to_string(), Value::Float(0.15)),
        ]])
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert_eq!("tsv".parse::<ExportFormat>(), Ok(ExportFormat::Tsv));
        assert_eq!("JSONL".parse::<ExportFormat>(), Ok(ExportFormat::Jsonl));
        assert_eq!("parquet".parse::<ExportFormat>(), Ok(ExportFormat::Parquet));
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_export_tsv_file() {
        let dir = TempDir::new().unwrap();
        let path = export_table(&table(), dir.path(), "s1", ExportFormat::Tsv).unwrap();
        assert_eq!(path, dir.path().join("s1.tsv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "timestamp\tvLoadAvg\n1\t0.15\n");
    }

    #[test]
    fn test_export_jsonl_rows_and_samples() {
        let dir = TempDir::new().unwrap();
        let path = export_table(&table(), dir.path(), "s1", ExportFormat::Jsonl).unwrap();
        assert_eq!(path, dir.path().join("s1.jsonl"));
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "{\"timestamp\":1,\"vLoadAvg\":0.15}\n");

        let samples = vec![Sample::new(7), Sample::new(8)];
        let path = export_samples_jsonl(&samples, dir.path(), "s2").unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "{\"timestamp\":7}\n{\"timestamp\":8}\n");
    }

    #[cfg(not(feature = "parquet"))]
    #[test]
    fn test_parquet_falls_back_to_csv() {
        let dir = TempDir::new().unwrap();
        let path = export_table(&table(), dir.path(), "s1", ExportFormat::Parquet).unwrap();
        assert_eq!(path, dir.path().join("s1.csv"));
        assert!(path.exists());
    }
}
