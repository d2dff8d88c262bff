//! Parquet output via Arrow record batches.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::ExportError;
use super::table::{ColumnKind, Table};

fn build_batch(table: &Table) -> Result<RecordBatch, ExportError> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());

    for (c, name) in table.columns().iter().enumerate() {
        let (data_type, array): (DataType, ArrayRef) = match table.column_kind(c) {
            ColumnKind::Int => (
                DataType::Int64,
                Arc::new(Int64Array::from(
                    table
                        .column(c)
                        .map(|v| v.and_then(|v| v.as_i64()))
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Float => (
                DataType::Float64,
                Arc::new(Float64Array::from(
                    table
                        .column(c)
                        .map(|v| v.and_then(|v| v.as_f64()))
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Text => (
                DataType::Utf8,
                Arc::new(StringArray::from(
                    table
                        .column(c)
                        .map(|v| v.map(|v| v.to_string()))
                        .collect::<Vec<_>>(),
                )),
            ),
        };
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Writes `table` as a single-row-group Parquet file.
pub fn write_parquet(table: &Table, path: &Path) -> Result<(), ExportError> {
    let batch = build_batch(table)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}
