//! Comma- and tab-separated table output.

use std::io;

use super::table::Table;

/// Writes `table` with a header row. Null cells are empty fields.
pub fn write_delimited<W: io::Write>(table: &Table, writer: W, delimiter: u8) -> csv::Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);

    wtr.write_record(table.columns())?;
    let width = table.columns().len();
    for r in 0..table.len() {
        let record = (0..width).map(|c| match table.cell(r, c) {
            Some(value) => value.to_string(),
            None => String::new(),
        });
        wtr.write_record(record)?;
    }
    wtr.flush()?;
    Ok(())
}
