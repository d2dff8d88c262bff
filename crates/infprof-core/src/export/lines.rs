//! JSON Lines output, one object per line.

use std::io::Write;

use serde_json::{Map, Value as Json};

use super::ExportError;
use super::flatten::to_json;
use super::table::Table;
use crate::model::Sample;

/// Nested projection of a sample: `timestamp` plus one key per section.
pub fn sample_to_json(sample: &Sample) -> Json {
    let mut object = Map::new();
    object.insert("timestamp".to_string(), Json::from(sample.timestamp));
    for (name, reading) in &sample.sections {
        object.insert(name.clone(), to_json(reading));
    }
    Json::Object(object)
}

/// Writes each sample's nested projection on its own line.
pub fn write_samples<W: Write>(samples: &[Sample], mut writer: W) -> Result<(), ExportError> {
    for sample in samples {
        serde_json::to_writer(&mut writer, &sample_to_json(sample))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes each table row as a flat object. Null cells are omitted.
pub fn write_rows<W: Write>(table: &Table, mut writer: W) -> Result<(), ExportError> {
    for r in 0..table.len() {
        let object: Map<String, Json> = table
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(c, name)| {
                let value = table.cell(r, c)?;
                Some((name.clone(), serde_json::to_value(value).ok()?))
            })
            .collect();
        serde_json::to_writer(&mut writer, &object)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Fields, FieldsExt, Reading, Value};

    fn sample(ts: i64) -> Sample {
        let mut cpu = Fields::new();
        cpu.put("vCpuTime", 1200, ts);
        let mut gpu = Fields::new();
        gpu.put_plain("index", 0);
        gpu.put_plain("name", "NVIDIA A100-SXM4-80GB");
        let mut s = Sample::new(ts);
        s.sections.insert("cpu".to_string(), Reading::Mapping(cpu));
        s.sections.insert(
            "nvidia".to_string(),
            Reading::Sequence(vec![Reading::Mapping(gpu)]),
        );
        s
    }

    #[test]
    fn test_samples_keep_nesting() {
        let mut out = Vec::new();
        write_samples(&[sample(10), sample(20)], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Json = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["timestamp"], 10);
        assert_eq!(first["cpu"]["vCpuTime"], 1200);
        assert_eq!(first["nvidia"][0]["name"], "NVIDIA A100-SXM4-80GB");
        let second: Json = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["timestamp"], 20);
    }

    #[test]
    fn test_rows_omit_null_cells() {
        let table = Table::from_rows(vec![
            vec![
                ("timestamp".to_string(), Value::Int(1)),
                ("vCpuTime".to_string(), Value::Int(100)),
            ],
            vec![
                ("timestamp".to_string(), Value::Int(2)),
                ("vCpuType".to_string(), Value::from("Xeon")),
            ],
        ]);
        let mut out = Vec::new();
        write_rows(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "{\"timestamp\":1,\"vCpuTime\":100}\n{\"timestamp\":2,\"vCpuType\":\"Xeon\"}\n"
        );
    }
}
