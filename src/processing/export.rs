//! Output artifacts for a batch run.
//!
//! Three files are derived from the requested CSV path: the full CSV (with the
//! raw OCR text), a `_simple.csv` without it for quick reading, and a `.json`
//! array of the same records. Both CSVs start with a UTF-8 byte order mark so
//! spreadsheet tools pick the right encoding for accented values.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::models::{Field, VehicleRecord};
use crate::utils::RegistryError;

const UTF8_BOM: &str = "\u{feff}";
const RAW_TEXT_COLUMN: &str = "raw_text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub full_csv: PathBuf,
    pub simple_csv: PathBuf,
    pub json: PathBuf,
}

impl ExportPaths {
    pub fn for_output(output_csv: &Path) -> Self {
        let stem = output_csv
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("vehicle_data_extracted");
        Self {
            full_csv: output_csv.to_path_buf(),
            simple_csv: output_csv.with_file_name(format!("{}_simple.csv", stem)),
            json: output_csv.with_file_name(format!("{}.json", stem)),
        }
    }
}

/// Write all three artifacts. Returns `None` without touching the disk when
/// there is nothing to export.
pub fn write_exports(
    records: &[VehicleRecord],
    output_csv: &Path,
) -> Result<Option<ExportPaths>, RegistryError> {
    if records.is_empty() {
        return Ok(None);
    }

    let paths = ExportPaths::for_output(output_csv);
    write_csv(records, &paths.full_csv, true)?;
    info!("Results saved to CSV: {}", paths.full_csv.display());

    write_json(records, &paths.json)?;
    info!("JSON copy saved to: {}", paths.json.display());

    write_csv(records, &paths.simple_csv, false)?;
    info!("Simplified CSV (without raw_text) saved to: {}", paths.simple_csv.display());

    Ok(Some(paths))
}

fn write_csv(records: &[VehicleRecord], path: &Path, with_raw_text: bool) -> Result<(), RegistryError> {
    let file = File::create(path).map_err(|e| export_error(path, e))?;
    let mut out = BufWriter::new(file);

    let mut header: Vec<&str> = Field::ALL.iter().map(|f| f.key()).collect();
    if with_raw_text {
        header.push(RAW_TEXT_COLUMN);
    }
    write!(out, "{}", UTF8_BOM).map_err(|e| export_error(path, e))?;
    writeln!(out, "{}", header.join(",")).map_err(|e| export_error(path, e))?;

    for record in records {
        let mut cells: Vec<String> = Field::ALL.iter().map(|f| escape_cell(record.get(*f))).collect();
        if with_raw_text {
            cells.push(escape_cell(&record.raw_text));
        }
        writeln!(out, "{}", cells.join(",")).map_err(|e| export_error(path, e))?;
    }

    out.flush().map_err(|e| export_error(path, e))
}

fn write_json(records: &[VehicleRecord], path: &Path) -> Result<(), RegistryError> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| RegistryError::Export(format!("Failed to serialize records: {}", e)))?;
    std::fs::write(path, json).map_err(|e| export_error(path, e))
}

/// Quote a cell when it holds a delimiter, a quote or a line break.
fn escape_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn export_error(path: &Path, e: std::io::Error) -> RegistryError {
    RegistryError::Export(format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn records() -> Vec<VehicleRecord> {
        vec![
            VehicleRecord {
                placa: "ABC-123".to_string(),
                marca: "TOYOTA".to_string(),
                anio_modelo: "2015".to_string(),
                propietarios: "PÉREZ, JUAN".to_string(),
                raw_text: "PLACA: ABC-123\nMARCA: \"TOYOTA\"".to_string(),
                ..Default::default()
            },
            VehicleRecord {
                placa: "XYZ-789".to_string(),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_export_paths_naming() {
        let paths = ExportPaths::for_output(Path::new("out/vehicle_data_extracted.csv"));
        assert_eq!(paths.simple_csv, Path::new("out/vehicle_data_extracted_simple.csv"));
        assert_eq!(paths.json, Path::new("out/vehicle_data_extracted.json"));
    }

    #[test]
    fn test_write_exports_full_csv() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("vehicles.csv");
        let paths = write_exports(&records(), &output).unwrap().unwrap();

        let content = std::fs::read_to_string(&paths.full_csv).unwrap();
        assert!(content.starts_with('\u{feff}'));
        let content = content.trim_start_matches('\u{feff}');
        let header = content.lines().next().unwrap();
        assert_eq!(
            header,
            "placa,n_serie,n_vin,n_motor,color,marca,modelo,placa_vigente,placa_anterior,estado,anotaciones,sede,año_modelo,propietarios,raw_text"
        );
        assert!(content.contains("ABC-123,,,,,TOYOTA,,,,,,,2015,\"PÉREZ, JUAN\",\"PLACA: ABC-123\nMARCA: \"\"TOYOTA\"\"\""));
        assert!(content.ends_with("XYZ-789,,,,,,,,,,,,,,\n"));
    }

    #[test]
    fn test_write_exports_simple_csv_and_json() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("vehicles.csv");
        let paths = write_exports(&records(), &output).unwrap().unwrap();

        let simple = std::fs::read_to_string(&paths.simple_csv).unwrap();
        assert!(!simple.contains("raw_text"));
        assert!(!simple.contains("MARCA: "));
        assert_eq!(simple.lines().count(), 3);

        let json = std::fs::read_to_string(&paths.json).unwrap();
        assert!(json.contains("\"año_modelo\": \"2015\""));
        assert!(json.contains("PÉREZ"));
        let parsed: Vec<VehicleRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, records());
    }

    #[test]
    fn test_nothing_written_without_records() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("vehicles.csv");
        assert_eq!(write_exports(&[], &output).unwrap(), None);
        assert!(!output.exists());
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("missing_dir").join("vehicles.csv");
        assert!(matches!(write_exports(&records(), &output), Err(RegistryError::Export(_))));
    }
}
