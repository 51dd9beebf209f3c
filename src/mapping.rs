//! Excel mapping loader: turns a (source folder, subject id) workbook into a
//! normalized transient CSV table that the conversion driver re-reads.

use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Header of the normalized mapping table.
const MAPPING_HEADER: [&str; 2] = ["patient_folder", "id"];

/// One row of the normalized patient mapping table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MappingRecord {
    pub patient_folder: PathBuf,
    pub id: String,
}

/// Location of the transient mapping table shared with the conversion driver.
pub fn mapping_csv_path() -> PathBuf {
    env::temp_dir().join("patient_mapping.csv")
}

/// Reads the workbook's first sheet into `(patient_folder, id)` rows.
pub fn read_workbook_rows(excel_file: &Path) -> Result<Vec<(String, String)>> {
    let mut workbook = open_workbook_auto(excel_file)
        .with_context(|| format!("Failed to open Excel file '{}'", excel_file.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("Excel file '{}' has no worksheets", excel_file.display()))?
        .with_context(|| format!("Failed to read Excel file '{}'", excel_file.display()))?;
    normalize_rows(&range)
}

/// Normalizes a worksheet into `(patient_folder, id)` rows.
///
/// The first row is treated as a header and skipped; only the first two
/// columns are kept. Fails when the sheet has fewer than two columns. Cell
/// values are not validated here; missing folders only surface as warnings
/// during conversion.
fn normalize_rows(range: &Range<Data>) -> Result<Vec<(String, String)>> {
    if range.width() < 2 {
        bail!("Excel must have >=2 columns (patient_folder, id)");
    }

    let rows = range
        .rows()
        .skip(1)
        .map(|row| (cell_text(&row[0]), cell_text(&row[1])))
        .collect();
    Ok(rows)
}

/// Renders a spreadsheet cell as the string the mapping table should carry.
///
/// Text passes through verbatim (the id column is only trimmed at conversion
/// time). Whole-number floats lose their trailing `.0` so numeric subject IDs
/// come out as plain integers.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

/// Writes the normalized two-column table to `csv_path`.
pub fn write_mapping_csv(rows: &[(String, String)], csv_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(csv_path)
        .with_context(|| format!("Failed to create '{}'", csv_path.display()))?;
    writer.write_record(MAPPING_HEADER)?;
    for (folder, id) in rows {
        writer.write_record([folder.as_str(), id.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Re-reads the transient mapping table written by [`write_mapping_csv`].
pub fn read_mapping_csv(csv_path: &Path) -> Result<Vec<MappingRecord>> {
    let file = File::open(csv_path)
        .with_context(|| format!("Failed to open mapping table '{}'", csv_path.display()))?;
    let mut reader = csv::Reader::from_reader(file);
    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: MappingRecord = result.context("Failed to parse mapping table row")?;
        records.push(record);
    }
    Ok(records)
}

/// Converts the located workbook into the transient normalized CSV and
/// returns the CSV path.
pub fn excel_to_temp_csv(excel_file: &Path) -> Result<PathBuf> {
    let rows = read_workbook_rows(excel_file)?;
    let csv_path = mapping_csv_path();
    write_mapping_csv(&rows, &csv_path)?;
    println!(
        "Converted {} → {}",
        excel_file
            .file_name()
            .unwrap_or_default()
            .to_string_lossy(),
        csv_path.display()
    );
    Ok(csv_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn mapping_csv_carries_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("patient_mapping.csv");
        let rows = vec![("/data/patientX".to_string(), "007".to_string())];

        write_mapping_csv(&rows, &csv_path).unwrap();

        let content = fs::read_to_string(&csv_path).unwrap();
        assert_eq!(content, "patient_folder,id\n/data/patientX,007\n");
    }

    #[test]
    fn mapping_table_survives_the_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("patient_mapping.csv");
        let rows = vec![
            ("/data/patientX".to_string(), "007".to_string()),
            ("/data/patientY".to_string(), "control01".to_string()),
        ];

        write_mapping_csv(&rows, &csv_path).unwrap();
        let records = read_mapping_csv(&csv_path).unwrap();

        assert_eq!(
            records,
            vec![
                MappingRecord {
                    patient_folder: PathBuf::from("/data/patientX"),
                    id: "007".to_string(),
                },
                MappingRecord {
                    patient_folder: PathBuf::from("/data/patientY"),
                    id: "control01".to_string(),
                },
            ]
        );
    }

    #[test]
    fn numeric_ids_render_without_decimal_point() {
        assert_eq!(cell_text(&Data::Float(7.0)), "7");
        assert_eq!(cell_text(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_text(&Data::Int(12)), "12");
    }

    #[test]
    fn string_cells_pass_through_verbatim_and_empty_cells_blank() {
        assert_eq!(cell_text(&Data::String(" 007 ".to_string())), " 007 ");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn worksheet_rows_skip_the_header_and_keep_two_columns() {
        let mut range = Range::<Data>::new((0, 0), (2, 2));
        range.set_value((0, 0), Data::String("patient_folder".into()));
        range.set_value((0, 1), Data::String("id".into()));
        range.set_value((1, 0), Data::String("/data/patientX".into()));
        range.set_value((1, 1), Data::String("007".into()));
        range.set_value((1, 2), Data::String("ignored".into()));
        range.set_value((2, 0), Data::String("/data/patientY".into()));
        range.set_value((2, 1), Data::Float(8.0));

        let rows = normalize_rows(&range).unwrap();

        assert_eq!(
            rows,
            vec![
                ("/data/patientX".to_string(), "007".to_string()),
                ("/data/patientY".to_string(), "8".to_string()),
            ]
        );
    }

    #[test]
    fn single_column_worksheet_is_rejected() {
        let mut range = Range::<Data>::new((0, 0), (1, 0));
        range.set_value((0, 0), Data::String("patient_folder".into()));
        range.set_value((1, 0), Data::String("/data/patientX".into()));

        let err = normalize_rows(&range).unwrap_err();
        assert!(err.to_string().contains(">=2 columns"));
    }
}
