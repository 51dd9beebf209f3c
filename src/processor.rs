//! Orchestration pipeline: scaffold initialization, the per-subject
//! conversion loop for both modes, cleanup, and run reporting.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::config::{STAGING_DIR_NAME, TMP_DIR_PREFIX};
use crate::discover::{find_excel_file, subject_candidates};
use crate::engine::{BidsEngine, ConversionJob};
use crate::mapping::{excel_to_temp_csv, read_mapping_csv, MappingRecord};
use crate::staging::stage_source_tree;

/// Status recorded for a subject whose conversion ran.
pub const STATUS_CONVERTED: &str = "Converted";
/// Status recorded for a subject skipped with a warning.
pub const STATUS_SKIPPED: &str = "Skipped";

/// Outcome of one subject in the run report.
#[derive(Debug, Serialize, Default)]
pub struct SubjectResult {
    pub subject_id: String,
    pub source_folder: PathBuf,
    pub status: String,
    pub reason: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Ensures the dataset root exists and scaffolds it when empty.
///
/// A non-empty root is left untouched so re-runs accumulate into an existing
/// dataset instead of destroying prior output. The scaffold command runs at
/// most once, and its failure is fatal.
pub fn init_scaffold(engine: &impl BidsEngine, bids_output: &Path) -> Result<()> {
    fs::create_dir_all(bids_output).with_context(|| {
        format!("Failed to create output directory '{}'", bids_output.display())
    })?;

    let is_empty = bids_output
        .read_dir()
        .with_context(|| format!("Failed to list '{}'", bids_output.display()))?
        .next()
        .is_none();

    if is_empty {
        println!(
            "BIDS output '{}' is empty → running scaffold",
            bids_output.display()
        );
        engine.scaffold(bids_output)?;
    } else {
        println!(
            "BIDS output '{}' is not empty → skipping scaffold",
            bids_output.display()
        );
    }
    Ok(())
}

/// Raw-folder pipeline: stage, discover subjects, convert each in sequence.
///
/// Subject IDs are two-digit sequence numbers assigned in directory-listing
/// order. Any engine failure aborts the whole run.
pub fn run_raw(
    engine: &impl BidsEngine,
    source_dicom: &Path,
    bids_output: &Path,
) -> Result<Vec<SubjectResult>> {
    if !source_dicom.exists() {
        bail!("Source path '{}' not found", source_dicom.display());
    }

    init_scaffold(engine, bids_output)?;

    let staging = bids_output.join(STAGING_DIR_NAME);
    println!(
        "Copying DICOM data from '{}' → '{}'",
        source_dicom.display(),
        staging.display()
    );
    stage_source_tree(source_dicom, &staging)?;

    let candidates = subject_candidates(&staging)?;
    let pb = subject_progress_bar(candidates.len() as u64);

    let mut results = Vec::new();
    for (idx, patient_dir) in candidates.iter().enumerate() {
        let subject_id = format!("{:02}", idx + 1);
        convert_subject(engine, patient_dir, &subject_id, bids_output)?;
        results.push(SubjectResult {
            subject_id,
            source_folder: patient_dir.clone(),
            status: STATUS_CONVERTED.into(),
            reason: Vec::new(),
            timestamp: Utc::now(),
        });
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(results)
}

/// Excel pipeline: locate the workbook, normalize it, convert each mapped row.
pub fn run_excel(
    engine: &impl BidsEngine,
    input_dir: &Path,
    bids_output: &Path,
) -> Result<Vec<SubjectResult>> {
    if !input_dir.exists() {
        bail!("Input directory not found: {}", input_dir.display());
    }

    let excel_file = find_excel_file(input_dir)?;
    println!(
        "Using Excel file: {}",
        excel_file.file_name().unwrap_or_default().to_string_lossy()
    );
    let temp_csv = excel_to_temp_csv(&excel_file)?;

    init_scaffold(engine, bids_output)?;

    let records = read_mapping_csv(&temp_csv)?;
    let results = process_mapping_records(engine, &records, bids_output)?;

    if let Err(e) = fs::remove_file(&temp_csv) {
        eprintln!("{} Could not delete temp file: {}", "WARNING:".yellow(), e);
    }
    Ok(results)
}

/// Converts every mapping row in order, one engine invocation at a time.
///
/// A row whose folder is missing, or whose trimmed id is empty, is skipped
/// with a warning; an engine failure still aborts the run.
pub fn process_mapping_records(
    engine: &impl BidsEngine,
    records: &[MappingRecord],
    bids_output: &Path,
) -> Result<Vec<SubjectResult>> {
    let pb = subject_progress_bar(records.len() as u64);

    let mut results = Vec::new();
    for record in records {
        let subject_id = record.id.trim().to_string();
        let mut res = SubjectResult {
            subject_id: subject_id.clone(),
            source_folder: record.patient_folder.clone(),
            timestamp: Utc::now(),
            ..Default::default()
        };

        if subject_id.is_empty() {
            let msg = format!(
                "Skipping row with empty subject id for '{}'",
                record.patient_folder.display()
            );
            eprintln!("{} {}", "WARNING:".yellow(), msg);
            res.status = STATUS_SKIPPED.into();
            res.reason.push(msg);
        } else if !record.patient_folder.exists() {
            let msg = format!(
                "Skipping missing folder '{}'",
                record.patient_folder.display()
            );
            eprintln!("{} {}", "WARNING:".yellow(), msg);
            res.status = STATUS_SKIPPED.into();
            res.reason.push(msg);
        } else {
            convert_subject(engine, &record.patient_folder, &subject_id, bids_output)?;
            res.status = STATUS_CONVERTED.into();
        }

        results.push(res);
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(results)
}

/// Single conversion-invocation routine shared by both discovery strategies.
fn convert_subject(
    engine: &impl BidsEngine,
    patient_dir: &Path,
    subject_id: &str,
    bids_output: &Path,
) -> Result<()> {
    let folder_name = patient_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| patient_dir.display().to_string());
    println!("Processing: {} → sub-{}", folder_name, subject_id);

    let job = ConversionJob {
        dicom_dir: patient_dir.to_path_buf(),
        participant: subject_id.to_string(),
        output_dir: bids_output.to_path_buf(),
    };
    engine.convert(&job)
}

/// Best-effort removal of the engine's leftover working directories.
///
/// Only immediate children of the output root whose names start with the
/// transient prefix are touched. Failures to scan the root or to remove a
/// directory are logged and never fail the run.
pub fn cleanup_tmp_dirs(output_dir: &Path) {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!(
                "{} Could not scan '{}': {}",
                "WARNING:".yellow(),
                output_dir.display(),
                e
            );
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_tmp = entry.file_name().to_string_lossy().starts_with(TMP_DIR_PREFIX);
        if path.is_dir() && is_tmp {
            println!("Deleting temporary folder: {}", path.display());
            if let Err(e) = fs::remove_dir_all(&path) {
                eprintln!(
                    "{} Could not delete '{}': {}",
                    "WARNING:".yellow(),
                    path.display(),
                    e
                );
            }
        }
    }
}

fn subject_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} subjects")
            .unwrap(),
    );
    pb
}

/// Counts converted and skipped subjects for the end-of-run summary.
pub fn summarize(results: &[SubjectResult]) -> (usize, usize) {
    let converted = results.iter().filter(|r| r.status == STATUS_CONVERTED).count();
    (converted, results.len() - converted)
}

/// Writes the CSV and JSON run reports.
pub fn write_reports(
    csv_path: &Path,
    json_path: &Path,
    results: &[SubjectResult],
) -> Result<()> {
    write_csv_report(csv_path, results)?;
    write_json_report(json_path, results)?;
    Ok(())
}

fn write_json_report(path: &Path, results: &[SubjectResult]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create '{}'", path.display()))?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}

fn write_csv_report(path: &Path, results: &[SubjectResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create '{}'", path.display()))?;
    wtr.write_record(["SubjectId", "SourceFolder", "Status", "Reason", "Timestamp"])?;
    for r in results {
        wtr.write_record([
            r.subject_id.as_str(),
            &r.source_folder.display().to_string(),
            r.status.as_str(),
            &r.reason.join("; "),
            &r.timestamp.to_rfc3339(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
