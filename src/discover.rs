//! Input discovery: DICOM-content detection, subject-candidate enumeration,
//! and Excel mapping-file location.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Manifest file marking a DICOM media storage directory.
const DICOMDIR_NAME: &str = "DICOMDIR";

/// Returns true when the directory holds DICOM data.
///
/// Either a `DICOMDIR` manifest sits directly inside it, or some file
/// anywhere in its subtree carries a `.dcm` extension (case-insensitive).
/// Unreadable subtrees are skipped rather than reported.
pub fn contains_dicoms(directory: &Path) -> bool {
    if directory.join(DICOMDIR_NAME).is_file() {
        return true;
    }

    WalkDir::new(directory)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .any(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("dcm"))
                    .unwrap_or(false)
        })
}

/// Enumerates subject candidates under the staging area.
///
/// Immediate subdirectories containing DICOM data each become one candidate,
/// kept in directory-listing order (storage order, deliberately unsorted).
/// When none qualify but the staging area itself holds DICOM files, the whole
/// area is treated as a single-subject dataset. Zero candidates is fatal.
pub fn subject_candidates(staging: &Path) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    let entries = fs::read_dir(staging)
        .with_context(|| format!("Failed to list staging area '{}'", staging.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() && contains_dicoms(&path) {
            candidates.push(path);
        }
    }

    if candidates.is_empty() && contains_dicoms(staging) {
        candidates.push(staging.to_path_buf());
    }

    if candidates.is_empty() {
        bail!("No DICOM files found under '{}'", staging.display());
    }

    Ok(candidates)
}

/// Locates the single Excel workbook (`.xlsx`/`.xls`) in a directory.
///
/// Zero matches is fatal naming the directory; more than one is fatal and the
/// message enumerates every matching file name.
pub fn find_excel_file(input_dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to list input directory '{}'", input_dir.display()))?;

    let mut matches = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());
        if matches!(extension.as_deref(), Some("xlsx") | Some("xls")) {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => bail!("No Excel file found in {}", input_dir.display()),
        1 => Ok(matches.remove(0)),
        _ => {
            let names = matches
                .iter()
                .filter_map(|path| path.file_name())
                .map(|name| format!("  - {}", name.to_string_lossy()))
                .collect::<Vec<_>>()
                .join("\n");
            bail!(
                "Multiple Excel files found in {}:\n{}",
                input_dir.display(),
                names
            )
        }
    }
}
