//! Staging copier: mirrors the raw DICOM source tree into the `sourcedata`
//! staging area under the output root before any conversion runs.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::path::Path;

/// Copies every top-level entry of `source` into the staging directory.
///
/// Directories are merged recursively into any existing destination directory
/// of the same name, overwriting conflicting files inside; plain files are
/// copied over existing ones. Running this twice leaves the destination
/// byte-identical to a single run.
pub fn stage_source_tree(source: &Path, staging: &Path) -> Result<()> {
    if !source.is_dir() {
        bail!("Source must be a directory containing DICOMs");
    }
    fs::create_dir_all(staging)
        .with_context(|| format!("Failed to create staging area '{}'", staging.display()))?;

    let entries = fs::read_dir(source)
        .with_context(|| format!("Failed to list source '{}'", source.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let dest = staging.join(entry.file_name());
        if path.is_dir() {
            copy_dir_merge(&path, &dest)?;
        } else {
            copy_with_metadata(&path, &dest)?;
        }
    }
    Ok(())
}

fn copy_dir_merge(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create '{}'", dest.display()))?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir_merge(&path, &target)?;
        } else {
            copy_with_metadata(&path, &target)?;
        }
    }
    Ok(())
}

/// Copies a file and carries the source's modification time onto the copy.
///
/// `fs::copy` preserves permissions; the timestamp has to follow separately.
fn copy_with_metadata(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest).with_context(|| {
        format!("Failed to copy '{}' → '{}'", source.display(), dest.display())
    })?;
    let modified = fs::metadata(source)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("Failed to read metadata of '{}'", source.display()))?;
    File::options()
        .write(true)
        .open(dest)
        .and_then(|file| file.set_modified(modified))
        .with_context(|| format!("Failed to set timestamps on '{}'", dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn tree_snapshot(root: &Path) -> Vec<(PathBuf, Option<String>)> {
        let mut snapshot = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let content = if entry.file_type().is_file() {
                Some(fs::read_to_string(entry.path()).unwrap())
            } else {
                None
            };
            snapshot.push((relative, content));
        }
        snapshot
    }

    #[test]
    fn mirrors_directories_and_files() {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let staging = output.path().join("sourcedata");
        write(&source.path().join("patient_a/series/scan.dcm"), "a");
        write(&source.path().join("manifest.txt"), "m");

        stage_source_tree(source.path(), &staging).unwrap();

        assert!(staging.join("patient_a/series/scan.dcm").is_file());
        assert_eq!(fs::read_to_string(staging.join("manifest.txt")).unwrap(), "m");
    }

    #[test]
    fn merges_into_existing_destination_and_overwrites_conflicts() {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let staging = output.path().join("sourcedata");
        write(&source.path().join("patient_a/scan.dcm"), "new");
        write(&staging.join("patient_a/scan.dcm"), "old");
        write(&staging.join("patient_a/extra.dcm"), "keep");

        stage_source_tree(source.path(), &staging).unwrap();

        assert_eq!(
            fs::read_to_string(staging.join("patient_a/scan.dcm")).unwrap(),
            "new"
        );
        assert_eq!(
            fs::read_to_string(staging.join("patient_a/extra.dcm")).unwrap(),
            "keep"
        );
    }

    #[test]
    fn staging_twice_is_idempotent() {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let staging = output.path().join("sourcedata");
        write(&source.path().join("patient_a/scan.dcm"), "a");
        write(&source.path().join("patient_b/DICOMDIR"), "d");

        stage_source_tree(source.path(), &staging).unwrap();
        let first = tree_snapshot(&staging);
        stage_source_tree(source.path(), &staging).unwrap();
        let second = tree_snapshot(&staging);

        assert_eq!(first, second);
    }

    #[test]
    fn copies_carry_the_source_modification_time() {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let staging = output.path().join("sourcedata");
        let scan = source.path().join("patient_a/scan.dcm");
        write(&scan, "a");
        let day_ago = SystemTime::now() - Duration::from_secs(86_400);
        File::options()
            .write(true)
            .open(&scan)
            .unwrap()
            .set_modified(day_ago)
            .unwrap();

        stage_source_tree(source.path(), &staging).unwrap();

        let src_mtime = fs::metadata(&scan).unwrap().modified().unwrap();
        let dst_mtime = fs::metadata(staging.join("patient_a/scan.dcm"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(src_mtime, dst_mtime);
    }

    #[test]
    fn rejects_file_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.dcm");
        fs::write(&file, "x").unwrap();

        let err = stage_source_tree(&file, &dir.path().join("staging")).unwrap_err();
        assert!(err.to_string().contains("must be a directory"));
    }
}
