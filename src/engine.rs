//! Seam over the external dcm2bids tooling.
//!
//! The pipeline only ever talks to the scaffolding command and the per-subject
//! conversion engine through [`BidsEngine`], so tests can drive the
//! orchestration with a recording fake instead of shelling out.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::EffectiveConfig;

/// One per-subject unit of work handed to the conversion engine.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// The subject's staged (or mapped) DICOM folder, sole input of the run.
    pub dicom_dir: PathBuf,
    /// Subject ID without the `sub-` prefix.
    pub participant: String,
    /// Shared BIDS dataset root that accumulates every subject's output.
    pub output_dir: PathBuf,
}

/// External BIDS tooling consumed by the pipeline.
pub trait BidsEngine {
    /// Populates the base BIDS layout in an empty dataset root.
    fn scaffold(&self, output_dir: &Path) -> Result<()>;

    /// Converts one subject's DICOM folder into the shared dataset root.
    fn convert(&self, job: &ConversionJob) -> Result<()>;
}

/// Production engine that shells out to `dcm2bids_scaffold` and `dcm2bids`.
pub struct Dcm2Bids {
    scaffold_command: String,
    converter_command: String,
    engine_config: PathBuf,
    log_level: String,
}

impl Dcm2Bids {
    pub fn new(config: &EffectiveConfig) -> Self {
        Self {
            scaffold_command: config.scaffold_command.clone(),
            converter_command: config.converter_command.clone(),
            engine_config: config.engine_config.clone(),
            log_level: config.engine_log_level.clone(),
        }
    }
}

impl BidsEngine for Dcm2Bids {
    fn scaffold(&self, output_dir: &Path) -> Result<()> {
        let status = Command::new(&self.scaffold_command)
            .arg("-o")
            .arg(output_dir)
            .status()
            .with_context(|| format!("Failed to launch '{}'", self.scaffold_command))?;
        if !status.success() {
            bail!("'{}' exited with {}", self.scaffold_command, status);
        }
        Ok(())
    }

    fn convert(&self, job: &ConversionJob) -> Result<()> {
        // No session label; clobber and forced re-runs on, BIDS validation off.
        let status = Command::new(&self.converter_command)
            .arg("-d")
            .arg(&job.dicom_dir)
            .arg("-p")
            .arg(&job.participant)
            .arg("-c")
            .arg(&self.engine_config)
            .arg("-o")
            .arg(&job.output_dir)
            .arg("--clobber")
            .arg("--force_dcm2bids")
            .arg("--log_level")
            .arg(&self.log_level)
            .status()
            .with_context(|| format!("Failed to launch '{}'", self.converter_command))?;
        if !status.success() {
            bail!(
                "'{}' exited with {} for sub-{}",
                self.converter_command,
                status,
                job.participant
            );
        }
        Ok(())
    }
}
