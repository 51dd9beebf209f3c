//! CLI that converts clinical DICOM folders into a BIDS dataset by driving
//! the external dcm2bids tooling.
//!
//! It either batch-converts a folder of raw DICOM subjects with auto-numbered
//! IDs, or follows an Excel workbook mapping source folders to explicit
//! subject IDs, and writes success/skip reports in CSV/JSON formats.
mod config;
mod discover;
mod engine;
mod mapping;
mod processor;
mod staging;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

use crate::config::{
    load_runtime_config, sanitize_optional_string, EffectiveConfig, ResourceResolver,
    RuntimeConfigFile, DEFAULT_CONFIG_PATH,
};
use crate::engine::Dcm2Bids;
use crate::processor::{cleanup_tmp_dirs, run_excel, run_raw, summarize, write_reports, SubjectResult};

#[derive(Parser)]
#[command(name = "dicom2bids_cli")]
#[command(about = "DICOM to BIDS Converter", long_about = None)]
/// Entry CLI that dispatches to the two conversion modes.
struct Cli {
    /// Optional runtime config in TOML that supplies defaults for the CLI.
    #[arg(short, long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert raw DICOM subject folders with auto-numbered IDs
    Raw(ModeArgs),
    /// Convert folders listed in an Excel mapping workbook
    Excel(ModeArgs),
}

#[derive(Args, Clone)]
struct ModeArgs {
    /// DICOM source folder (raw mode) or directory holding the Excel mapping.
    source: PathBuf,

    /// Output directory for the BIDS dataset.
    output: PathBuf,

    /// Scaffold command override (defaults to dcm2bids_scaffold).
    #[arg(long)]
    scaffold_command: Option<String>,

    /// Conversion engine command override (defaults to dcm2bids).
    #[arg(long)]
    converter_command: Option<String>,

    /// Engine configuration file override (defaults to the bundled dcm2bids.json).
    #[arg(long)]
    engine_config: Option<PathBuf>,

    /// Optional destination for the CSV run report.
    #[arg(long)]
    report_csv: Option<PathBuf>,

    /// Optional destination for the JSON run report.
    #[arg(long)]
    report_json: Option<PathBuf>,
}

/// Entrypoint that wires CLI args, runtime config, and the conversion engine.
///
/// Any error propagating out of a subcommand is printed by `anyhow` and
/// terminates the process with exit code 1.
fn main() -> Result<()> {
    let args = Cli::parse();
    let cfg_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match args.command {
        Commands::Raw(cmd) => run_raw_command(cmd, &cfg_path),
        Commands::Excel(cmd) => run_excel_command(cmd, &cfg_path),
    }
}

/// Merge CLI overrides with a parsed runtime config, falling back to crate defaults.
///
/// CLI flags take precedence, followed by the runtime file, and finally
/// `EffectiveConfig::defaults()` built over the resource resolver.
fn merge_config(cli: &ModeArgs, file: Option<RuntimeConfigFile>) -> EffectiveConfig {
    let resolver = ResourceResolver::from_environment();
    let mut cfg = EffectiveConfig::defaults(&resolver);
    let f = file.unwrap_or_default();

    cfg.scaffold_command = sanitize_optional_string(cli.scaffold_command.clone())
        .or(sanitize_optional_string(f.scaffold_command))
        .unwrap_or(cfg.scaffold_command);
    cfg.converter_command = sanitize_optional_string(cli.converter_command.clone())
        .or(sanitize_optional_string(f.converter_command))
        .unwrap_or(cfg.converter_command);
    cfg.engine_config = cli
        .engine_config
        .clone()
        .or(f.engine_config)
        .unwrap_or(cfg.engine_config);
    cfg.engine_log_level = f.engine_log_level.unwrap_or(cfg.engine_log_level);
    cfg.report_csv = cli.report_csv.clone().or(f.report_csv).unwrap_or(cfg.report_csv);
    cfg.report_json = cli.report_json.clone().or(f.report_json).unwrap_or(cfg.report_json);

    cfg
}

fn run_raw_command(args: ModeArgs, cfg_path: &PathBuf) -> Result<()> {
    let runtime_file = load_runtime_config(Some(cfg_path))?;
    let effective = merge_config(&args, runtime_file);

    if !args.source.is_dir() {
        bail!(
            "This mode requires a DICOM folder, but '{}' is not a directory",
            args.source.display()
        );
    }

    println!("Running...");
    let engine = Dcm2Bids::new(&effective);
    let results = run_raw(&engine, &args.source, &args.output)?;
    cleanup_tmp_dirs(&args.output);
    finish_run(&effective, &results)
}

fn run_excel_command(args: ModeArgs, cfg_path: &PathBuf) -> Result<()> {
    let runtime_file = load_runtime_config(Some(cfg_path))?;
    let effective = merge_config(&args, runtime_file);

    if !args.source.is_dir() {
        bail!(
            "This mode requires a directory holding the Excel mapping, but '{}' is not a directory",
            args.source.display()
        );
    }

    println!("Running...");
    let engine = Dcm2Bids::new(&effective);
    let results = run_excel(&engine, &args.source, &args.output)?;
    cleanup_tmp_dirs(&args.output);
    finish_run(&effective, &results)
}

fn finish_run(effective: &EffectiveConfig, results: &[SubjectResult]) -> Result<()> {
    write_reports(&effective.report_csv, &effective.report_json, results)?;

    let (converted, skipped) = summarize(results);
    println!("Summary: {} converted, {} skipped.", converted, skipped);
    println!("{}", "Script finished successfully.".green());
    Ok(())
}
