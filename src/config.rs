use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default runtime configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/dicom2bids_cli.toml";
/// Default command that populates the base BIDS layout in an empty dataset root.
pub const DEFAULT_SCAFFOLD_COMMAND: &str = "dcm2bids_scaffold";
/// Default per-subject conversion engine command.
pub const DEFAULT_CONVERTER_COMMAND: &str = "dcm2bids";
/// Bundled engine configuration artifact shipped next to the executable.
pub const DEFAULT_ENGINE_CONFIG: &str = "dcm2bids.json";
/// Log level passed through to the conversion engine.
pub const DEFAULT_ENGINE_LOG_LEVEL: &str = "INFO";
/// Default CSV path for the run report.
pub const DEFAULT_REPORT_CSV: &str = "report.csv";
/// Default JSON path for the run report.
pub const DEFAULT_REPORT_JSON: &str = "report.json";
/// Staging subdirectory created under the output root in raw mode.
pub const STAGING_DIR_NAME: &str = "sourcedata";
/// Output-root directories starting with this prefix are removed after a run.
pub const TMP_DIR_PREFIX: &str = "tmp";

/// Locates bundled read-only assets relative to the install location.
///
/// Resolution prefers the directory containing the running executable and
/// falls back to the current working directory during development.
pub struct ResourceResolver {
    base_dirs: Vec<PathBuf>,
}

impl ResourceResolver {
    /// Builds the resolver from the running process environment.
    pub fn from_environment() -> Self {
        let mut base_dirs = Vec::new();
        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                base_dirs.push(dir.to_path_buf());
            }
        }
        if let Ok(cwd) = env::current_dir() {
            base_dirs.push(cwd);
        }
        Self::with_base_dirs(base_dirs)
    }

    /// Builds a resolver over explicit base directories.
    pub fn with_base_dirs(base_dirs: Vec<PathBuf>) -> Self {
        Self { base_dirs }
    }

    /// Returns the first base directory that contains `relative`, or the last
    /// candidate joined with it when the asset does not exist yet.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        for base in &self.base_dirs {
            let candidate = base.join(relative);
            if candidate.exists() {
                return candidate;
            }
        }
        match self.base_dirs.last() {
            Some(base) => base.join(relative),
            None => relative.to_path_buf(),
        }
    }
}

#[derive(Deserialize, Default)]
/// Runtime overrides loaded from the TOML config referenced by `main`.
pub struct RuntimeConfigFile {
    pub scaffold_command: Option<String>,
    pub converter_command: Option<String>,
    pub engine_config: Option<PathBuf>,
    pub engine_log_level: Option<String>,
    pub report_csv: Option<PathBuf>,
    pub report_json: Option<PathBuf>,
}

/// Final configuration used throughout the conversion workflow.
pub struct EffectiveConfig {
    pub scaffold_command: String,
    pub converter_command: String,
    pub engine_config: PathBuf,
    pub engine_log_level: String,
    pub report_csv: PathBuf,
    pub report_json: PathBuf,
}

impl EffectiveConfig {
    /// Returns the crate-level defaults before CLI/runtime overrides are merged.
    ///
    /// The bundled engine config is resolved through the injected resolver so
    /// packaged installs and development checkouts both find it.
    pub fn defaults(resolver: &ResourceResolver) -> Self {
        Self {
            scaffold_command: DEFAULT_SCAFFOLD_COMMAND.to_string(),
            converter_command: DEFAULT_CONVERTER_COMMAND.to_string(),
            engine_config: resolver.resolve(DEFAULT_ENGINE_CONFIG),
            engine_log_level: DEFAULT_ENGINE_LOG_LEVEL.to_string(),
            report_csv: PathBuf::from(DEFAULT_REPORT_CSV),
            report_json: PathBuf::from(DEFAULT_REPORT_JSON),
        }
    }
}

/// Attempts to read the runtime config file and deserialize CLI overrides.
///
/// Returns `Ok(None)` when the file is missing so defaults are preserved.
pub fn load_runtime_config(path: Option<&PathBuf>) -> Result<Option<RuntimeConfigFile>> {
    let path = match path {
        Some(path) => path.clone(),
        None => PathBuf::from(DEFAULT_CONFIG_PATH),
    };

    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path).context("Failed to read runtime config")?;
    let parsed: RuntimeConfigFile =
        toml::from_str(&content).context("Failed to parse runtime config")?;
    Ok(Some(parsed))
}

/// Trims whitespace and drops empty strings when parsing CLI overrides.
pub fn sanitize_optional_string(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn resolver_prefers_existing_asset() {
        let install = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        File::create(install.path().join("dcm2bids.json")).unwrap();

        let resolver = ResourceResolver::with_base_dirs(vec![
            install.path().to_path_buf(),
            cwd.path().to_path_buf(),
        ]);

        assert_eq!(
            resolver.resolve("dcm2bids.json"),
            install.path().join("dcm2bids.json")
        );
    }

    #[test]
    fn resolver_falls_back_to_last_base_dir() {
        let install = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();

        let resolver = ResourceResolver::with_base_dirs(vec![
            install.path().to_path_buf(),
            cwd.path().to_path_buf(),
        ]);

        assert_eq!(
            resolver.resolve("dcm2bids.json"),
            cwd.path().join("dcm2bids.json")
        );
    }

    #[test]
    fn missing_runtime_config_yields_none() {
        let path = PathBuf::from("definitely/not/a/config.toml");
        assert!(load_runtime_config(Some(&path)).unwrap().is_none());
    }

    #[test]
    fn runtime_config_overrides_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "converter_command = \"dcm2bids-next\"\n").unwrap();

        let parsed = load_runtime_config(Some(&path)).unwrap().unwrap();
        assert_eq!(parsed.converter_command.as_deref(), Some("dcm2bids-next"));
        assert!(parsed.scaffold_command.is_none());
    }

    #[test]
    fn sanitize_drops_blank_strings() {
        assert_eq!(sanitize_optional_string(Some("  ".into())), None);
        assert_eq!(
            sanitize_optional_string(Some(" dcm2bids ".into())),
            Some("dcm2bids".into())
        );
    }
}
