//! Persisted run artefacts: `spectra.json`, `spectra.csv`, `config.yaml` and
//! `manifest.json`.

use std::fs;
use std::path::{Path, PathBuf};

use basis_core::config::RunConfig;
use basis_core::errors::{BasisError, ErrorInfo};
use basis_core::provenance::{RunProvenance, SchemaVersion};
use basis_core::serde::{from_json_slice, to_canonical_json_bytes, to_yaml_string};
use basis_pk::SpectrumTable;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runner::RunOutcome;

/// File name of the canonical JSON table.
pub const TABLE_FILE: &str = "spectra.json";
/// File name of the flat CSV export.
pub const CSV_FILE: &str = "spectra.csv";
/// File name of the effective configuration.
pub const CONFIG_FILE: &str = "config.yaml";
/// File name of the run manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Describes a completed run and the files it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Schema of the manifest.
    pub schema: SchemaVersion,
    /// Configuration used for the run.
    pub config: RunConfig,
    /// Inputs, worker count, seed and tool versions.
    pub provenance: RunProvenance,
    /// Hash stored in the spectrum table.
    pub table_hash: String,
    /// Files written, relative to the output directory.
    pub files: Vec<PathBuf>,
}

fn write_error(code: &str, err: impl ToString, path: &Path) -> BasisError {
    BasisError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display()),
    )
}

impl RunManifest {
    /// Writes the manifest as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<(), BasisError> {
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            BasisError::Serde(
                ErrorInfo::new("manifest-serialize", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        fs::write(path, json).map_err(|err| write_error("manifest-write", err, path))
    }

    /// Loads a manifest from disk.
    pub fn load(path: &Path) -> Result<Self, BasisError> {
        let contents = fs::read(path).map_err(|err| BasisError::io("manifest-read", err, path))?;
        from_json_slice(&contents)
    }
}

/// Writes the table, the optional CSV, the effective configuration and the
/// manifest into `dir`. Every written file is listed in the manifest.
pub fn write_outputs(
    dir: &Path,
    config: &RunConfig,
    outcome: &RunOutcome,
) -> Result<RunManifest, BasisError> {
    fs::create_dir_all(dir).map_err(|err| write_error("output-mkdir", err, dir))?;

    let table_path = dir.join(TABLE_FILE);
    let bytes = to_canonical_json_bytes(&outcome.table)?;
    fs::write(&table_path, bytes).map_err(|err| write_error("table-write", err, &table_path))?;
    let mut files = vec![PathBuf::from(TABLE_FILE)];

    if config.output.write_csv {
        outcome.table.write_csv_file(&dir.join(CSV_FILE))?;
        files.push(PathBuf::from(CSV_FILE));
    }

    let config_path = dir.join(CONFIG_FILE);
    fs::write(&config_path, to_yaml_string(config)?)
        .map_err(|err| write_error("config-write", err, &config_path))?;
    files.push(PathBuf::from(CONFIG_FILE));

    files.push(PathBuf::from(MANIFEST_FILE));
    let manifest = RunManifest {
        schema: SchemaVersion::default(),
        config: config.clone(),
        provenance: outcome.provenance.clone(),
        table_hash: outcome.table.table_hash.clone(),
        files,
    };
    manifest.write(&dir.join(MANIFEST_FILE))?;
    info!(dir = %dir.display(), table_hash = %manifest.table_hash, "wrote run outputs");
    Ok(manifest)
}

/// Loads a persisted table and checks its content hash.
pub fn load_table(path: &Path) -> Result<SpectrumTable, BasisError> {
    let bytes = fs::read(path).map_err(|err| BasisError::io("table-read", err, path))?;
    let table: SpectrumTable = from_json_slice(&bytes)?;
    if !table.verify_hash()? {
        return Err(BasisError::Serde(
            ErrorInfo::new("table-hash-mismatch", "stored table hash does not match its content")
                .with_context("path", path.display())
                .with_hint("the file was modified after it was written"),
        ));
    }
    Ok(table)
}
