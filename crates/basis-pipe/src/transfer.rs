//! Transfer tables for scale-dependent growth.

use std::path::Path;

use basis_core::config::TransferConfig;
use basis_core::errors::{BasisError, ErrorInfo};
use basis_fields::TransferFunction;

fn table_error(code: &str, message: impl Into<String>, path: &Path) -> BasisError {
    BasisError::Configuration(ErrorInfo::new(code, message).with_context("path", path.display()))
}

/// Reads comma-separated `k, T` rows. Blank lines and lines starting with `#`
/// are skipped; extra columns are ignored.
pub fn read_transfer_file(path: &Path) -> Result<TransferFunction, BasisError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| table_error("transfer-read", err.to_string(), path))?;
    let (mut k, mut transfer) = (Vec::new(), Vec::new());
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|err| table_error("transfer-read", err.to_string(), path))?;
        let column = |index: usize| {
            record
                .get(index)
                .and_then(|field| field.parse::<f64>().ok())
                .ok_or_else(|| {
                    BasisError::Configuration(
                        ErrorInfo::new("transfer-parse", "transfer rows need two numeric columns")
                            .with_context("path", path.display())
                            .with_context("row", row + 1),
                    )
                })
        };
        k.push(column(0)?);
        transfer.push(column(1)?);
    }
    TransferFunction::new(k, transfer)
        .map_err(|err| BasisError::Configuration(err.info().clone().with_context("path", path.display())))
}

/// Resolves a configured transfer table.
pub fn load_transfer(config: &TransferConfig) -> Result<TransferFunction, BasisError> {
    match config {
        TransferConfig::Table { k, transfer } => TransferFunction::new(k.clone(), transfer.clone()),
        TransferConfig::File { file } => read_transfer_file(file),
    }
}
