//! Immutable spectrum table and its persisted forms.

use std::io::Write;
use std::path::Path;

use basis_core::config::MassAssignment;
use basis_core::errors::{BasisError, ErrorInfo};
use basis_core::hash::stable_hash_string;
use basis_core::provenance::SchemaVersion;
use serde::{Deserialize, Serialize};

/// One k-bin of one spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRow {
    /// Arithmetic centre of the bin.
    pub k_center: f64,
    /// Mean `|k|` of the modes in the bin; `None` without modes.
    pub k_mean: Option<f64>,
    /// Binned power after shot-noise subtraction; `None` without modes.
    pub power: Option<f64>,
    /// Number of Fourier modes in the bin.
    pub modes: u64,
}

/// Spectrum of one unordered field pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumPair {
    /// First field label.
    pub a: String,
    /// Second field label.
    pub b: String,
    /// Shot noise subtracted from every row.
    pub shot_noise: f64,
    /// Rows in bin order.
    pub rows: Vec<SpectrumRow>,
    /// Legendre multipoles about the line of sight, when one was set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multipoles: Vec<Multipole>,
    /// `|mu|` wedges about the line of sight, when requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wedges: Vec<Wedge>,
}

/// One Legendre multipole, sharing bins and mode counts with the rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multipole {
    /// Legendre order.
    pub ell: u32,
    /// `(2 ell + 1) <P(k, mu) L_ell(mu)>` per bin; the shot noise is removed
    /// from the monopole only. `None` without modes.
    pub power: Vec<Option<f64>>,
}

/// Spectrum restricted to `mu_min <= |mu| < mu_max` (the last wedge is closed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wedge {
    /// Lower `|mu|` edge.
    pub mu_min: f64,
    /// Upper `|mu|` edge.
    pub mu_max: f64,
    /// Rows in bin order.
    pub rows: Vec<SpectrumRow>,
}

/// Painted field that entered the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Label.
    pub label: String,
    /// Power of the linear density the field scales with; `None` for tracers.
    pub growth_order: Option<u32>,
    /// Number of particles painted.
    pub particles: u64,
    /// Sum of sampled weights.
    pub weight_sum: f64,
    /// Mean squared weight.
    pub mean_weight_sq: f64,
}

/// Every auto and cross spectrum of one run. Pairs are ordered `(i, j)` with
/// `i <= j` over the field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumTable {
    /// Schema of the serialized table.
    pub schema: SchemaVersion,
    /// Version of the bias-field catalogue.
    pub catalogue_version: u32,
    /// Grid resolution.
    pub nmesh: usize,
    /// Box side length.
    pub box_length: f64,
    /// Deposit kernel.
    pub kernel: MassAssignment,
    /// Whether the deposit window was divided out.
    pub compensated: bool,
    /// Bin edges.
    pub edges: Vec<f64>,
    /// Line-of-sight axis of the anisotropic statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_of_sight: Option<usize>,
    /// Painted fields in table order.
    pub fields: Vec<FieldSummary>,
    /// Spectra.
    pub pairs: Vec<SpectrumPair>,
    /// SHA-256 of the canonical JSON of every other member.
    pub table_hash: String,
}

fn csv_error(code: &str, err: impl ToString) -> BasisError {
    BasisError::Serde(ErrorInfo::new(code, "CSV spectrum export failure").with_hint(err.to_string()))
}

impl SpectrumTable {
    /// Computes and stores the content hash.
    pub fn seal(mut self) -> Result<Self, BasisError> {
        self.table_hash = String::new();
        self.table_hash = stable_hash_string(&self)?;
        Ok(self)
    }

    /// Recomputes the content hash and compares it with the stored one.
    pub fn verify_hash(&self) -> Result<bool, BasisError> {
        let mut copy = self.clone();
        copy.table_hash = String::new();
        Ok(stable_hash_string(&copy)? == self.table_hash)
    }

    /// Spectrum of a pair; the order of `a` and `b` does not matter.
    pub fn get(&self, a: &str, b: &str) -> Option<&SpectrumPair> {
        self.pairs
            .iter()
            .find(|pair| (pair.a == a && pair.b == b) || (pair.a == b && pair.b == a))
    }

    /// Field labels in table order.
    pub fn labels(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.label.as_str()).collect()
    }

    /// Writes one flat CSV row per pair, statistic and bin. The `statistic`
    /// column is `power` for the isotropic rows, `ell<n>` for multipoles and
    /// `mu<lo>-<hi>` for wedges.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), BasisError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["a", "b", "statistic", "k_center", "k_mean", "power", "modes", "shot_noise"])
            .map_err(|err| csv_error("csv-header", err))?;
        let optional = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        for pair in &self.pairs {
            let mut write_row = |statistic: &str, row: &SpectrumRow, power: Option<f64>| {
                wtr.write_record([
                    pair.a.clone(),
                    pair.b.clone(),
                    statistic.to_string(),
                    row.k_center.to_string(),
                    optional(row.k_mean),
                    optional(power),
                    row.modes.to_string(),
                    pair.shot_noise.to_string(),
                ])
                .map_err(|err| csv_error("csv-row", err))
            };
            for row in &pair.rows {
                write_row("power", row, row.power)?;
            }
            for pole in &pair.multipoles {
                let statistic = format!("ell{}", pole.ell);
                for (row, power) in pair.rows.iter().zip(&pole.power) {
                    write_row(&statistic, row, *power)?;
                }
            }
            for wedge in &pair.wedges {
                let statistic = format!("mu{}-{}", wedge.mu_min, wedge.mu_max);
                for row in &wedge.rows {
                    write_row(&statistic, row, row.power)?;
                }
            }
        }
        wtr.flush().map_err(|err| csv_error("csv-flush", err))
    }

    /// Writes the CSV form to a file.
    pub fn write_csv_file(&self, path: &Path) -> Result<(), BasisError> {
        let file = std::fs::File::create(path).map_err(|err| BasisError::io("csv-create", err, path))?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}
