//! Wavenumber bins.

use basis_core::config::BinConfig;
use basis_core::errors::{BasisError, ErrorInfo};
use basis_grid::GridLayout;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Relative tolerance, in units of one bin, for treating a span as whole bins.
const WHOLE_BIN_SLACK: f64 = 1e-9;

/// Relative tolerance for a wavenumber sitting on a bin edge.
const EDGE_SLACK: f64 = 1e-10;

/// Increasing bin edges. Bin `i` covers `[edges[i], edges[i + 1])`; the last
/// bin also includes its upper edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KBins {
    edges: Vec<f64>,
}

fn bins_error(code: &str, message: &str) -> BasisError {
    BasisError::configuration(code, message)
}

impl KBins {
    /// Validates explicit edges.
    pub fn new(edges: Vec<f64>) -> Result<Self, BasisError> {
        if edges.len() < 2 {
            return Err(bins_error("too-few-edges", "at least two bin edges are required"));
        }
        if edges.iter().any(|edge| !edge.is_finite() || *edge < 0.0) {
            return Err(bins_error("invalid-edge", "bin edges must be finite and non-negative"));
        }
        if let Some(position) = edges.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(BasisError::Configuration(
                ErrorInfo::new("unsorted-edges", "bin edges must be strictly increasing")
                    .with_context("index", position + 1),
            ));
        }
        Ok(Self { edges })
    }

    /// `nbins` equal-width bins from `kmin` to `kmax`.
    pub fn linear(kmin: f64, kmax: f64, nbins: usize) -> Result<Self, BasisError> {
        if nbins == 0 {
            return Err(bins_error("invalid-nbins", "at least one bin is required"));
        }
        let width = (kmax - kmin) / nbins as f64;
        Self::new((0..=nbins).map(|i| kmin + width * i as f64).collect())
    }

    /// `nbins` logarithmically spaced bins from `kmin > 0` to `kmax`.
    pub fn log(kmin: f64, kmax: f64, nbins: usize) -> Result<Self, BasisError> {
        if !(kmin > 0.0) {
            return Err(bins_error("invalid-log-kmin", "logarithmic bins need kmin > 0"));
        }
        if nbins == 0 {
            return Err(bins_error("invalid-nbins", "at least one bin is required"));
        }
        let (lo, hi) = (kmin.ln(), kmax.ln());
        let step = (hi - lo) / nbins as f64;
        Self::new((0..=nbins).map(|i| (lo + step * i as f64).exp()).collect())
    }

    /// Resolves a configuration against the grid. Linear bins default to the
    /// fundamental mode as width, a first edge half a width above zero and
    /// the Nyquist wavenumber as upper limit. Only whole bins below `kmax`
    /// are kept.
    pub fn from_config(config: &BinConfig, layout: &GridLayout) -> Result<Self, BasisError> {
        match config {
            BinConfig::Linear { kmin, kmax, dk } => {
                let dk = dk.unwrap_or_else(|| layout.fundamental_k());
                let kmin = kmin.unwrap_or(0.5 * dk);
                let upper = kmax.unwrap_or_else(|| layout.nyquist_k());
                let span = (upper - kmin) / dk;
                let nbins = (span + WHOLE_BIN_SLACK).floor();
                if !(dk > 0.0) || kmin < 0.0 || !(nbins >= 1.0) {
                    return Err(BasisError::Configuration(
                        ErrorInfo::new(
                            "invalid-linear-bins",
                            "linear bins need dk > 0, kmin >= 0 and room for one bin below kmax",
                        )
                        .with_context("kmin", kmin)
                        .with_context("kmax", upper)
                        .with_context("dk", dk),
                    ));
                }
                if kmax.is_some() && span - nbins > WHOLE_BIN_SLACK {
                    warn!(
                        kmin,
                        kmax = upper,
                        dk,
                        last_edge = kmin + dk * nbins,
                        "kmax is not a whole number of bins above kmin, partial bin dropped"
                    );
                }
                let nbins = nbins as usize;
                Self::new((0..=nbins).map(|i| kmin + dk * i as f64).collect())
            }
            BinConfig::Log { kmin, kmax, nbins } => Self::log(*kmin, *kmax, *nbins),
            BinConfig::Explicit { edges } => Self::new(edges.clone()),
        }
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    /// Always false: a valid binning has at least one bin.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arithmetic bin centres.
    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|pair| 0.5 * (pair[0] + pair[1])).collect()
    }

    /// Bin containing `k`, found by binary search. A `k` within rounding of
    /// an edge counts as sitting on it, so modes of one shell share a bin.
    pub fn find(&self, k: f64) -> Option<usize> {
        let snapped = k + EDGE_SLACK * k.abs();
        let first = self.edges[0];
        let last = self.edges[self.edges.len() - 1];
        if !(snapped >= first && k - EDGE_SLACK * k.abs() <= last) {
            return None;
        }
        if snapped >= last {
            return Some(self.len() - 1);
        }
        // Number of edges <= k, minus one.
        Some(self.edges.partition_point(|edge| *edge <= snapped) - 1)
    }
}
