//! Tabulated transfer functions for scale-dependent growth.

use basis_core::errors::{BasisError, ErrorInfo};

/// `T(k)` sampled at increasing wavenumbers, interpolated linearly and
/// extrapolated from the outermost segments.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    k: Vec<f64>,
    transfer: Vec<f64>,
}

impl TransferFunction {
    /// Validates a table of at least two `(k, T)` samples.
    pub fn new(k: Vec<f64>, transfer: Vec<f64>) -> Result<Self, BasisError> {
        if k.len() != transfer.len() || k.len() < 2 {
            return Err(BasisError::Configuration(
                ErrorInfo::new(
                    "transfer-table-shape",
                    "a transfer table needs matching k and T columns with at least two rows",
                )
                .with_context("k", k.len())
                .with_context("transfer", transfer.len()),
            ));
        }
        if k.iter().chain(&transfer).any(|value| !value.is_finite()) {
            return Err(BasisError::configuration(
                "transfer-table-value",
                "transfer table entries must be finite",
            ));
        }
        if let Some(row) = k.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(BasisError::Configuration(
                ErrorInfo::new("transfer-table-order", "transfer table k must be strictly increasing")
                    .with_context("row", row + 1),
            ));
        }
        Ok(Self { k, transfer })
    }

    /// Number of tabulated samples.
    pub fn len(&self) -> usize {
        self.k.len()
    }

    /// Always false for a validated table.
    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }

    /// `T(k)`.
    pub fn evaluate(&self, k: f64) -> f64 {
        let last = self.k.len() - 1;
        // Segment whose left sample is the last one <= k, clamped to the table.
        let right = self.k.partition_point(|sample| *sample <= k).clamp(1, last);
        let left = right - 1;
        let slope = (self.transfer[right] - self.transfer[left]) / (self.k[right] - self.k[left]);
        self.transfer[left] + slope * (k - self.k[left])
    }
}
