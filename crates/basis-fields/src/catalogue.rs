//! The closed list of bias fields.

use std::fmt;

use basis_core::errors::{BasisError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// Version of the field catalogue. Bumped whenever a variant or formula changes.
pub const CATALOGUE_VERSION: u32 = 1;

/// Lagrangian bias field. The set is closed: consumers match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BiasField {
    /// Constant 1; painting it yields the matter density.
    #[serde(rename = "1")]
    One,
    /// Linear density contrast.
    #[serde(rename = "delta")]
    Delta,
    /// Mean-subtracted square of the density.
    #[serde(rename = "delta2")]
    DeltaSquared,
    /// Mean-subtracted tidal-shear scalar `s_ij s_ij`.
    #[serde(rename = "s2")]
    TidalSquared,
    /// Laplacian of the density.
    #[serde(rename = "nabla2")]
    LaplacianDelta,
}

impl BiasField {
    /// Catalogue order.
    pub const ALL: [BiasField; 5] = [
        BiasField::One,
        BiasField::Delta,
        BiasField::DeltaSquared,
        BiasField::TidalSquared,
        BiasField::LaplacianDelta,
    ];

    /// Stable label used in configuration and output.
    pub fn label(self) -> &'static str {
        match self {
            BiasField::One => "1",
            BiasField::Delta => "delta",
            BiasField::DeltaSquared => "delta2",
            BiasField::TidalSquared => "s2",
            BiasField::LaplacianDelta => "nabla2",
        }
    }

    /// Power of the linear density the field scales with.
    pub fn growth_order(self) -> u32 {
        match self {
            BiasField::One => 0,
            BiasField::Delta | BiasField::LaplacianDelta => 1,
            BiasField::DeltaSquared | BiasField::TidalSquared => 2,
        }
    }

    /// Looks a field up by label.
    pub fn from_label(label: &str) -> Result<Self, BasisError> {
        BiasField::ALL
            .into_iter()
            .find(|field| field.label() == label)
            .ok_or_else(|| {
                BasisError::Configuration(
                    ErrorInfo::new("unknown-field", "unknown bias field label")
                        .with_context("label", label)
                        .with_hint("use one of 1, delta, delta2, s2, nabla2"),
                )
            })
    }

    /// Parses configured labels into a duplicate-free list in catalogue order.
    pub fn parse_list(labels: &[String]) -> Result<Vec<Self>, BasisError> {
        let mut fields = labels
            .iter()
            .map(|label| Self::from_label(label))
            .collect::<Result<Vec<_>, _>>()?;
        fields.sort();
        fields.dedup();
        if fields.is_empty() {
            return Err(BasisError::configuration(
                "empty-fields",
                "at least one bias field is required",
            ));
        }
        Ok(fields)
    }

    /// Whether the field needs the Fourier-space density.
    pub fn needs_fourier(self) -> bool {
        matches!(self, BiasField::TidalSquared | BiasField::LaplacianDelta)
    }
}

impl fmt::Display for BiasField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
