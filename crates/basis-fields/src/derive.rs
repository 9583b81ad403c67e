//! Derivation of the Lagrangian fields from the initial density.

use basis_core::errors::{BasisError, ErrorInfo};
use basis_grid::{Complex64, DomainGrid, FourierField, RealField};
use tracing::{debug, info};

use crate::catalogue::BiasField;
use crate::transfer::TransferFunction;

/// Preprocessing applied to the initial density before any field is built.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOptions {
    /// Linear growth factor multiplying the density.
    pub growth_factor: f64,
    /// Gaussian smoothing scale `exp(-k^2 / (2 kcut^2))`, if any.
    pub smoothing_kcut: Option<f64>,
    /// Scale-dependent growth `T(|k|)` multiplying every mode except `k = 0`.
    pub transfer: Option<TransferFunction>,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            growth_factor: 1.0,
            smoothing_kcut: None,
            transfer: None,
        }
    }
}

/// Real-space Lagrangian fields of one worker, in catalogue order.
#[derive(Debug, Clone)]
pub struct LagrangianFields {
    entries: Vec<(BiasField, RealField)>,
}

impl LagrangianFields {
    /// Field values for `field`, if it was requested.
    pub fn get(&self, field: BiasField) -> Option<&RealField> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, values)| values)
    }

    /// Fields in catalogue order.
    pub fn fields(&self) -> Vec<BiasField> {
        self.entries.iter().map(|(field, _)| *field).collect()
    }

    /// Iterates `(field, values)` in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = (BiasField, &RealField)> {
        self.entries.iter().map(|(field, values)| (*field, values))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no field was requested.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Six independent components of the symmetric tidal tensor.
const TIDAL_COMPONENTS: [(usize, usize); 6] = [(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)];

fn k_squared(k: [f64; 3]) -> f64 {
    k[0] * k[0] + k[1] * k[1] + k[2] * k[2]
}

fn ensure_finite(field: &RealField) -> Result<(), BasisError> {
    match field.values().iter().position(|value| !value.is_finite()) {
        None => Ok(()),
        Some(offset) => {
            let [x, y, z] = field.block().global_index(offset);
            Err(BasisError::NumericDivergence(
                ErrorInfo::new("non-finite-density", "initial density contains a non-finite value")
                    .with_context("x", x)
                    .with_context("y", y)
                    .with_context("z", z),
            ))
        }
    }
}

/// Applies growth, the transfer function and smoothing to the real-space
/// density (collective when either Fourier-space step is enabled).
pub fn prepare_density(
    grid: &DomainGrid<'_>,
    mut density: RealField,
    options: &FieldOptions,
) -> Result<RealField, BasisError> {
    ensure_finite(&density)?;
    if options.growth_factor != 1.0 {
        let growth = options.growth_factor;
        density.values_mut().iter_mut().for_each(|value| *value *= growth);
    }
    if options.transfer.is_none() && options.smoothing_kcut.is_none() {
        return Ok(density);
    }
    let mut modes = grid.forward_transform(density)?;
    if let Some(transfer) = &options.transfer {
        debug!(samples = transfer.len(), "applying transfer function");
        modes.map_modes(grid.layout(), |k, mode| {
            let k2 = k_squared(k);
            if k2 == 0.0 {
                mode
            } else {
                mode * transfer.evaluate(k2.sqrt())
            }
        });
    }
    if let Some(kcut) = options.smoothing_kcut {
        let two_kcut_sq = 2.0 * kcut * kcut;
        modes.map_modes(grid.layout(), |k, mode| mode * (-k_squared(k) / two_kcut_sq).exp());
    }
    grid.inverse_transform(modes)
}

/// `IFFT[(k_i k_j / k^2 - delta_ij / 3) delta_k]`; the `k = 0` mode is dropped.
pub fn tidal_component(
    grid: &DomainGrid<'_>,
    delta_k: &FourierField,
    i: usize,
    j: usize,
) -> Result<RealField, BasisError> {
    let kronecker = if i == j { 1.0 / 3.0 } else { 0.0 };
    let component = delta_k.filtered(grid.layout(), |k, mode| {
        let k2 = k_squared(k);
        if k2 == 0.0 {
            Complex64::new(0.0, 0.0)
        } else {
            mode * (k[i] * k[j] / k2 - kronecker)
        }
    });
    grid.inverse_transform(component)
}

/// Tidal-shear scalar `s_ij s_ij` before mean subtraction.
pub fn tidal_squared(grid: &DomainGrid<'_>, delta_k: &FourierField) -> Result<RealField, BasisError> {
    let mut total = grid.zeros("tidal-squared")?;
    for (i, j) in TIDAL_COMPONENTS {
        let weight = if i == j { 1.0 } else { 2.0 };
        let component = tidal_component(grid, delta_k, i, j)?;
        for (acc, s) in total.values_mut().iter_mut().zip(component.values()) {
            *acc += weight * s * s;
        }
    }
    Ok(total)
}

/// `IFFT[-k^2 delta_k]`.
pub fn laplacian(grid: &DomainGrid<'_>, delta_k: &FourierField) -> Result<RealField, BasisError> {
    let modes = delta_k.filtered(grid.layout(), |k, mode| mode * -k_squared(k));
    grid.inverse_transform(modes)
}

fn subtract_global_mean(
    grid: &DomainGrid<'_>,
    label: &str,
    mut field: RealField,
) -> Result<RealField, BasisError> {
    let mean = grid.global_mean(label, &field)?;
    field.values_mut().iter_mut().for_each(|value| *value -= mean);
    debug!(rank = grid.rank(), label, mean, "subtracted global mean");
    Ok(field)
}

/// Builds every requested field from the real-space initial density
/// (collective). `requested` must be identical on all workers.
pub fn derive_fields(
    grid: &DomainGrid<'_>,
    density: RealField,
    requested: &[BiasField],
    options: &FieldOptions,
) -> Result<LagrangianFields, BasisError> {
    let mut requested = requested.to_vec();
    requested.sort();
    requested.dedup();

    let delta = prepare_density(grid, density, options)?;
    let delta_k = if requested.iter().any(|field| field.needs_fourier()) {
        Some(grid.forward_transform(delta.clone())?)
    } else {
        None
    };

    let mut entries = Vec::with_capacity(requested.len());
    for field in requested {
        let values = match (field, delta_k.as_ref()) {
            (BiasField::One, _) => grid.real_from_fn("field-one", |_| 1.0)?,
            (BiasField::Delta, _) => delta.clone(),
            (BiasField::DeltaSquared, _) => {
                let mut squared = delta.clone();
                squared.values_mut().iter_mut().for_each(|value| *value *= *value);
                subtract_global_mean(grid, "delta2-mean", squared)?
            }
            (BiasField::TidalSquared, Some(delta_k)) => {
                subtract_global_mean(grid, "s2-mean", tidal_squared(grid, delta_k)?)?
            }
            (BiasField::LaplacianDelta, Some(delta_k)) => laplacian(grid, delta_k)?,
            (BiasField::TidalSquared | BiasField::LaplacianDelta, None) => {
                return Err(BasisError::protocol(
                    "missing-fourier-density",
                    "Fourier density was not prepared",
                ))
            }
        };
        debug!(rank = grid.rank(), field = field.label(), "derived field");
        entries.push((field, values));
    }
    if grid.comm().is_root() {
        info!(
            fields = entries.len(),
            nmesh = grid.layout().nmesh(),
            growth = options.growth_factor,
            smoothing = ?options.smoothing_kcut,
            "lagrangian fields ready"
        );
    }
    Ok(LagrangianFields { entries })
}
