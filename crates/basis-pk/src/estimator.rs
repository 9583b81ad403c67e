//! Pairwise power spectra of painted fields.

use std::f64::consts::PI;

use basis_core::config::{MassAssignment, ShotNoiseMode};
use basis_core::errors::{BasisError, ErrorInfo};
use basis_fields::CATALOGUE_VERSION;
use basis_grid::{DomainGrid, FourierField, GridLayout};
use basis_paint::{PaintedField, PaintedKind};
use tracing::{info, warn};

use crate::bins::KBins;
use crate::table::{FieldSummary, Multipole, SpectrumPair, SpectrumRow, SpectrumTable, Wedge};

/// Corrections applied while measuring.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumOptions {
    /// Shot-noise policy for self spectra.
    pub shot_noise: ShotNoiseMode,
    /// Deposit kernel used for painting.
    pub kernel: MassAssignment,
    /// Divide each mode by the kernel window (with aliasing correction).
    pub compensate: bool,
    /// Line-of-sight statistics, if any.
    pub anisotropy: Option<Anisotropy>,
}

/// Multipoles and wedges measured about one grid axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Anisotropy {
    /// Line-of-sight axis, `0..3`.
    pub axis: usize,
    /// Legendre orders.
    pub multipoles: Vec<u32>,
    /// Equal-width `|mu|` wedges over `[0, 1]`; zero disables them.
    pub wedges: usize,
}

/// Legendre polynomial `L_ell(mu)` by Bonnet's recursion.
pub fn legendre(ell: u32, mu: f64) -> f64 {
    let (mut previous, mut current) = (1.0, mu);
    if ell == 0 {
        return previous;
    }
    for n in 1..ell {
        let n = f64::from(n);
        let next = ((2.0 * n + 1.0) * mu * current - n * previous) / (n + 1.0);
        previous = current;
        current = next;
    }
    current
}

/// Offsets into the flat buffer reduced across workers: isotropic power per
/// (pair, bin), `|k|` sums and counts per bin, multipole sums per
/// (pair, order, bin), then wedge power per (pair, wedge, bin) with wedge
/// `|k|` sums and counts per (wedge, bin).
struct Accumulators {
    nbins: usize,
    npairs: usize,
    npoles: usize,
    nwedges: usize,
}

impl Accumulators {
    fn power(&self, pair: usize, bin: usize) -> usize {
        pair * self.nbins + bin
    }

    fn ksum(&self, bin: usize) -> usize {
        self.npairs * self.nbins + bin
    }

    fn count(&self, bin: usize) -> usize {
        (self.npairs + 1) * self.nbins + bin
    }

    fn pole(&self, pair: usize, pole: usize, bin: usize) -> usize {
        (self.npairs + 2) * self.nbins + (pair * self.npoles + pole) * self.nbins + bin
    }

    fn wedge_base(&self) -> usize {
        (self.npairs + 2 + self.npairs * self.npoles) * self.nbins
    }

    fn wedge_power(&self, pair: usize, wedge: usize, bin: usize) -> usize {
        self.wedge_base() + (pair * self.nwedges + wedge) * self.nbins + bin
    }

    fn wedge_ksum(&self, wedge: usize, bin: usize) -> usize {
        self.wedge_base() + (self.npairs * self.nwedges + wedge) * self.nbins + bin
    }

    fn wedge_count(&self, wedge: usize, bin: usize) -> usize {
        self.wedge_base() + ((self.npairs + 1) * self.nwedges + wedge) * self.nbins + bin
    }

    fn len(&self) -> usize {
        self.wedge_base() + (self.npairs + 2) * self.nwedges * self.nbins
    }
}

/// Window of a deposit kernel along one axis, `w = k H` in `[-pi, pi]`,
/// including the approximate aliasing sum.
pub fn window_factor(kernel: MassAssignment, w: f64) -> f64 {
    let s2 = (0.5 * w).sin().powi(2);
    match kernel {
        MassAssignment::Ngp => 1.0,
        MassAssignment::Cic => (1.0 - 2.0 / 3.0 * s2).sqrt(),
        MassAssignment::Tsc => (1.0 - s2 + 2.0 / 15.0 * s2 * s2).sqrt(),
    }
}

fn compensate(layout: &GridLayout, kernel: MassAssignment, field: &mut FourierField) {
    let block = *field.block();
    let n = layout.nmesh() as f64;
    for (offset, mode) in field.modes_mut().iter_mut().enumerate() {
        let g = block.global_index(offset);
        let window: f64 = g
            .iter()
            .map(|&i| window_factor(kernel, 2.0 * PI * layout.frequency(i) as f64 / n))
            .product();
        *mode /= window;
    }
}

/// Shot noise subtracted from the self spectrum of `field`.
pub fn shot_noise(mode: ShotNoiseMode, field: &PaintedField, volume: f64) -> f64 {
    if field.particles == 0 {
        return 0.0;
    }
    let poisson = volume / field.particles as f64;
    match mode {
        ShotNoiseMode::None => 0.0,
        ShotNoiseMode::Poisson if field.kind.is_unit_weight() => poisson,
        ShotNoiseMode::Poisson => 0.0,
        ShotNoiseMode::Weighted => poisson * field.mean_weight_sq(),
    }
}

/// Unordered pairs `(i, j)` with `i <= j`.
fn pairs(count: usize) -> Vec<(usize, usize)> {
    (0..count)
        .flat_map(|i| (i..count).map(move |j| (i, j)))
        .collect()
}

/// Measures every auto and cross spectrum of `fields` (collective).
///
/// All modes are accumulated locally first; one all-reduce then combines
/// the per-bin power sums, `|k|` sums and mode counts of every worker,
/// including the multipole and wedge sums when a line of sight is set.
pub fn measure_spectra(
    grid: &DomainGrid<'_>,
    fields: Vec<PaintedField>,
    bins: &KBins,
    options: &SpectrumOptions,
) -> Result<SpectrumTable, BasisError> {
    let layout = *grid.layout();
    let volume = layout.box_volume();
    let nbins = bins.len();
    if let Some(anisotropy) = options.anisotropy.as_ref().filter(|anisotropy| anisotropy.axis > 2) {
        return Err(BasisError::Configuration(
            ErrorInfo::new("invalid-line-of-sight", "the line of sight must be a grid axis")
                .with_context("axis", anisotropy.axis),
        ));
    }

    let mut summaries = Vec::with_capacity(fields.len());
    let mut shots = Vec::with_capacity(fields.len());
    let mut transformed = Vec::with_capacity(fields.len());
    for field in fields {
        summaries.push(FieldSummary {
            label: field.kind.label().to_string(),
            growth_order: match field.kind {
                PaintedKind::Basis(bias) => Some(bias.growth_order()),
                PaintedKind::Tracer => None,
            },
            particles: field.particles,
            weight_sum: field.weight_sum,
            mean_weight_sq: field.mean_weight_sq(),
        });
        shots.push(shot_noise(options.shot_noise, &field, volume));
        let mut modes = grid.forward_transform(field.density)?;
        if options.compensate {
            compensate(&layout, options.kernel, &mut modes);
        }
        transformed.push(modes);
    }

    let pair_list = pairs(transformed.len());
    let (axis, orders, nwedges) = match &options.anisotropy {
        Some(anisotropy) => (
            Some(anisotropy.axis),
            anisotropy.multipoles.as_slice(),
            anisotropy.wedges,
        ),
        None => (None, &[][..], 0),
    };
    let slots = Accumulators {
        nbins,
        npairs: pair_list.len(),
        npoles: orders.len(),
        nwedges,
    };
    let mut accumulators = vec![0.0; slots.len()];
    let mut weights = vec![0.0; orders.len()];
    if let Some(first) = transformed.first() {
        let block = *first.block();
        for offset in 0..block.len() {
            let k = layout.kvector(block.global_index(offset));
            let kmag = (k[0] * k[0] + k[1] * k[1] + k[2] * k[2]).sqrt();
            if kmag == 0.0 {
                continue;
            }
            let Some(bin) = bins.find(kmag) else {
                continue;
            };
            accumulators[slots.ksum(bin)] += kmag;
            accumulators[slots.count(bin)] += 1.0;
            let mu = axis.map(|axis| k[axis] / kmag).unwrap_or(0.0);
            for (weight, &ell) in weights.iter_mut().zip(orders) {
                *weight = f64::from(2 * ell + 1) * legendre(ell, mu);
            }
            let wedge = (nwedges > 0)
                .then(|| ((mu.abs() * nwedges as f64) as usize).min(nwedges - 1));
            if let Some(wedge) = wedge {
                accumulators[slots.wedge_ksum(wedge, bin)] += kmag;
                accumulators[slots.wedge_count(wedge, bin)] += 1.0;
            }
            for (index, &(i, j)) in pair_list.iter().enumerate() {
                let a = transformed[i].modes()[offset];
                let b = transformed[j].modes()[offset];
                let cross = (a * b.conj()).re;
                accumulators[slots.power(index, bin)] += cross;
                for (pole, weight) in weights.iter().enumerate() {
                    accumulators[slots.pole(index, pole, bin)] += weight * cross;
                }
                if let Some(wedge) = wedge {
                    accumulators[slots.wedge_power(index, wedge, bin)] += cross;
                }
            }
        }
    }
    drop(transformed);
    let totals = grid.comm().all_reduce_sum("spectrum-bins", &accumulators)?;

    let centers = bins.centers();
    let is_root = grid.comm().is_root();
    if is_root {
        for (bin, center) in centers.iter().enumerate() {
            if totals[slots.count(bin)] == 0.0 {
                warn!(bin, k_center = center, "k-bin has no modes; reporting no data");
            }
        }
    }

    // Mean over `modes` of the summed cross power, or `None` for an empty bin.
    let average =
        |sum: f64, modes: f64, shot: f64| (modes > 0.0).then(|| volume * sum / modes - shot);
    let row = |bin: usize, power_sum: f64, ksum: f64, modes: f64, shot: f64| SpectrumRow {
        k_center: centers[bin],
        k_mean: (modes > 0.0).then(|| ksum / modes),
        power: average(power_sum, modes, shot),
        modes: modes as u64,
    };
    let wedge_width = 1.0 / nwedges.max(1) as f64;

    let spectra = pair_list
        .iter()
        .enumerate()
        .map(|(index, &(i, j))| {
            let shot = if i == j { shots[i] } else { 0.0 };
            let rows = (0..nbins)
                .map(|bin| {
                    row(
                        bin,
                        totals[slots.power(index, bin)],
                        totals[slots.ksum(bin)],
                        totals[slots.count(bin)],
                        shot,
                    )
                })
                .collect();
            let multipoles = orders
                .iter()
                .enumerate()
                .map(|(pole, &ell)| Multipole {
                    ell,
                    power: (0..nbins)
                        .map(|bin| {
                            let shot = if ell == 0 { shot } else { 0.0 };
                            let sum = totals[slots.pole(index, pole, bin)];
                            average(sum, totals[slots.count(bin)], shot)
                        })
                        .collect(),
                })
                .collect();
            let wedges = (0..nwedges)
                .map(|wedge| Wedge {
                    mu_min: wedge as f64 * wedge_width,
                    mu_max: (wedge + 1) as f64 * wedge_width,
                    rows: (0..nbins)
                        .map(|bin| {
                            row(
                                bin,
                                totals[slots.wedge_power(index, wedge, bin)],
                                totals[slots.wedge_ksum(wedge, bin)],
                                totals[slots.wedge_count(wedge, bin)],
                                shot,
                            )
                        })
                        .collect(),
                })
                .collect();
            SpectrumPair {
                a: summaries[i].label.clone(),
                b: summaries[j].label.clone(),
                shot_noise: shot,
                rows,
                multipoles,
                wedges,
            }
        })
        .collect::<Vec<_>>();

    if is_root {
        info!(
            pairs = spectra.len(),
            bins = nbins,
            compensated = options.compensate,
            "spectra measured"
        );
    }
    SpectrumTable {
        schema: Default::default(),
        catalogue_version: CATALOGUE_VERSION,
        nmesh: layout.nmesh(),
        box_length: layout.box_length(),
        kernel: options.kernel,
        compensated: options.compensate,
        edges: bins.edges().to_vec(),
        line_of_sight: axis,
        fields: summaries,
        pairs: spectra,
        table_hash: String::new(),
    }
    .seal()
}
