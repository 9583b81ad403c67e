//! Seeded synthetic inputs: a Gaussian random field and the Zel'dovich
//! displacement of a particle lattice placed on its grid points.

use basis_comm::launch;
use basis_core::errors::{try_alloc, BasisError, ErrorInfo};
use basis_core::rng::RngHandle;
use basis_grid::{Block, Complex64, DomainGrid, GridLayout, RealField};
use basis_paint::lattice_position;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::sources::{InMemoryDensity, InMemoryParticles, InitialPositions, RunInputs};

/// Damped power law `P(k) = amplitude * k^index * exp(-(k / damping_k)^2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerLaw {
    /// Amplitude.
    pub amplitude: f64,
    /// Spectral index.
    pub index: f64,
    /// Gaussian damping wavenumber.
    pub damping_k: f64,
}

impl Default for PowerLaw {
    fn default() -> Self {
        Self {
            amplitude: 200.0,
            index: -1.0,
            damping_k: 0.3,
        }
    }
}

impl PowerLaw {
    /// Power at `k > 0`.
    pub fn power(&self, k: f64) -> f64 {
        self.amplitude * k.powf(self.index) * (-(k / self.damping_k).powi(2)).exp()
    }

    fn validate(&self) -> Result<(), BasisError> {
        if !(self.amplitude.is_finite() && self.amplitude >= 0.0)
            || !self.index.is_finite()
            || !(self.damping_k.is_finite() && self.damping_k > 0.0)
        {
            return Err(BasisError::Configuration(
                ErrorInfo::new("invalid-power-law", "power-law parameters must be finite")
                    .with_context("amplitude", self.amplitude)
                    .with_context("index", self.index)
                    .with_context("damping_k", self.damping_k),
            ));
        }
        Ok(())
    }
}

/// Full synthetic catalogue assembled on the caller's thread.
#[derive(Debug, Clone)]
pub struct SyntheticInputs {
    /// Initial density in C order.
    pub density: Vec<f64>,
    /// Final positions of the `nmesh^3` lattice particles, in lattice order.
    pub final_positions: Vec<[f64; 3]>,
    /// Lattice side, equal to the grid resolution.
    pub side: usize,
}

impl SyntheticInputs {
    /// In-memory sources with lattice initial positions.
    pub fn into_run_inputs(self) -> Result<RunInputs, BasisError> {
        Ok(RunInputs {
            density: Box::new(InMemoryDensity::new(self.side, self.density)?),
            final_positions: Box::new(InMemoryParticles::new(self.final_positions)),
            initial_positions: InitialPositions::Lattice { side: self.side },
            tracers: None,
        })
    }
}

/// Unit white noise on `block`. Each x-plane has its own substream so the
/// values do not depend on the decomposition.
fn white_noise(grid: &DomainGrid<'_>, seed: u64) -> Result<RealField, BasisError> {
    let block = grid.real_block();
    let n = grid.layout().nmesh();
    let mut values = try_alloc::<f64>(block.len(), "synthetic-noise")?;
    for x in block.start[0]..block.start[0] + block.shape[0] {
        let mut rng = RngHandle::substream(seed, x as u64);
        for y in 0..n {
            for z in 0..n {
                let draw: f64 = rng.sample(StandardNormal);
                if block.contains([x, y, z]) {
                    values[block.offset([x, y, z])] = draw;
                }
            }
        }
    }
    RealField::from_values(block, values)
}

type BlockPayload = (Block, Vec<f64>, [Vec<f64>; 3]);

/// Generates a Gaussian density with spectrum `power` and moves a lattice
/// with one particle per grid point by `growth` times its Zel'dovich
/// displacement. `layout` decides how many workers share the work.
///
/// Each worker hands its own block back through `launch`; the caller's
/// thread then assembles the full `nmesh^3` catalogue, so this is meant for
/// demo and test sizes only.
pub fn generate(
    layout: GridLayout,
    power: PowerLaw,
    growth: f64,
    seed: u64,
) -> Result<SyntheticInputs, BasisError> {
    power.validate()?;
    let n = layout.nmesh();
    let cells = layout.total_cells();
    let results = launch(layout.workers(), |comm| {
        let grid = DomainGrid::new(layout, comm)?;
        let scale = cells as f64 / layout.box_volume();
        let mut delta_k = grid.forward_transform(white_noise(&grid, seed)?)?;
        delta_k.map_modes(&layout, |k, mode| {
            let k2 = k[0] * k[0] + k[1] * k[1] + k[2] * k[2];
            if k2 == 0.0 {
                Complex64::new(0.0, 0.0)
            } else {
                mode * (power.power(k2.sqrt()) * scale).sqrt()
            }
        });

        let mut displacement: [Vec<f64>; 3] = Default::default();
        for (axis, component) in displacement.iter_mut().enumerate() {
            let psi_k = delta_k.filtered(&layout, |k, mode| {
                let k2 = k[0] * k[0] + k[1] * k[1] + k[2] * k[2];
                if k2 == 0.0 {
                    Complex64::new(0.0, 0.0)
                } else {
                    mode * Complex64::new(0.0, k[axis] / k2)
                }
            });
            *component = grid.inverse_transform(psi_k)?.into_values();
        }
        let density = grid.inverse_transform(delta_k)?;
        let payload: BlockPayload = (*density.block(), density.into_values(), displacement);
        Ok(payload)
    })?;

    let mut density = try_alloc::<f64>(cells, "synthetic-density")?;
    let mut final_positions = try_alloc::<[f64; 3]>(cells, "synthetic-positions")?;
    let box_length = layout.box_length();
    for (block, values, displacement) in results {
        for (offset, value) in values.iter().enumerate() {
            let [x, y, z] = block.global_index(offset);
            let index = (x * n + y) * n + z;
            density[index] = *value;
            let lattice = lattice_position(index, n, box_length);
            final_positions[index] = [
                lattice[0] + growth * displacement[0][offset],
                lattice[1] + growth * displacement[1][offset],
                lattice[2] + growth * displacement[2][offset],
            ];
        }
    }
    let variance = density.iter().map(|value| value * value).sum::<f64>() / cells as f64;
    info!(nmesh = n, seed, variance, "generated synthetic initial conditions");
    Ok(SyntheticInputs {
        density,
        final_positions,
        side: n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use basis_grid::ProcessGrid;

    #[test]
    fn generation_does_not_depend_on_worker_count() {
        let one = GridLayout::new(8, 100.0, ProcessGrid::slab(1)).unwrap();
        let a = generate(one, PowerLaw::default(), 1.0, 11).unwrap();
        for grid in [ProcessGrid::pencil(2, 2), ProcessGrid::pencil(2, 4), ProcessGrid::slab(8)] {
            let many = GridLayout::new(8, 100.0, grid).unwrap();
            let b = generate(many, PowerLaw::default(), 1.0, 11).unwrap();
            for (x, y) in a.density.iter().zip(&b.density) {
                assert!((x - y).abs() < 1e-10);
            }
            for (p, q) in a.final_positions.iter().zip(&b.final_positions) {
                for axis in 0..3 {
                    assert!((p[axis] - q[axis]).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn density_has_zero_mean_and_zero_growth_keeps_the_lattice() {
        let layout = GridLayout::new(8, 50.0, ProcessGrid::slab(2)).unwrap();
        let inputs = generate(layout, PowerLaw::default(), 0.0, 3).unwrap();
        let mean = inputs.density.iter().sum::<f64>() / inputs.density.len() as f64;
        assert!(mean.abs() < 1e-12);
        for (index, position) in inputs.final_positions.iter().enumerate() {
            assert_eq!(*position, lattice_position(index, 8, 50.0));
        }
    }

    #[test]
    fn invalid_power_law_is_rejected() {
        let layout = GridLayout::new(4, 1.0, ProcessGrid::slab(1)).unwrap();
        let power = PowerLaw {
            damping_k: 0.0,
            ..PowerLaw::default()
        };
        assert!(matches!(
            generate(layout, power, 1.0, 0),
            Err(BasisError::Configuration(_))
        ));
    }
}
