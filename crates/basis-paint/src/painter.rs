//! Advection of Lagrangian fields and deposition onto the Eulerian grid.
//!
//! Painting runs in two routing rounds. Particles first travel to the worker
//! owning the anchor cell of their initial position, where every field is
//! sampled from a halo-filled block. The sampled values then travel with the
//! final position to the worker owning its deposit anchor, which adds them
//! into a halo-extended block. Ghost deposits are finally folded back onto
//! their owners.

use basis_core::config::{BoundaryOwner, MassAssignment, PaintingConfig, SampleKernel};
use basis_core::errors::{BasisError, ErrorInfo};
use basis_fields::{BiasField, LagrangianFields};
use basis_grid::{DomainGrid, HaloField, HaloPlan, RealField};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::kernel::{halo_width, sampling_assignment, wrap_position, Stencil};
use crate::particles::ParticleBatch;

/// What a painted grid represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "field", rename_all = "kebab-case")]
pub enum PaintedKind {
    /// A Lagrangian bias field advected by the matter particles.
    Basis(BiasField),
    /// A tracer catalogue painted with unit weights.
    Tracer,
}

impl PaintedKind {
    /// Whether every particle carries weight one.
    pub fn is_unit_weight(self) -> bool {
        matches!(self, PaintedKind::Basis(BiasField::One) | PaintedKind::Tracer)
    }

    /// Label used in tables.
    pub fn label(self) -> &'static str {
        match self {
            PaintedKind::Basis(field) => field.label(),
            PaintedKind::Tracer => "tracer",
        }
    }
}

/// Late-time grid of one advected field, normalised by the mean particle
/// density so that a uniform unit-weight catalogue paints a grid of ones.
#[derive(Debug, Clone)]
pub struct PaintedField {
    /// Field represented by the grid.
    pub kind: PaintedKind,
    /// Normalised density on this worker's real block.
    pub density: RealField,
    /// Number of particles deposited across all workers.
    pub particles: u64,
    /// Sum of the sampled weights over all particles.
    pub weight_sum: f64,
    /// Sum of the squared sampled weights over all particles.
    pub weight_sq_sum: f64,
    /// Sum over the whole painted grid before normalisation.
    pub deposited_sum: f64,
}

impl PaintedField {
    /// Mean squared weight `<w^2>`.
    pub fn mean_weight_sq(&self) -> f64 {
        if self.particles == 0 {
            0.0
        } else {
            self.weight_sq_sum / self.particles as f64
        }
    }
}

/// Painter bound to one worker's grid, with halo plans for both kernels.
#[derive(Debug)]
pub struct Painter<'g, 'c> {
    grid: &'g DomainGrid<'c>,
    kernel: MassAssignment,
    sampling: SampleKernel,
    boundary: BoundaryOwner,
    sample_plan: HaloPlan,
    deposit_plan: HaloPlan,
}

impl<'g, 'c> Painter<'g, 'c> {
    /// Builds the halo plans (collective).
    pub fn new(grid: &'g DomainGrid<'c>, config: &PaintingConfig) -> Result<Self, BasisError> {
        let sample_plan = HaloPlan::build(grid, halo_width(sampling_assignment(config.sampling)))?;
        let deposit_plan = HaloPlan::build(grid, halo_width(config.kernel))?;
        Ok(Self {
            grid,
            kernel: config.kernel,
            sampling: config.sampling,
            boundary: config.boundary,
            sample_plan,
            deposit_plan,
        })
    }

    /// Deposit kernel.
    pub fn kernel(&self) -> MassAssignment {
        self.kernel
    }

    fn wrap(&self, position: [f64; 3]) -> Result<[f64; 3], BasisError> {
        wrap_position(position, self.grid.layout().box_length())
    }

    fn sample_stencil(&self, position: [f64; 3]) -> Stencil {
        Stencil::new(
            self.grid.layout(),
            sampling_assignment(self.sampling),
            self.boundary,
            position,
        )
    }

    fn deposit_stencil(&self, position: [f64; 3]) -> Stencil {
        Stencil::new(self.grid.layout(), self.kernel, self.boundary, position)
    }

    /// Paints every Lagrangian field at the particles' final positions
    /// (collective). Returns one painted field per entry of `fields`, in order.
    pub fn paint_fields(
        &self,
        fields: &LagrangianFields,
        particles: &ParticleBatch,
    ) -> Result<Vec<PaintedField>, BasisError> {
        let comm = self.grid.comm();
        let layout = self.grid.layout();
        let size = comm.size();
        let kinds: Vec<BiasField> = fields.fields();
        let nfields = kinds.len();

        let total = comm.all_reduce_sum_u64("paint-count", &[particles.len() as u64])?[0];
        if total == 0 {
            return Err(BasisError::DataShape(ErrorInfo::new(
                "empty-catalogue",
                "the particle catalogue is empty",
            )));
        }

        // Round one: to the owner of the Lagrangian anchor.
        let mut outgoing: Vec<Vec<[f64; 6]>> = vec![Vec::new(); size];
        for (initial, last) in particles.initial().iter().zip(particles.final_positions()) {
            let initial = self.wrap(*initial)?;
            let last = self.wrap(*last)?;
            let owner = layout.real_owner(self.sample_stencil(initial).anchor);
            outgoing[owner].push([initial[0], initial[1], initial[2], last[0], last[1], last[2]]);
        }
        let arrived = comm.all_to_all("paint-lagrangian", outgoing)?;

        let halos = fields
            .iter()
            .map(|(_, values)| self.sample_plan.fill(self.grid, values))
            .collect::<Result<Vec<HaloField>, _>>()?;

        // Sample, then route (final position, values) to the deposit owner.
        let stride = 3 + nfields;
        let mut sums = vec![0.0; 2 * nfields + 1];
        let mut carried: Vec<Vec<f64>> = vec![Vec::new(); size];
        for record in arrived.iter().flatten() {
            let initial = [record[0], record[1], record[2]];
            let last = [record[3], record[4], record[5]];
            let stencil = self.sample_stencil(initial);
            let owner = layout.real_owner(self.deposit_stencil(last).anchor);
            let buffer = &mut carried[owner];
            buffer.extend_from_slice(&last);
            for (index, halo) in halos.iter().enumerate() {
                let mut value = 0.0;
                stencil.for_each(|delta, weight| value += weight * halo.value_around(stencil.anchor, delta));
                sums[index] += value;
                sums[nfields + index] += value * value;
                buffer.push(value);
            }
        }
        drop(halos);
        let delivered = comm.all_to_all("paint-eulerian", carried)?;

        let mut deposits = (0..nfields)
            .map(|_| self.deposit_plan.zeros("paint-deposit"))
            .collect::<Result<Vec<HaloField>, _>>()?;
        let mut received = 0usize;
        for buffer in &delivered {
            for record in buffer.chunks_exact(stride) {
                received += 1;
                let stencil = self.deposit_stencil([record[0], record[1], record[2]]);
                stencil.for_each(|delta, weight| {
                    for (deposit, value) in deposits.iter_mut().zip(&record[3..]) {
                        deposit.add_around(stencil.anchor, delta, weight * value);
                    }
                });
            }
        }
        drop(delivered);
        sums[2 * nfields] = received as f64;
        let sums = comm.all_reduce_sum("paint-sums", &sums)?;
        check_delivery(total, sums[2 * nfields])?;

        let mut painted = Vec::with_capacity(nfields);
        for (index, (deposit, field)) in deposits.into_iter().zip(kinds).enumerate() {
            let raw = self.deposit_plan.accumulate(self.grid, deposit)?;
            painted.push(self.normalise(
                PaintedKind::Basis(field),
                raw,
                total,
                sums[index],
                sums[nfields + index],
            )?);
        }
        if comm.is_root() {
            info!(
                particles = total,
                fields = nfields,
                kernel = ?self.kernel,
                sampling = ?self.sampling,
                "painted lagrangian fields"
            );
        }
        Ok(painted)
    }

    /// Paints a tracer catalogue with unit weights (collective).
    pub fn paint_tracers(&self, positions: &[[f64; 3]]) -> Result<PaintedField, BasisError> {
        let comm = self.grid.comm();
        let layout = self.grid.layout();
        let total = comm.all_reduce_sum_u64("tracer-count", &[positions.len() as u64])?[0];
        if total == 0 {
            return Err(BasisError::DataShape(ErrorInfo::new(
                "empty-tracers",
                "the tracer catalogue is empty",
            )));
        }
        let mut outgoing: Vec<Vec<[f64; 3]>> = vec![Vec::new(); comm.size()];
        for position in positions {
            let position = self.wrap(*position)?;
            outgoing[layout.real_owner(self.deposit_stencil(position).anchor)].push(position);
        }
        let delivered = comm.all_to_all("paint-tracers", outgoing)?;
        let mut deposit = self.deposit_plan.zeros("tracer-deposit")?;
        let mut received = 0usize;
        for position in delivered.iter().flatten() {
            received += 1;
            let stencil = self.deposit_stencil(*position);
            stencil.for_each(|delta, weight| deposit.add_around(stencil.anchor, delta, weight));
        }
        let arrived = comm.all_reduce_sum("tracer-delivered", &[received as f64])?[0];
        check_delivery(total, arrived)?;
        let raw = self.deposit_plan.accumulate(self.grid, deposit)?;
        if comm.is_root() {
            info!(tracers = total, "painted tracers");
        }
        self.normalise(PaintedKind::Tracer, raw, total, total as f64, total as f64)
    }

    fn normalise(
        &self,
        kind: PaintedKind,
        mut raw: RealField,
        particles: u64,
        weight_sum: f64,
        weight_sq_sum: f64,
    ) -> Result<PaintedField, BasisError> {
        let deposited_sum = self.grid.global_sum("paint-deposited", &raw)?;
        let scale = self.grid.layout().total_cells() as f64 / particles as f64;
        raw.values_mut().iter_mut().for_each(|value| *value *= scale);
        debug!(
            rank = self.grid.rank(),
            field = kind.label(),
            deposited_sum,
            weight_sum,
            "normalised painted field"
        );
        Ok(PaintedField {
            kind,
            density: raw,
            particles,
            weight_sum,
            weight_sq_sum,
            deposited_sum,
        })
    }
}

fn check_delivery(expected: u64, delivered: f64) -> Result<(), BasisError> {
    if delivered as u64 == expected {
        return Ok(());
    }
    Err(BasisError::Protocol(
        ErrorInfo::new("particles-lost", "particle routing delivered a different count")
            .with_context("expected", expected)
            .with_context("delivered", delivered),
    ))
}
