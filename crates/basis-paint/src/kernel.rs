//! Mass-assignment and interpolation stencils.
//!
//! Positions are measured in cell units `u = x / H`. A stencil is anchored at
//! a grid cell and lists weights for a short run of neighbouring cells along
//! each axis. Cell `c` sits at `u = c`.

use basis_core::config::{BoundaryOwner, MassAssignment, SampleKernel};
use basis_core::errors::{BasisError, ErrorInfo};
use basis_grid::{GridLayout, HaloWidth};

/// Weights along one axis: `weights[i]` belongs to cell `anchor + first + i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisStencil {
    /// Anchor cell before periodic wrapping.
    pub anchor: i64,
    /// Offset of the first weighted cell relative to the anchor.
    pub first: i64,
    /// Weights; only the first `len` entries are used.
    pub weights: [f64; 3],
    /// Number of weighted cells.
    pub len: usize,
}

/// Rounds to the nearest cell; exact half-way points go to the configured side.
fn nearest_cell(u: f64, boundary: BoundaryOwner) -> i64 {
    match boundary {
        BoundaryOwner::Right => (u + 0.5).floor() as i64,
        BoundaryOwner::Left => (u - 0.5).ceil() as i64,
    }
}

/// Cell whose lower face lies at or below `u`; positions exactly on a face go
/// to the configured side.
fn lower_cell(u: f64, boundary: BoundaryOwner) -> i64 {
    match boundary {
        BoundaryOwner::Right => u.floor() as i64,
        BoundaryOwner::Left => u.ceil() as i64 - 1,
    }
}

/// Stencil along one axis for a position in cell units.
pub fn axis_stencil(kernel: MassAssignment, u: f64, boundary: BoundaryOwner) -> AxisStencil {
    match kernel {
        MassAssignment::Ngp => AxisStencil {
            anchor: nearest_cell(u, boundary),
            first: 0,
            weights: [1.0, 0.0, 0.0],
            len: 1,
        },
        MassAssignment::Cic => {
            let anchor = lower_cell(u, boundary);
            let d = u - anchor as f64;
            AxisStencil {
                anchor,
                first: 0,
                weights: [1.0 - d, d, 0.0],
                len: 2,
            }
        }
        MassAssignment::Tsc => {
            let anchor = nearest_cell(u, boundary);
            let d = u - anchor as f64;
            AxisStencil {
                anchor,
                first: -1,
                weights: [
                    0.5 * (0.5 - d) * (0.5 - d),
                    0.75 - d * d,
                    0.5 * (0.5 + d) * (0.5 + d),
                ],
                len: 3,
            }
        }
    }
}

/// Deposit kernel equivalent to an interpolation kernel.
pub fn sampling_assignment(kernel: SampleKernel) -> MassAssignment {
    match kernel {
        SampleKernel::Nearest => MassAssignment::Ngp,
        SampleKernel::Trilinear => MassAssignment::Cic,
    }
}

/// Ghost widths a kernel reaches beyond its anchor.
pub fn halo_width(kernel: MassAssignment) -> HaloWidth {
    match kernel {
        MassAssignment::Ngp => HaloWidth::new(0, 0),
        MassAssignment::Cic => HaloWidth::new(0, 1),
        MassAssignment::Tsc => HaloWidth::new(1, 1),
    }
}

/// Three-dimensional stencil around a wrapped anchor cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stencil {
    /// Anchor cell, wrapped into the grid.
    pub anchor: [usize; 3],
    axes: [AxisStencil; 3],
}

impl Stencil {
    /// Builds the stencil of a wrapped position.
    pub fn new(
        layout: &GridLayout,
        kernel: MassAssignment,
        boundary: BoundaryOwner,
        position: [f64; 3],
    ) -> Self {
        let h = layout.cell_size();
        let axes = [0, 1, 2].map(|axis| axis_stencil(kernel, position[axis] / h, boundary));
        let anchor = [0, 1, 2].map(|axis| layout.wrap_index(axes[axis].anchor));
        Self { anchor, axes }
    }

    /// Visits every `(offset from anchor, weight)` pair.
    pub fn for_each(&self, mut visit: impl FnMut([i64; 3], f64)) {
        let [ax, ay, az] = &self.axes;
        for i in 0..ax.len {
            for j in 0..ay.len {
                let wxy = ax.weights[i] * ay.weights[j];
                for k in 0..az.len {
                    let delta = [ax.first + i as i64, ay.first + j as i64, az.first + k as i64];
                    visit(delta, wxy * az.weights[k]);
                }
            }
        }
    }
}

/// Wraps a coordinate into `[0, L)`.
pub fn wrap_coordinate(x: f64, box_length: f64) -> f64 {
    let wrapped = x.rem_euclid(box_length);
    // rem_euclid may round tiny negative inputs up to exactly L.
    if wrapped >= box_length {
        0.0
    } else {
        wrapped
    }
}

/// Wraps a position into the periodic box; non-finite coordinates are an error.
pub fn wrap_position(position: [f64; 3], box_length: f64) -> Result<[f64; 3], BasisError> {
    if position.iter().any(|x| !x.is_finite()) {
        return Err(BasisError::NumericDivergence(
            ErrorInfo::new("non-finite-position", "particle position is not finite")
                .with_context("x", position[0])
                .with_context("y", position[1])
                .with_context("z", position[2]),
        ));
    }
    Ok(position.map(|x| wrap_coordinate(x, box_length)))
}
