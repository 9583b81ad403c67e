//! Worker-local slices of the particle catalogue.

use std::ops::Range;

use basis_core::errors::{BasisError, ErrorInfo};

/// Particles held by one worker: a contiguous index range of the catalogue
/// with matching initial and final positions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticleBatch {
    initial: Vec<[f64; 3]>,
    final_positions: Vec<[f64; 3]>,
}

impl ParticleBatch {
    /// Pairs initial and final positions; both must describe the same particles.
    pub fn new(initial: Vec<[f64; 3]>, final_positions: Vec<[f64; 3]>) -> Result<Self, BasisError> {
        if initial.len() != final_positions.len() {
            return Err(BasisError::DataShape(
                ErrorInfo::new(
                    "catalogue-length",
                    "initial and final position arrays have different lengths",
                )
                .with_context("initial", initial.len())
                .with_context("final", final_positions.len()),
            ));
        }
        Ok(Self {
            initial,
            final_positions,
        })
    }

    /// Initial (Lagrangian) positions.
    pub fn initial(&self) -> &[[f64; 3]] {
        &self.initial
    }

    /// Final (Eulerian) positions.
    pub fn final_positions(&self) -> &[[f64; 3]] {
        &self.final_positions
    }

    /// Number of particles in the batch.
    pub fn len(&self) -> usize {
        self.initial.len()
    }

    /// True for a batch without particles.
    pub fn is_empty(&self) -> bool {
        self.initial.is_empty()
    }

    /// Maps final positions into redshift space: each particle moves along
    /// `axis` by `growth_rate` times its displacement component, taken as the
    /// nearest periodic image, and is wrapped back into the box.
    pub fn shift_to_redshift_space(&mut self, box_length: f64, axis: usize, growth_rate: f64) {
        for (initial, target) in self.initial.iter().zip(self.final_positions.iter_mut()) {
            let mut displacement = target[axis] - initial[axis];
            displacement -= box_length * (displacement / box_length).round();
            target[axis] = (target[axis] + growth_rate * displacement).rem_euclid(box_length);
        }
    }
}

/// Contiguous share of `total` items assigned to `rank` out of `workers`.
/// The first `total % workers` workers take one extra item.
pub fn partition(total: usize, workers: usize, rank: usize) -> Range<usize> {
    let base = total / workers;
    let extra = total % workers;
    let start = rank * base + rank.min(extra);
    let len = base + usize::from(rank < extra);
    start..start + len
}

/// Lattice position of particle `index` on a `side^3` lattice, in C order.
pub fn lattice_position(index: usize, side: usize, box_length: f64) -> [f64; 3] {
    let spacing = box_length / side as f64;
    let x = index / (side * side);
    let y = (index / side) % side;
    let z = index % side;
    [x as f64 * spacing, y as f64 * spacing, z as f64 * spacing]
}

/// Lattice positions for an index range.
pub fn lattice_positions(range: Range<usize>, side: usize, box_length: f64) -> Vec<[f64; 3]> {
    range
        .map(|index| lattice_position(index, side, box_length))
        .collect()
}
