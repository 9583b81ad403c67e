//! Process grids, block layouts and ownership rules.

use std::f64::consts::PI;

use basis_core::config::RunConfig;
use basis_core::errors::{BasisError, ErrorInfo};
use serde::{Deserialize, Serialize};

/// Two-dimensional arrangement of workers, `p0 x p1`.
///
/// Worker `rank` sits at `(rank / p1, rank % p1)`. A slab decomposition is
/// the special case `p1 == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessGrid {
    p0: usize,
    p1: usize,
}

impl ProcessGrid {
    /// Slab decomposition over `workers` workers.
    pub fn slab(workers: usize) -> Self {
        Self { p0: workers, p1: 1 }
    }

    /// Pencil decomposition with an explicit `p0 x p1` arrangement.
    pub fn pencil(p0: usize, p1: usize) -> Self {
        Self { p0, p1 }
    }

    /// Picks the layout for a run: the explicit arrangement when given,
    /// otherwise a slab. Fails unless the arrangement covers exactly
    /// `workers` workers and both factors divide `nmesh`.
    pub fn choose(
        workers: usize,
        nmesh: usize,
        explicit: Option<[usize; 2]>,
    ) -> Result<Self, BasisError> {
        let grid = match explicit {
            Some([p0, p1]) => Self::pencil(p0, p1),
            None => Self::slab(workers),
        };
        if grid.p0 == 0 || grid.p1 == 0 || grid.workers() != workers {
            return Err(BasisError::Configuration(
                ErrorInfo::new(
                    "process-grid-size",
                    "process grid does not match the number of workers",
                )
                .with_context("p0", grid.p0)
                .with_context("p1", grid.p1)
                .with_context("workers", workers),
            ));
        }
        for (axis, parts) in [("p0", grid.p0), ("p1", grid.p1)] {
            if nmesh % parts != 0 {
                return Err(BasisError::Configuration(
                    ErrorInfo::new(
                        "indivisible-grid",
                        "grid resolution is not divisible by the workers along a decomposed axis",
                    )
                    .with_context("nmesh", nmesh)
                    .with_context(axis, parts)
                    .with_hint("choose nmesh as a multiple of the process grid factors"),
                ));
            }
        }
        Ok(grid)
    }

    /// Number of workers covered by the arrangement.
    pub fn workers(&self) -> usize {
        self.p0 * self.p1
    }

    /// Factors `[p0, p1]`.
    pub fn dims(&self) -> [usize; 2] {
        [self.p0, self.p1]
    }

    /// Process-grid coordinates of `rank`.
    pub fn coords(&self, rank: usize) -> (usize, usize) {
        (rank / self.p1, rank % self.p1)
    }

    /// Rank at process-grid coordinates `(r0, r1)`.
    pub fn rank_of(&self, r0: usize, r1: usize) -> usize {
        r0 * self.p1 + r1
    }
}

/// Box of global indices `lo..hi` along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Inclusive lower corner.
    pub lo: [usize; 3],
    /// Exclusive upper corner.
    pub hi: [usize; 3],
}

impl Region {
    /// Number of points inside the region.
    pub fn volume(&self) -> usize {
        (0..3).map(|axis| self.hi[axis] - self.lo[axis]).product()
    }

    /// Visits every point in x-major, z-fastest order.
    pub fn for_each(&self, mut visit: impl FnMut([usize; 3])) {
        for x in self.lo[0]..self.hi[0] {
            for y in self.lo[1]..self.hi[1] {
                for z in self.lo[2]..self.hi[2] {
                    visit([x, y, z]);
                }
            }
        }
    }
}

/// Contiguous box of the global grid held by one worker, with the axis order
/// (slowest to fastest) of its memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Global index of the first point along each axis.
    pub start: [usize; 3],
    /// Extent along each axis.
    pub shape: [usize; 3],
    order: [usize; 3],
}

impl Block {
    /// Row-major block (`x` slowest, `z` fastest).
    pub fn row_major(start: [usize; 3], shape: [usize; 3]) -> Self {
        Self::with_order(start, shape, [0, 1, 2])
    }

    pub(crate) fn with_order(start: [usize; 3], shape: [usize; 3], order: [usize; 3]) -> Self {
        Self {
            start,
            shape,
            order,
        }
    }

    /// Number of points in the block.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// True for a block without points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Axis order of the memory layout, slowest first.
    pub fn order(&self) -> [usize; 3] {
        self.order
    }

    /// Whether the global point lies inside the block.
    pub fn contains(&self, global: [usize; 3]) -> bool {
        (0..3).all(|axis| {
            global[axis] >= self.start[axis] && global[axis] < self.start[axis] + self.shape[axis]
        })
    }

    /// Memory offset of a global point inside the block.
    pub fn offset(&self, global: [usize; 3]) -> usize {
        let [a, b, c] = self.order;
        let local = [
            global[0] - self.start[0],
            global[1] - self.start[1],
            global[2] - self.start[2],
        ];
        (local[a] * self.shape[b] + local[b]) * self.shape[c] + local[c]
    }

    /// Global point stored at a memory offset.
    pub fn global_index(&self, offset: usize) -> [usize; 3] {
        let [a, b, c] = self.order;
        let mut local = [0usize; 3];
        local[c] = offset % self.shape[c];
        let rest = offset / self.shape[c];
        local[b] = rest % self.shape[b];
        local[a] = rest / self.shape[b];
        [
            self.start[0] + local[0],
            self.start[1] + local[1],
            self.start[2] + local[2],
        ]
    }

    /// Region covered by both blocks, if any.
    pub fn intersect(&self, other: &Block) -> Option<Region> {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for axis in 0..3 {
            lo[axis] = self.start[axis].max(other.start[axis]);
            hi[axis] = (self.start[axis] + self.shape[axis]).min(other.start[axis] + other.shape[axis]);
            if lo[axis] >= hi[axis] {
                return None;
            }
        }
        Some(Region { lo, hi })
    }

    /// Whole block as a region.
    pub fn region(&self) -> Region {
        Region {
            lo: self.start,
            hi: [
                self.start[0] + self.shape[0],
                self.start[1] + self.shape[1],
                self.start[2] + self.shape[2],
            ],
        }
    }
}

/// Explicit description of the distributed grid for one pipeline run.
///
/// Real-space blocks are `x`-chunked over `p0` and `y`-chunked over `p1`
/// with `z` local. Fourier-space blocks keep `x` local, chunk `y` over `p0`
/// and `z` over `p1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    nmesh: usize,
    box_length: f64,
    process_grid: ProcessGrid,
}

impl GridLayout {
    /// Validates and creates a layout.
    pub fn new(nmesh: usize, box_length: f64, process_grid: ProcessGrid) -> Result<Self, BasisError> {
        if nmesh == 0 {
            return Err(BasisError::configuration("invalid-nmesh", "nmesh must be positive"));
        }
        if !(box_length.is_finite() && box_length > 0.0) {
            return Err(BasisError::configuration(
                "invalid-box-length",
                "box_length must be finite and positive",
            ));
        }
        let process_grid =
            ProcessGrid::choose(process_grid.workers(), nmesh, Some(process_grid.dims()))?;
        Ok(Self {
            nmesh,
            box_length,
            process_grid,
        })
    }

    /// Layout described by a run configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self, BasisError> {
        let grid = ProcessGrid::choose(config.workers, config.nmesh, config.process_grid)?;
        Self::new(config.nmesh, config.box_length, grid)
    }

    /// Points per side.
    pub fn nmesh(&self) -> usize {
        self.nmesh
    }

    /// Side length of the periodic box.
    pub fn box_length(&self) -> f64 {
        self.box_length
    }

    /// Box volume.
    pub fn box_volume(&self) -> f64 {
        self.box_length.powi(3)
    }

    /// Distance between neighbouring grid points.
    pub fn cell_size(&self) -> f64 {
        self.box_length / self.nmesh as f64
    }

    /// Total number of grid points.
    pub fn total_cells(&self) -> usize {
        self.nmesh.pow(3)
    }

    /// Fundamental wavenumber `2 pi / L`.
    pub fn fundamental_k(&self) -> f64 {
        2.0 * PI / self.box_length
    }

    /// Nyquist wavenumber `pi N / L`.
    pub fn nyquist_k(&self) -> f64 {
        PI * self.nmesh as f64 / self.box_length
    }

    /// Worker arrangement.
    pub fn process_grid(&self) -> ProcessGrid {
        self.process_grid
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.process_grid.workers()
    }

    fn chunks(&self) -> (usize, usize) {
        let [p0, p1] = self.process_grid.dims();
        (self.nmesh / p0, self.nmesh / p1)
    }

    /// Real-space block of `rank`.
    pub fn real_block(&self, rank: usize) -> Block {
        let (r0, r1) = self.process_grid.coords(rank);
        let (c0, c1) = self.chunks();
        Block::row_major([r0 * c0, r1 * c1, 0], [c0, c1, self.nmesh])
    }

    /// Fourier-space block of `rank`.
    pub fn fourier_block(&self, rank: usize) -> Block {
        let (r0, r1) = self.process_grid.coords(rank);
        let (c0, c1) = self.chunks();
        Block::row_major([0, r0 * c0, r1 * c1], [self.nmesh, c0, c1])
    }

    /// Intermediate layout with `y` contiguous.
    pub(crate) fn y_pencil(&self, rank: usize) -> Block {
        let (r0, r1) = self.process_grid.coords(rank);
        let (c0, c1) = self.chunks();
        Block::with_order([r0 * c0, 0, r1 * c1], [c0, self.nmesh, c1], [0, 2, 1])
    }

    /// Intermediate layout with `x` contiguous.
    pub(crate) fn x_pencil(&self, rank: usize) -> Block {
        let (r0, r1) = self.process_grid.coords(rank);
        let (c0, c1) = self.chunks();
        Block::with_order([0, r0 * c0, r1 * c1], [self.nmesh, c0, c1], [1, 2, 0])
    }

    /// Worker whose real-space block contains the global point.
    pub fn real_owner(&self, global: [usize; 3]) -> usize {
        let (c0, c1) = self.chunks();
        self.process_grid.rank_of(global[0] / c0, global[1] / c1)
    }

    /// Signed frequency index in FFT ordering (`0, 1, .., -2, -1`).
    pub fn frequency(&self, index: usize) -> i64 {
        let n = self.nmesh as i64;
        let i = index as i64;
        if i < (n + 1) / 2 {
            i
        } else {
            i - n
        }
    }

    /// Wavenumber along one axis for a Fourier index.
    pub fn wavenumber(&self, index: usize) -> f64 {
        self.fundamental_k() * self.frequency(index) as f64
    }

    /// Wavevector of a global Fourier index.
    pub fn kvector(&self, global: [usize; 3]) -> [f64; 3] {
        [
            self.wavenumber(global[0]),
            self.wavenumber(global[1]),
            self.wavenumber(global[2]),
        ]
    }

    /// Wraps a signed cell index into `0..nmesh`.
    pub fn wrap_index(&self, index: i64) -> usize {
        index.rem_euclid(self.nmesh as i64) as usize
    }
}
