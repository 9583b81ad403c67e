//! Ghost-cell exchange for local stencils near block edges.
//!
//! A worker's real block is padded by `lo` cells below and `hi` cells above
//! along `x` and `y`; `z` is never decomposed and wraps locally. Ghost cells
//! map periodically onto cells owned by other workers (or by the worker
//! itself when a layout has a single chunk along an axis).

use basis_core::errors::{try_alloc, BasisError, ErrorInfo};
use tracing::debug;

use crate::fft::{DomainGrid, RealField};
use crate::layout::{Block, GridLayout};

/// Ghost widths below and above the block along the decomposed axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaloWidth {
    /// Cells below the block.
    pub lo: usize,
    /// Cells above the block.
    pub hi: usize,
}

impl HaloWidth {
    /// Widths `(lo, hi)`.
    pub const fn new(lo: usize, hi: usize) -> Self {
        Self { lo, hi }
    }
}

/// Real-space block padded with ghost cells.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloField {
    start: [usize; 3],
    width: HaloWidth,
    nmesh: usize,
    shape: [usize; 3],
    values: Vec<f64>,
}

impl HaloField {
    /// Extended shape `[nx + lo + hi, ny + lo + hi, N]`.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Values in row-major extended order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Offset of the cell displaced by `delta` from an owned `anchor`.
    ///
    /// `delta[0]` and `delta[1]` must lie in `-lo..=hi`; `delta[2]` is
    /// unrestricted because `z` wraps locally.
    pub fn offset_around(&self, anchor: [usize; 3], delta: [i64; 3]) -> usize {
        let lo = self.width.lo as i64;
        let ex = (anchor[0] - self.start[0]) as i64 + lo + delta[0];
        let ey = (anchor[1] - self.start[1]) as i64 + lo + delta[1];
        let ez = (anchor[2] as i64 + delta[2]).rem_euclid(self.nmesh as i64);
        debug_assert!(ex >= 0 && (ex as usize) < self.shape[0]);
        debug_assert!(ey >= 0 && (ey as usize) < self.shape[1]);
        (ex as usize * self.shape[1] + ey as usize) * self.shape[2] + ez as usize
    }

    /// Value displaced by `delta` from an owned `anchor`.
    pub fn value_around(&self, anchor: [usize; 3], delta: [i64; 3]) -> f64 {
        self.values[self.offset_around(anchor, delta)]
    }

    /// Adds `amount` to the cell displaced by `delta` from an owned `anchor`.
    pub fn add_around(&mut self, anchor: [usize; 3], delta: [i64; 3], amount: f64) {
        let offset = self.offset_around(anchor, delta);
        self.values[offset] += amount;
    }

    fn interior_offset(&self, local: [usize; 3]) -> usize {
        let lo = self.width.lo;
        ((local[0] + lo) * self.shape[1] + local[1] + lo) * self.shape[2] + local[2]
    }
}

/// Exchange plan for one ghost width on one worker.
#[derive(Debug, Clone)]
pub struct HaloPlan {
    block: Block,
    width: HaloWidth,
    nmesh: usize,
    shape: [usize; 3],
    /// Extended offsets of my ghosts, grouped by owning worker.
    ghosts: Vec<Vec<usize>>,
    /// Block offsets of my cells that each worker holds as ghosts.
    serve: Vec<Vec<usize>>,
}

impl HaloPlan {
    /// Builds the plan (collective): every worker lists the global cells behind
    /// its ghosts and sends the list to their owners.
    pub fn build(grid: &DomainGrid<'_>, width: HaloWidth) -> Result<Self, BasisError> {
        let layout: &GridLayout = grid.layout();
        let comm = grid.comm();
        let size = comm.size();
        let block = grid.real_block();
        let nmesh = layout.nmesh();
        let pad = width.lo + width.hi;
        let shape = [block.shape[0] + pad, block.shape[1] + pad, nmesh];

        let mut ghosts: Vec<Vec<usize>> = vec![Vec::new(); size];
        let mut requests: Vec<Vec<[usize; 3]>> = vec![Vec::new(); size];
        let interior = |e: usize, n: usize| e >= width.lo && e < width.lo + n;
        for ex in 0..shape[0] {
            for ey in 0..shape[1] {
                if interior(ex, block.shape[0]) && interior(ey, block.shape[1]) {
                    continue;
                }
                let gx = layout.wrap_index(block.start[0] as i64 + ex as i64 - width.lo as i64);
                let gy = layout.wrap_index(block.start[1] as i64 + ey as i64 - width.lo as i64);
                for z in 0..nmesh {
                    let global = [gx, gy, z];
                    let owner = layout.real_owner(global);
                    ghosts[owner].push((ex * shape[1] + ey) * shape[2] + z);
                    requests[owner].push(global);
                }
            }
        }

        let received = comm.all_to_all("halo-plan", requests)?;
        let mut serve = Vec::with_capacity(size);
        for (src, wanted) in received.into_iter().enumerate() {
            let mut offsets = Vec::with_capacity(wanted.len());
            for global in wanted {
                if !block.contains(global) {
                    return Err(BasisError::Protocol(
                        ErrorInfo::new("halo-owner", "ghost request routed to the wrong worker")
                            .with_context("requester", src)
                            .with_context("x", global[0])
                            .with_context("y", global[1])
                            .with_context("z", global[2]),
                    ));
                }
                offsets.push(block.offset(global));
            }
            serve.push(offsets);
        }
        debug!(
            rank = comm.rank(),
            lo = width.lo,
            hi = width.hi,
            ghosts = ghosts.iter().map(Vec::len).sum::<usize>(),
            "halo plan built"
        );
        Ok(Self {
            block,
            width,
            nmesh,
            shape,
            ghosts,
            serve,
        })
    }

    /// Ghost widths of the plan.
    pub fn width(&self) -> HaloWidth {
        self.width
    }

    /// Zero-filled extended field.
    pub fn zeros(&self, stage: &str) -> Result<HaloField, BasisError> {
        Ok(HaloField {
            start: self.block.start,
            width: self.width,
            nmesh: self.nmesh,
            shape: self.shape,
            values: try_alloc(self.shape.iter().product(), stage)?,
        })
    }

    /// Copies `field` into an extended field and fills its ghosts from their
    /// owners (collective).
    pub fn fill(&self, grid: &DomainGrid<'_>, field: &RealField) -> Result<HaloField, BasisError> {
        let mut halo = self.zeros("halo-fill")?;
        let block = *field.block();
        for (offset, value) in field.values().iter().enumerate() {
            let g = block.global_index(offset);
            let local = [g[0] - block.start[0], g[1] - block.start[1], g[2]];
            let at = halo.interior_offset(local);
            halo.values[at] = *value;
        }
        let outgoing: Vec<Vec<f64>> = self
            .serve
            .iter()
            .map(|offsets| offsets.iter().map(|&o| field.values()[o]).collect())
            .collect();
        let incoming = grid.comm().all_to_all("halo-fill", outgoing)?;
        for (owner, values) in incoming.into_iter().enumerate() {
            self.check_len("halo-fill", owner, self.ghosts[owner].len(), values.len())?;
            for (&at, value) in self.ghosts[owner].iter().zip(values) {
                halo.values[at] = value;
            }
        }
        Ok(halo)
    }

    /// Folds ghost contributions back onto their owners (collective) and
    /// returns the owned block. Contributions are added in rank order.
    pub fn accumulate(&self, grid: &DomainGrid<'_>, halo: HaloField) -> Result<RealField, BasisError> {
        let outgoing: Vec<Vec<f64>> = self
            .ghosts
            .iter()
            .map(|offsets| offsets.iter().map(|&o| halo.values[o]).collect())
            .collect();
        let incoming = grid.comm().all_to_all("halo-accumulate", outgoing)?;

        let mut field = grid.zeros("halo-accumulate")?;
        let block = self.block;
        field.map_indexed(|g, _| {
            let local = [g[0] - block.start[0], g[1] - block.start[1], g[2]];
            halo.values[halo.interior_offset(local)]
        });
        for (src, values) in incoming.into_iter().enumerate() {
            self.check_len("halo-accumulate", src, self.serve[src].len(), values.len())?;
            let target = field.values_mut();
            for (&at, value) in self.serve[src].iter().zip(values) {
                target[at] += value;
            }
        }
        Ok(field)
    }

    fn check_len(&self, label: &str, src: usize, expected: usize, received: usize) -> Result<(), BasisError> {
        if expected == received {
            return Ok(());
        }
        Err(BasisError::Protocol(
            ErrorInfo::new("halo-length", "ghost exchange size mismatch")
                .with_context("label", label)
                .with_context("source_rank", src)
                .with_context("expected", expected)
                .with_context("received", received),
        ))
    }
}
