//! Distributed three-dimensional Fourier transforms.
//!
//! Real-space data lives in row-major blocks with `z` local. A forward
//! transform runs the `z` FFT in place, transposes into `y` pencils, runs the
//! `y` FFT, transposes into `x` pencils, runs the `x` FFT and finally reorders
//! the pencil locally into the row-major Fourier block. The inverse retraces
//! the same steps backwards.

use std::cell::RefCell;
use std::sync::Arc;

use basis_comm::Communicator;
use basis_core::errors::{try_alloc, BasisError, ErrorInfo};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::{debug, trace};

use crate::layout::{Block, GridLayout};

/// Double-precision complex amplitude.
pub type Complex64 = Complex<f64>;

/// Worker-local part of a real-space grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RealField {
    block: Block,
    values: Vec<f64>,
}

impl RealField {
    /// Wraps existing values; fails when the length disagrees with the block.
    pub fn from_values(block: Block, values: Vec<f64>) -> Result<Self, BasisError> {
        if values.len() != block.len() {
            return Err(BasisError::DataShape(
                ErrorInfo::new("block-length", "values do not fill the worker block")
                    .with_context("expected", block.len())
                    .with_context("received", values.len()),
            ));
        }
        Ok(Self { block, values })
    }

    /// Block described by this field.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Values in block memory order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mutable values in block memory order.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Consumes the field and returns its values.
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Value at a global grid point owned by this worker.
    pub fn get(&self, global: [usize; 3]) -> Option<f64> {
        self.block
            .contains(global)
            .then(|| self.values[self.block.offset(global)])
    }

    /// Applies `f` to every value together with its global index.
    pub fn map_indexed(&mut self, mut f: impl FnMut([usize; 3], f64) -> f64) {
        let block = self.block;
        for (offset, value) in self.values.iter_mut().enumerate() {
            *value = f(block.global_index(offset), *value);
        }
    }

    /// Process-local portion together with the offsets needed to recover
    /// physical coordinates.
    pub fn local_slice<'a>(&'a self, layout: &GridLayout) -> LocalSlice<'a> {
        LocalSlice {
            offset: self.block.start,
            shape: self.block.shape,
            cell_size: layout.cell_size(),
            values: &self.values,
        }
    }
}

/// Borrowed view of the worker-local part of a real-space grid.
#[derive(Debug, Clone, Copy)]
pub struct LocalSlice<'a> {
    /// Global index of the first local point.
    pub offset: [usize; 3],
    /// Local extent along each axis.
    pub shape: [usize; 3],
    /// Grid spacing.
    pub cell_size: f64,
    /// Values in row-major order.
    pub values: &'a [f64],
}

impl LocalSlice<'_> {
    /// Physical coordinates of a local index.
    pub fn position(&self, local: [usize; 3]) -> [f64; 3] {
        [
            (self.offset[0] + local[0]) as f64 * self.cell_size,
            (self.offset[1] + local[1]) as f64 * self.cell_size,
            (self.offset[2] + local[2]) as f64 * self.cell_size,
        ]
    }
}

/// Worker-local part of a Fourier-space grid.
#[derive(Debug, Clone, PartialEq)]
pub struct FourierField {
    block: Block,
    modes: Vec<Complex64>,
}

impl FourierField {
    /// Block described by this field.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Modes in row-major block order.
    pub fn modes(&self) -> &[Complex64] {
        &self.modes
    }

    /// Mutable modes in row-major block order.
    pub fn modes_mut(&mut self) -> &mut [Complex64] {
        &mut self.modes
    }

    /// Mode at a global Fourier index owned by this worker.
    pub fn get(&self, global: [usize; 3]) -> Option<Complex64> {
        self.block
            .contains(global)
            .then(|| self.modes[self.block.offset(global)])
    }

    /// Replaces every mode by `f(k, mode)`.
    pub fn map_modes(&mut self, layout: &GridLayout, mut f: impl FnMut([f64; 3], Complex64) -> Complex64) {
        let block = self.block;
        for (offset, mode) in self.modes.iter_mut().enumerate() {
            *mode = f(layout.kvector(block.global_index(offset)), *mode);
        }
    }

    /// Copy with every mode replaced by `f(k, mode)`.
    pub fn filtered(
        &self,
        layout: &GridLayout,
        f: impl FnMut([f64; 3], Complex64) -> Complex64,
    ) -> Self {
        let mut out = self.clone();
        out.map_modes(layout, f);
        out
    }

    /// Wavevectors of the local modes, in block order.
    pub fn kvectors<'a>(&'a self, layout: &'a GridLayout) -> impl Iterator<Item = [f64; 3]> + 'a {
        (0..self.block.len()).map(move |offset| layout.kvector(self.block.global_index(offset)))
    }
}

/// Which FFT direction a plan computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Inverse,
}

/// The decomposed grid of one worker: layout, communicator and FFT plans.
pub struct DomainGrid<'c> {
    layout: GridLayout,
    comm: &'c Communicator,
    planner: RefCell<FftPlanner<f64>>,
}

impl std::fmt::Debug for DomainGrid<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainGrid")
            .field("layout", &self.layout)
            .field("rank", &self.comm.rank())
            .finish()
    }
}

impl<'c> DomainGrid<'c> {
    /// Binds a layout to the worker's communicator. Fails when the group size
    /// differs from the layout's worker count.
    pub fn new(layout: GridLayout, comm: &'c Communicator) -> Result<Self, BasisError> {
        if comm.size() != layout.workers() {
            return Err(BasisError::Configuration(
                ErrorInfo::new("layout-workers", "layout and worker group disagree on size")
                    .with_context("layout_workers", layout.workers())
                    .with_context("group_size", comm.size()),
            ));
        }
        Ok(Self {
            layout,
            comm,
            planner: RefCell::new(FftPlanner::new()),
        })
    }

    /// Grid layout.
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Communicator of this worker.
    pub fn comm(&self) -> &'c Communicator {
        self.comm
    }

    /// Rank of this worker.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Real-space block of this worker.
    pub fn real_block(&self) -> Block {
        self.layout.real_block(self.rank())
    }

    /// Fourier-space block of this worker.
    pub fn fourier_block(&self) -> Block {
        self.layout.fourier_block(self.rank())
    }

    /// Zero-filled real-space field.
    pub fn zeros(&self, stage: &str) -> Result<RealField, BasisError> {
        let block = self.real_block();
        Ok(RealField {
            block,
            values: try_alloc(block.len(), stage)?,
        })
    }

    /// Real-space field with `f(global index)` at every point.
    pub fn real_from_fn(
        &self,
        stage: &str,
        mut f: impl FnMut([usize; 3]) -> f64,
    ) -> Result<RealField, BasisError> {
        let mut field = self.zeros(stage)?;
        field.map_indexed(|global, _| f(global));
        Ok(field)
    }

    /// Sum over the whole global grid (collective).
    pub fn global_sum(&self, label: &str, field: &RealField) -> Result<f64, BasisError> {
        let local: f64 = field.values.iter().sum();
        Ok(self.comm.all_reduce_sum(label, &[local])?[0])
    }

    /// Mean over the whole global grid (collective).
    pub fn global_mean(&self, label: &str, field: &RealField) -> Result<f64, BasisError> {
        Ok(self.global_sum(label, field)? / self.layout.total_cells() as f64)
    }

    /// Real-space to Fourier-space transform (collective), normalised by `1/N^3`.
    pub fn forward_transform(&self, field: RealField) -> Result<FourierField, BasisError> {
        let rank = self.rank();
        let n = self.layout.nmesh();
        trace!(rank, "forward transform");
        let mut data = to_complex(field.values, "forward-transform")?;
        self.fft(Direction::Forward, &mut data);
        let mut data = self.redistribute(
            "fft-forward-zy",
            data,
            |r| self.layout.real_block(r),
            |r| self.layout.y_pencil(r),
        )?;
        self.fft(Direction::Forward, &mut data);
        let mut data = self.redistribute(
            "fft-forward-yx",
            data,
            |r| self.layout.y_pencil(r),
            |r| self.layout.x_pencil(r),
        )?;
        self.fft(Direction::Forward, &mut data);

        let target = self.fourier_block();
        let mut modes = permute(&self.layout.x_pencil(rank), &target, &data, "forward-transform")?;
        let scale = 1.0 / (n as f64).powi(3);
        for mode in &mut modes {
            *mode *= scale;
        }
        Ok(FourierField {
            block: target,
            modes,
        })
    }

    /// Fourier-space to real-space transform (collective), unnormalised. Only
    /// the real part is kept.
    pub fn inverse_transform(&self, field: FourierField) -> Result<RealField, BasisError> {
        let rank = self.rank();
        trace!(rank, "inverse transform");
        let mut data = permute(
            &field.block,
            &self.layout.x_pencil(rank),
            &field.modes,
            "inverse-transform",
        )?;
        drop(field);
        self.fft(Direction::Inverse, &mut data);
        let mut data = self.redistribute(
            "fft-inverse-xy",
            data,
            |r| self.layout.x_pencil(r),
            |r| self.layout.y_pencil(r),
        )?;
        self.fft(Direction::Inverse, &mut data);
        let mut data = self.redistribute(
            "fft-inverse-yz",
            data,
            |r| self.layout.y_pencil(r),
            |r| self.layout.real_block(r),
        )?;
        self.fft(Direction::Inverse, &mut data);
        Ok(RealField {
            block: self.real_block(),
            values: data.into_iter().map(|c| c.re).collect(),
        })
    }

    fn plan(&self, direction: Direction) -> Arc<dyn Fft<f64>> {
        let mut planner = self.planner.borrow_mut();
        match direction {
            Direction::Forward => planner.plan_fft_forward(self.layout.nmesh()),
            Direction::Inverse => planner.plan_fft_inverse(self.layout.nmesh()),
        }
    }

    /// Transforms every contiguous line of length `N`; every intermediate
    /// layout keeps the transform axis fastest.
    fn fft(&self, direction: Direction, data: &mut [Complex64]) {
        if data.is_empty() {
            return;
        }
        self.plan(direction).process(data);
    }

    /// Moves data from the `from` layout to the `to` layout (collective).
    ///
    /// Each worker packs the intersection of its `from` block with every
    /// worker's `to` block in x-major order, and unpacks in the same order.
    pub(crate) fn redistribute(
        &self,
        label: &str,
        data: Vec<Complex64>,
        from: impl Fn(usize) -> Block,
        to: impl Fn(usize) -> Block,
    ) -> Result<Vec<Complex64>, BasisError> {
        let rank = self.rank();
        let size = self.comm.size();
        let mine_from = from(rank);
        let mine_to = to(rank);

        let outgoing: Vec<Vec<Complex64>> = (0..size)
            .map(|dst| match mine_from.intersect(&to(dst)) {
                Some(region) => {
                    let mut buffer = Vec::with_capacity(region.volume());
                    region.for_each(|g| buffer.push(data[mine_from.offset(g)]));
                    buffer
                }
                None => Vec::new(),
            })
            .collect();
        drop(data);

        let incoming = self.comm.all_to_all(label, outgoing)?;
        let mut out: Vec<Complex64> = try_alloc(mine_to.len(), label)?;
        for (src, buffer) in incoming.into_iter().enumerate() {
            let Some(region) = from(src).intersect(&mine_to) else {
                continue;
            };
            if buffer.len() != region.volume() {
                return Err(BasisError::Protocol(
                    ErrorInfo::new("transpose-length", "received block of unexpected size")
                        .with_context("label", label)
                        .with_context("source_rank", src)
                        .with_context("expected", region.volume())
                        .with_context("received", buffer.len()),
                ));
            }
            let mut values = buffer.into_iter();
            region.for_each(|g| {
                if let Some(value) = values.next() {
                    out[mine_to.offset(g)] = value;
                }
            });
        }
        debug!(rank, label, elements = out.len(), "redistributed");
        Ok(out)
    }
}

fn to_complex(values: Vec<f64>, stage: &str) -> Result<Vec<Complex64>, BasisError> {
    let mut out: Vec<Complex64> = try_alloc(values.len(), stage)?;
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = Complex64::new(value, 0.0);
    }
    Ok(out)
}

/// Reorders data between two layouts of the same box.
fn permute(
    from: &Block,
    to: &Block,
    data: &[Complex64],
    stage: &str,
) -> Result<Vec<Complex64>, BasisError> {
    let mut out: Vec<Complex64> = try_alloc(to.len(), stage)?;
    for (offset, value) in data.iter().enumerate() {
        out[to.offset(from.global_index(offset))] = *value;
    }
    Ok(out)
}
