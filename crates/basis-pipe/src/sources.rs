//! Density and particle inputs.
//!
//! Every worker reads only what it owns: the density rows of its real block
//! and a contiguous slice of the particle catalogue.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use basis_core::config::{Dtype, RunConfig};
use basis_core::errors::{BasisError, ErrorInfo};
use basis_grid::Block;

/// Initial density grid of `nmesh^3` values in C order.
pub trait DensitySource: Send + Sync {
    /// Short description recorded in the run provenance.
    fn describe(&self) -> String;

    /// Values of `block`, in block order, for a grid of `nmesh` points per side.
    fn read_block(&self, nmesh: usize, block: &Block) -> Result<Vec<f64>, BasisError>;
}

/// Catalogue of `(x, y, z)` positions.
pub trait ParticleSource: Send + Sync {
    /// Short description recorded in the run provenance.
    fn describe(&self) -> String;

    /// Number of particles.
    fn count(&self) -> Result<usize, BasisError>;

    /// Positions with indices in `range`.
    fn read_range(&self, range: Range<usize>) -> Result<Vec<[f64; 3]>, BasisError>;
}

/// Initial particle positions: read from a catalogue or implied by a lattice.
pub enum InitialPositions {
    /// Explicit catalogue, index-aligned with the final positions.
    Catalogue(Box<dyn ParticleSource>),
    /// Points of a `side^3` lattice in C order.
    Lattice {
        /// Particles per side.
        side: usize,
    },
}

impl std::fmt::Debug for InitialPositions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitialPositions::Catalogue(source) => {
                f.debug_tuple("Catalogue").field(&source.describe()).finish()
            }
            InitialPositions::Lattice { side } => {
                f.debug_struct("Lattice").field("side", side).finish()
            }
        }
    }
}

/// Everything a run reads.
pub struct RunInputs {
    /// Initial density.
    pub density: Box<dyn DensitySource>,
    /// Late-time particle positions.
    pub final_positions: Box<dyn ParticleSource>,
    /// Initial particle positions.
    pub initial_positions: InitialPositions,
    /// Optional tracer catalogue painted with unit weights.
    pub tracers: Option<Box<dyn ParticleSource>>,
}

impl std::fmt::Debug for RunInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunInputs")
            .field("inputs", &self.describe())
            .finish()
    }
}

impl RunInputs {
    /// Raw-file inputs named by the configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self, BasisError> {
        let inputs = &config.inputs;
        let density = inputs.density.as_ref().ok_or_else(|| {
            BasisError::Configuration(
                ErrorInfo::new("missing-density", "no initial density file configured")
                    .with_hint("set inputs.density"),
            )
        })?;
        let final_positions = inputs.final_positions.as_ref().ok_or_else(|| {
            BasisError::Configuration(
                ErrorInfo::new("missing-final-positions", "no final positions file configured")
                    .with_hint("set inputs.final_positions"),
            )
        })?;
        let initial_positions = match (&inputs.initial_positions, inputs.particles_per_side) {
            (Some(path), _) => InitialPositions::Catalogue(Box::new(RawParticleFile::new(
                path,
                inputs.particle_dtype,
            ))),
            (None, Some(side)) => InitialPositions::Lattice { side },
            (None, None) => {
                return Err(BasisError::Configuration(
                    ErrorInfo::new(
                        "missing-initial-positions",
                        "neither initial positions nor a particle lattice is configured",
                    )
                    .with_hint("set inputs.initial_positions or inputs.particles_per_side"),
                ))
            }
        };
        Ok(Self {
            density: Box::new(RawDensityFile::new(density, inputs.density_dtype)),
            final_positions: Box::new(RawParticleFile::new(final_positions, inputs.particle_dtype)),
            initial_positions,
            tracers: inputs.tracers.as_ref().map(|path| {
                Box::new(RawParticleFile::new(path, inputs.particle_dtype)) as Box<dyn ParticleSource>
            }),
        })
    }

    /// Input descriptions keyed by role.
    pub fn describe(&self) -> BTreeMap<String, String> {
        let mut described = BTreeMap::new();
        described.insert("density".to_string(), self.density.describe());
        described.insert("final_positions".to_string(), self.final_positions.describe());
        let initial = match &self.initial_positions {
            InitialPositions::Catalogue(source) => source.describe(),
            InitialPositions::Lattice { side } => format!("lattice {side}^3"),
        };
        described.insert("initial_positions".to_string(), initial);
        if let Some(tracers) = &self.tracers {
            described.insert("tracers".to_string(), tracers.describe());
        }
        described
    }
}

fn resolution_mismatch(expected: usize, actual: usize) -> BasisError {
    BasisError::DataShape(
        ErrorInfo::new("density-resolution", "density grid does not match nmesh")
            .with_context("expected", expected)
            .with_context("actual", actual),
    )
}

/// Density held in memory, `nmesh^3` values in C order.
#[derive(Debug, Clone)]
pub struct InMemoryDensity {
    nmesh: usize,
    values: Vec<f64>,
}

impl InMemoryDensity {
    /// Wraps a full grid.
    pub fn new(nmesh: usize, values: Vec<f64>) -> Result<Self, BasisError> {
        if values.len() != nmesh.pow(3) {
            return Err(BasisError::DataShape(
                ErrorInfo::new("density-length", "density does not hold nmesh^3 values")
                    .with_context("nmesh", nmesh)
                    .with_context("len", values.len()),
            ));
        }
        Ok(Self { nmesh, values })
    }

    /// Points per side.
    pub fn nmesh(&self) -> usize {
        self.nmesh
    }

    /// Values in C order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl DensitySource for InMemoryDensity {
    fn describe(&self) -> String {
        format!("in-memory density {n}^3", n = self.nmesh)
    }

    fn read_block(&self, nmesh: usize, block: &Block) -> Result<Vec<f64>, BasisError> {
        if nmesh != self.nmesh {
            return Err(resolution_mismatch(nmesh, self.nmesh));
        }
        let mut out = vec![0.0; block.len()];
        for_each_row(block, |x, y| {
            let start = (x * nmesh + y) * nmesh + block.start[2];
            let row = &self.values[start..start + block.shape[2]];
            for (dz, value) in row.iter().enumerate() {
                out[block.offset([x, y, block.start[2] + dz])] = *value;
            }
        });
        Ok(out)
    }
}

/// Calls `f(x, y)` for every row of `block` along z.
fn for_each_row(block: &Block, mut f: impl FnMut(usize, usize)) {
    for x in block.start[0]..block.start[0] + block.shape[0] {
        for y in block.start[1]..block.start[1] + block.shape[1] {
            f(x, y);
        }
    }
}

/// Particles held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryParticles {
    positions: Vec<[f64; 3]>,
}

impl InMemoryParticles {
    /// Wraps a catalogue.
    pub fn new(positions: Vec<[f64; 3]>) -> Self {
        Self { positions }
    }

    /// All positions.
    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }
}

impl ParticleSource for InMemoryParticles {
    fn describe(&self) -> String {
        format!("in-memory catalogue of {} particles", self.positions.len())
    }

    fn count(&self) -> Result<usize, BasisError> {
        Ok(self.positions.len())
    }

    fn read_range(&self, range: Range<usize>) -> Result<Vec<[f64; 3]>, BasisError> {
        self.positions.get(range.clone()).map(<[_]>::to_vec).ok_or_else(|| {
            BasisError::DataShape(
                ErrorInfo::new("particle-range", "requested particles beyond the catalogue")
                    .with_context("start", range.start)
                    .with_context("end", range.end)
                    .with_context("len", self.positions.len()),
            )
        })
    }
}

fn open(path: &Path) -> Result<File, BasisError> {
    File::open(path).map_err(|err| BasisError::io("input-open", err, path))
}

fn file_len(path: &Path) -> Result<u64, BasisError> {
    std::fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|err| BasisError::io("input-metadata", err, path))
}

/// Reads `count` native-endian values starting at element `first`.
fn read_values(
    file: &mut File,
    path: &Path,
    dtype: Dtype,
    first: usize,
    count: usize,
) -> Result<Vec<f64>, BasisError> {
    file.seek(SeekFrom::Start((first * dtype.width()) as u64))
        .map_err(|err| BasisError::io("input-seek", err, path))?;
    match dtype {
        Dtype::F32 => {
            let mut buffer = vec![0f32; count];
            file.read_exact(bytemuck::cast_slice_mut(&mut buffer))
                .map_err(|err| BasisError::io("input-read", err, path))?;
            Ok(buffer.into_iter().map(f64::from).collect())
        }
        Dtype::F64 => {
            let mut buffer = vec![0f64; count];
            file.read_exact(bytemuck::cast_slice_mut(&mut buffer))
                .map_err(|err| BasisError::io("input-read", err, path))?;
            Ok(buffer)
        }
    }
}

/// Writes native-endian values; the inverse of the raw readers.
pub fn write_raw(path: &Path, values: &[f64], dtype: Dtype) -> Result<(), BasisError> {
    let mut file = File::create(path).map_err(|err| BasisError::io("raw-create", err, path))?;
    let written = match dtype {
        Dtype::F32 => {
            let narrowed: Vec<f32> = values.iter().map(|value| *value as f32).collect();
            file.write_all(bytemuck::cast_slice(&narrowed))
        }
        Dtype::F64 => file.write_all(bytemuck::cast_slice(values)),
    };
    written.map_err(|err| BasisError::io("raw-write", err, path))
}

/// Raw density file.
#[derive(Debug, Clone)]
pub struct RawDensityFile {
    path: PathBuf,
    dtype: Dtype,
}

impl RawDensityFile {
    /// Density stored at `path` with element type `dtype`.
    pub fn new(path: impl Into<PathBuf>, dtype: Dtype) -> Self {
        Self {
            path: path.into(),
            dtype,
        }
    }
}

impl DensitySource for RawDensityFile {
    fn describe(&self) -> String {
        format!("{} ({:?})", self.path.display(), self.dtype)
    }

    fn read_block(&self, nmesh: usize, block: &Block) -> Result<Vec<f64>, BasisError> {
        let expected = (nmesh.pow(3) * self.dtype.width()) as u64;
        let actual = file_len(&self.path)?;
        if actual != expected {
            return Err(BasisError::DataShape(
                ErrorInfo::new("density-size", "density file size does not match nmesh^3")
                    .with_context("path", self.path.display())
                    .with_context("expected_bytes", expected)
                    .with_context("actual_bytes", actual)
                    .with_hint("check nmesh and inputs.density_dtype"),
            ));
        }
        let mut file = open(&self.path)?;
        let mut out = vec![0.0; block.len()];
        let mut failure = None;
        for_each_row(block, |x, y| {
            if failure.is_some() {
                return;
            }
            let first = (x * nmesh + y) * nmesh + block.start[2];
            match read_values(&mut file, &self.path, self.dtype, first, block.shape[2]) {
                Ok(row) => {
                    for (dz, value) in row.into_iter().enumerate() {
                        out[block.offset([x, y, block.start[2] + dz])] = value;
                    }
                }
                Err(err) => failure = Some(err),
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }
}

/// Raw `(M, 3)` position file.
#[derive(Debug, Clone)]
pub struct RawParticleFile {
    path: PathBuf,
    dtype: Dtype,
}

impl RawParticleFile {
    /// Positions stored at `path` with element type `dtype`.
    pub fn new(path: impl Into<PathBuf>, dtype: Dtype) -> Self {
        Self {
            path: path.into(),
            dtype,
        }
    }
}

impl ParticleSource for RawParticleFile {
    fn describe(&self) -> String {
        format!("{} ({:?})", self.path.display(), self.dtype)
    }

    fn count(&self) -> Result<usize, BasisError> {
        let record = (3 * self.dtype.width()) as u64;
        let len = file_len(&self.path)?;
        if len % record != 0 {
            return Err(BasisError::DataShape(
                ErrorInfo::new("particle-file-size", "file does not hold whole (x, y, z) records")
                    .with_context("path", self.path.display())
                    .with_context("bytes", len),
            ));
        }
        Ok((len / record) as usize)
    }

    fn read_range(&self, range: Range<usize>) -> Result<Vec<[f64; 3]>, BasisError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let mut file = open(&self.path)?;
        let flat = read_values(&mut file, &self.path, self.dtype, 3 * range.start, 3 * range.len())?;
        Ok(flat
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basis_grid::{GridLayout, ProcessGrid};

    fn ramp(nmesh: usize) -> Vec<f64> {
        (0..nmesh.pow(3)).map(|i| i as f64).collect()
    }

    #[test]
    fn in_memory_blocks_follow_global_indices() {
        let nmesh = 4;
        let layout = GridLayout::new(nmesh, 1.0, ProcessGrid::pencil(2, 2)).unwrap();
        let source = InMemoryDensity::new(nmesh, ramp(nmesh)).unwrap();
        for rank in 0..4 {
            let block = layout.real_block(rank);
            let values = source.read_block(nmesh, &block).unwrap();
            for (offset, value) in values.iter().enumerate() {
                let [x, y, z] = block.global_index(offset);
                assert_eq!(*value, ((x * nmesh + y) * nmesh + z) as f64);
            }
        }
    }

    #[test]
    fn raw_blocks_match_in_memory_blocks() {
        let nmesh = 4;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("density.f32");
        write_raw(&path, &ramp(nmesh), Dtype::F32).unwrap();
        let raw = RawDensityFile::new(&path, Dtype::F32);
        let memory = InMemoryDensity::new(nmesh, ramp(nmesh)).unwrap();
        let layout = GridLayout::new(nmesh, 1.0, ProcessGrid::slab(2)).unwrap();
        for rank in 0..2 {
            let block = layout.real_block(rank);
            assert_eq!(
                raw.read_block(nmesh, &block).unwrap(),
                memory.read_block(nmesh, &block).unwrap()
            );
        }
    }

    #[test]
    fn wrong_density_size_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("density.f64");
        write_raw(&path, &ramp(4), Dtype::F64).unwrap();
        let layout = GridLayout::new(8, 1.0, ProcessGrid::slab(1)).unwrap();
        let err = RawDensityFile::new(&path, Dtype::F64)
            .read_block(8, &layout.real_block(0))
            .unwrap_err();
        assert!(matches!(err, BasisError::DataShape(ref info) if info.code == "density-size"));
    }

    #[test]
    fn raw_particles_read_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.f64");
        let flat: Vec<f64> = (0..30).map(|i| i as f64 * 0.5).collect();
        write_raw(&path, &flat, Dtype::F64).unwrap();
        let source = RawParticleFile::new(&path, Dtype::F64);
        assert_eq!(source.count().unwrap(), 10);
        let slice = source.read_range(3..5).unwrap();
        assert_eq!(slice, vec![[4.5, 5.0, 5.5], [6.0, 6.5, 7.0]]);
        assert!(source.read_range(4..4).unwrap().is_empty());
    }

    #[test]
    fn partial_records_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.f32");
        write_raw(&path, &[1.0, 2.0, 3.0, 4.0], Dtype::F32).unwrap();
        let err = RawParticleFile::new(&path, Dtype::F32).count().unwrap_err();
        assert!(matches!(err, BasisError::DataShape(_)));
    }

    #[test]
    fn missing_inputs_are_configuration_errors() {
        let config = RunConfig::new(8, 1.0);
        let err = RunInputs::from_config(&config).unwrap_err();
        assert!(matches!(err, BasisError::Configuration(ref info) if info.code == "missing-density"));
    }
}
