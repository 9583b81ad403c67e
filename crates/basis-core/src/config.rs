use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{BasisError, ErrorInfo};

/// YAML-configurable parameters governing one basis-spectra run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Grid resolution per side, shared by the Lagrangian and Eulerian grids.
    pub nmesh: usize,
    /// Comoving side length of the periodic box.
    pub box_length: f64,
    /// Number of cooperating workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Optional explicit pencil layout `[p0, p1]`; a slab is used when absent.
    #[serde(default)]
    pub process_grid: Option<[usize; 2]>,
    /// Wavenumber binning.
    #[serde(default)]
    pub bins: BinConfig,
    /// Mass assignment and sampling behaviour.
    #[serde(default)]
    pub painting: PaintingConfig,
    /// Labels of the bias fields to construct, in catalogue order when omitted.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
    /// Shot-noise subtraction policy for self spectra.
    #[serde(default)]
    pub shot_noise: ShotNoiseMode,
    /// Linear growth factor applied to the initial density before deriving fields.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    /// Optional Gaussian smoothing scale applied to the initial density.
    #[serde(default)]
    pub smoothing_kcut: Option<f64>,
    /// Optional tabulated transfer function for scale-dependent growth.
    #[serde(default)]
    pub transfer_function: Option<TransferConfig>,
    /// Optional redshift-space mapping and line-of-sight statistics.
    #[serde(default)]
    pub redshift_space: Option<RedshiftSpaceConfig>,
    /// Input locations.
    #[serde(default)]
    pub inputs: InputConfig,
    /// Output behaviour.
    #[serde(default)]
    pub output: OutputConfig,
    /// Seed used by synthetic inputs.
    #[serde(default)]
    pub seed: u64,
}

fn default_workers() -> usize {
    1
}

fn default_fields() -> Vec<String> {
    ["1", "delta", "delta2", "s2", "nabla2"]
        .iter()
        .map(|label| label.to_string())
        .collect()
}

fn default_growth_factor() -> f64 {
    1.0
}

impl RunConfig {
    /// Creates a configuration with defaults for everything but the grid.
    pub fn new(nmesh: usize, box_length: f64) -> Self {
        Self {
            nmesh,
            box_length,
            workers: default_workers(),
            process_grid: None,
            bins: BinConfig::default(),
            painting: PaintingConfig::default(),
            fields: default_fields(),
            shot_noise: ShotNoiseMode::default(),
            growth_factor: default_growth_factor(),
            smoothing_kcut: None,
            transfer_function: None,
            redshift_space: None,
            inputs: InputConfig::default(),
            output: OutputConfig::default(),
            seed: 0,
        }
    }

    /// Loads and validates a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, BasisError> {
        let contents =
            std::fs::read_to_string(path).map_err(|err| BasisError::io("config-read", err, path))?;
        let config: RunConfig = serde_yaml::from_str(&contents).map_err(|err| {
            BasisError::Configuration(
                ErrorInfo::new("config-parse", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks scalar settings. Layout divisibility and bin edges are checked by
    /// the grid and spectrum crates, which own those rules.
    pub fn validate(&self) -> Result<(), BasisError> {
        if self.nmesh == 0 {
            return Err(config_error("invalid-nmesh", "nmesh must be positive"));
        }
        if !(self.box_length.is_finite() && self.box_length > 0.0) {
            return Err(BasisError::Configuration(
                ErrorInfo::new("invalid-box-length", "box_length must be finite and positive")
                    .with_context("box_length", self.box_length),
            ));
        }
        if self.workers == 0 {
            return Err(config_error("invalid-workers", "at least one worker is required"));
        }
        if !(self.growth_factor.is_finite() && self.growth_factor > 0.0) {
            return Err(config_error(
                "invalid-growth-factor",
                "growth_factor must be finite and positive",
            ));
        }
        if let Some(kcut) = self.smoothing_kcut {
            if !(kcut.is_finite() && kcut > 0.0) {
                return Err(config_error(
                    "invalid-smoothing",
                    "smoothing_kcut must be finite and positive",
                ));
            }
        }
        if let Some(transfer) = &self.transfer_function {
            transfer.validate()?;
        }
        if let Some(redshift_space) = &self.redshift_space {
            redshift_space.validate()?;
        }
        if self.fields.is_empty() {
            return Err(config_error("empty-fields", "at least one bias field is required"));
        }
        if let Some(side) = self.inputs.particles_per_side {
            if side == 0 {
                return Err(config_error(
                    "invalid-lattice",
                    "particles_per_side must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Volume of the periodic box.
    pub fn box_volume(&self) -> f64 {
        self.box_length.powi(3)
    }
}

fn config_error(code: &str, message: &str) -> BasisError {
    BasisError::configuration(code, message)
}

/// Wavenumber bin specification resolved into edges by the spectrum estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "spacing", rename_all = "kebab-case")]
pub enum BinConfig {
    /// Equal-width bins. Width defaults to the fundamental mode, upper edge to
    /// the Nyquist wavenumber.
    Linear {
        /// Lower edge of the first bin. Defaults to half a bin width, which
        /// centres every bin on a shell of the fundamental mode.
        #[serde(default)]
        kmin: Option<f64>,
        /// Upper limit for the last edge. Bins that would cross it are dropped.
        #[serde(default)]
        kmax: Option<f64>,
        /// Bin width.
        #[serde(default)]
        dk: Option<f64>,
    },
    /// Logarithmically spaced bins.
    Log {
        /// Lower edge of the first bin (must be positive).
        kmin: f64,
        /// Upper edge of the last bin.
        kmax: f64,
        /// Number of bins.
        nbins: usize,
    },
    /// Explicit increasing bin edges.
    Explicit {
        /// Bin edges; `edges.len() - 1` bins.
        edges: Vec<f64>,
    },
}

impl Default for BinConfig {
    fn default() -> Self {
        BinConfig::Linear {
            kmin: None,
            kmax: None,
            dk: None,
        }
    }
}

/// Source of a `(k, T(k))` table. Interpolation rules belong to the field crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransferConfig {
    /// Inline columns.
    Table {
        /// Wavenumbers, strictly increasing.
        k: Vec<f64>,
        /// Transfer values at `k`.
        transfer: Vec<f64>,
    },
    /// Comma-separated `k, T` rows; lines starting with `#` are skipped.
    File {
        /// Path of the table.
        file: PathBuf,
    },
}

impl TransferConfig {
    fn validate(&self) -> Result<(), BasisError> {
        match self {
            TransferConfig::Table { k, transfer } if k.len() != transfer.len() || k.len() < 2 => {
                Err(BasisError::Configuration(
                    ErrorInfo::new(
                        "transfer-table-shape",
                        "a transfer table needs matching k and T columns with at least two rows",
                    )
                    .with_context("k", k.len())
                    .with_context("transfer", transfer.len()),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Grid axis taken as the line of sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineOfSight {
    /// First grid axis.
    X,
    /// Second grid axis.
    Y,
    /// Third grid axis.
    #[default]
    Z,
}

impl LineOfSight {
    /// Index of the axis in `[x, y, z]` order.
    pub fn axis(self) -> usize {
        match self {
            LineOfSight::X => 0,
            LineOfSight::Y => 1,
            LineOfSight::Z => 2,
        }
    }
}

/// Redshift-space mapping of the final positions. Each particle moves along
/// the line of sight by `growth_rate` times its displacement component, and
/// spectra gain Legendre multipoles and `|mu|` wedges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedshiftSpaceConfig {
    /// Line-of-sight axis.
    #[serde(default)]
    pub line_of_sight: LineOfSight,
    /// Logarithmic growth rate `f`.
    pub growth_rate: f64,
    /// Even Legendre orders to measure.
    #[serde(default = "default_multipoles")]
    pub multipoles: Vec<u32>,
    /// Number of equal-width `|mu|` wedges over `[0, 1]`; zero disables them.
    #[serde(default)]
    pub wedges: usize,
}

fn default_multipoles() -> Vec<u32> {
    vec![0, 2, 4]
}

impl RedshiftSpaceConfig {
    /// Redshift-space settings with the default multipoles and no wedges.
    pub fn new(line_of_sight: LineOfSight, growth_rate: f64) -> Self {
        Self {
            line_of_sight,
            growth_rate,
            multipoles: default_multipoles(),
            wedges: 0,
        }
    }

    fn validate(&self) -> Result<(), BasisError> {
        if !self.growth_rate.is_finite() {
            return Err(BasisError::Configuration(
                ErrorInfo::new("invalid-growth-rate", "redshift_space.growth_rate must be finite")
                    .with_context("growth_rate", self.growth_rate),
            ));
        }
        if let Some(ell) = self.multipoles.iter().find(|ell| *ell % 2 == 1) {
            return Err(BasisError::Configuration(
                ErrorInfo::new("odd-multipole", "odd multipoles of real fields vanish")
                    .with_context("ell", ell)
                    .with_hint("request even orders such as [0, 2, 4]"),
            ));
        }
        let mut seen = self.multipoles.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.multipoles.len() {
            return Err(config_error(
                "duplicate-multipole",
                "each multipole order may be requested once",
            ));
        }
        Ok(())
    }
}

/// Mass-assignment kernel used when depositing onto the late-time grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MassAssignment {
    /// Nearest grid point.
    Ngp,
    /// Cloud in cell (trilinear).
    #[default]
    Cic,
    /// Triangular shaped cloud.
    Tsc,
}

/// Interpolation used to sample Lagrangian fields at initial positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SampleKernel {
    /// Value of the nearest grid point.
    #[default]
    Nearest,
    /// Trilinear interpolation between the eight surrounding points.
    Trilinear,
}

/// Tie-break for positions lying exactly on a cell boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryOwner {
    /// The cell below the boundary owns the point.
    Left,
    /// The cell above the boundary owns the point.
    #[default]
    Right,
}

/// Painting behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintingConfig {
    /// Deposit kernel.
    #[serde(default)]
    pub kernel: MassAssignment,
    /// Lagrangian sampling kernel.
    #[serde(default)]
    pub sampling: SampleKernel,
    /// Boundary tie-break.
    #[serde(default)]
    pub boundary: BoundaryOwner,
    /// Divide out the deposit window (with aliasing correction) before binning.
    #[serde(default = "default_compensate")]
    pub compensate: bool,
}

fn default_compensate() -> bool {
    true
}

impl Default for PaintingConfig {
    fn default() -> Self {
        Self {
            kernel: MassAssignment::default(),
            sampling: SampleKernel::default(),
            boundary: BoundaryOwner::default(),
            compensate: default_compensate(),
        }
    }
}

/// Which self spectra receive a shot-noise subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ShotNoiseMode {
    /// No subtraction.
    None,
    /// `V / N_particles` subtracted from unit-weight fields (the `1` field and tracers).
    #[default]
    Poisson,
    /// `V / N_particles * <w^2>` subtracted from every self spectrum.
    Weighted,
}

/// Element type of raw numeric input arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// 32-bit floats.
    #[default]
    F32,
    /// 64-bit floats.
    F64,
}

impl Dtype {
    /// Size of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 => 8,
        }
    }
}

/// Locations of raw input arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InputConfig {
    /// Initial density grid, `nmesh^3` values in C order.
    #[serde(default)]
    pub density: Option<PathBuf>,
    /// Element type of the density grid.
    #[serde(default)]
    pub density_dtype: Dtype,
    /// Final particle positions, `(M, 3)`.
    #[serde(default)]
    pub final_positions: Option<PathBuf>,
    /// Initial particle positions, `(M, 3)`. Lattice positions are used when absent.
    #[serde(default)]
    pub initial_positions: Option<PathBuf>,
    /// Lattice size used for implicit initial positions.
    #[serde(default)]
    pub particles_per_side: Option<usize>,
    /// Element type of the position arrays.
    #[serde(default)]
    pub particle_dtype: Dtype,
    /// Optional tracer positions painted with unit weight.
    #[serde(default)]
    pub tracers: Option<PathBuf>,
}

/// Output behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory; the CLI `--out` flag takes precedence.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Also emit a flat CSV next to the JSON table.
    #[serde(default = "default_write_csv")]
    pub write_csv: bool,
}

fn default_write_csv() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            write_csv: default_write_csv(),
        }
    }
}
