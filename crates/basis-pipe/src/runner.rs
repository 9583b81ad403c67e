//! Stage sequencing for one run.

use basis_comm::{launch, Communicator, Stage, StageTracker};
use basis_core::config::RunConfig;
use basis_core::errors::{BasisError, ErrorInfo};
use basis_core::hash::stable_hash_string;
use basis_core::provenance::RunProvenance;
use basis_fields::{derive_fields, BiasField, FieldOptions};
use basis_grid::{DomainGrid, GridLayout, RealField};
use basis_paint::{lattice_positions, partition, ParticleBatch, Painter};
use basis_pk::{measure_spectra, Anisotropy, KBins, SpectrumOptions, SpectrumTable};
use tracing::{debug, info, info_span};

use crate::sources::{InitialPositions, ParticleSource, RunInputs};
use crate::transfer::load_transfer;

/// Everything resolved from a configuration before any worker starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// Grid decomposition.
    pub layout: GridLayout,
    /// Wavenumber bins.
    pub bins: KBins,
    /// Fields to construct, in catalogue order.
    pub fields: Vec<BiasField>,
    /// Density preprocessing.
    pub field_options: FieldOptions,
    /// Spectrum corrections.
    pub spectrum_options: SpectrumOptions,
}

impl RunPlan {
    /// Validates `config` and resolves layout, bins, fields and the transfer
    /// table.
    pub fn resolve(config: &RunConfig) -> Result<Self, BasisError> {
        config.validate()?;
        let layout = GridLayout::from_config(config)?;
        let bins = KBins::from_config(&config.bins, &layout)?;
        let fields = BiasField::parse_list(&config.fields)?;
        Ok(Self {
            layout,
            bins,
            fields,
            field_options: FieldOptions {
                growth_factor: config.growth_factor,
                smoothing_kcut: config.smoothing_kcut,
                transfer: config.transfer_function.as_ref().map(load_transfer).transpose()?,
            },
            spectrum_options: SpectrumOptions {
                shot_noise: config.shot_noise,
                kernel: config.painting.kernel,
                compensate: config.painting.compensate,
                anisotropy: config.redshift_space.as_ref().map(|rsd| Anisotropy {
                    axis: rsd.line_of_sight.axis(),
                    multipoles: rsd.multipoles.clone(),
                    wedges: rsd.wedges,
                }),
            },
        })
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Measured spectra.
    pub table: SpectrumTable,
    /// Where the spectra came from.
    pub provenance: RunProvenance,
}

fn catalogue_mismatch(what: &str, expected: usize, actual: usize) -> BasisError {
    BasisError::DataShape(
        ErrorInfo::new("catalogue-length", format!("{what} and final positions differ in length"))
            .with_context("final", expected)
            .with_context(what, actual),
    )
}

fn read_share(
    source: &dyn ParticleSource,
    workers: usize,
    rank: usize,
) -> Result<(usize, Vec<[f64; 3]>), BasisError> {
    let total = source.count()?;
    Ok((total, source.read_range(partition(total, workers, rank))?))
}

/// Reads this worker's density block and particle share.
fn load(
    grid: &DomainGrid<'_>,
    inputs: &RunInputs,
) -> Result<(RealField, ParticleBatch, Option<Vec<[f64; 3]>>), BasisError> {
    let layout = grid.layout();
    let (workers, rank) = (layout.workers(), grid.rank());
    let block = grid.real_block();
    let density = RealField::from_values(block, inputs.density.read_block(layout.nmesh(), &block)?)?;

    let (total, final_positions) = read_share(inputs.final_positions.as_ref(), workers, rank)?;
    let initial = match &inputs.initial_positions {
        InitialPositions::Catalogue(source) => {
            let (count, initial) = read_share(source.as_ref(), workers, rank)?;
            if count != total {
                return Err(catalogue_mismatch("initial", total, count));
            }
            initial
        }
        InitialPositions::Lattice { side } => {
            let count = side.pow(3);
            if count != total {
                return Err(catalogue_mismatch("lattice", total, count));
            }
            lattice_positions(partition(total, workers, rank), *side, layout.box_length())
        }
    };
    let particles = ParticleBatch::new(initial, final_positions)?;
    let tracers = match &inputs.tracers {
        Some(source) => Some(read_share(source.as_ref(), workers, rank)?.1),
        None => None,
    };
    debug!(rank, cells = block.len(), particles = particles.len(), "loaded inputs");
    Ok((density, particles, tracers))
}

/// One worker's walk through every stage. Only the root returns the table.
fn run_worker(
    comm: &Communicator,
    config: &RunConfig,
    plan: &RunPlan,
    inputs: &RunInputs,
) -> Result<Option<SpectrumTable>, BasisError> {
    let mut stages = StageTracker::new();
    let grid = DomainGrid::new(plan.layout, comm)?;

    let (density, particles, tracers) = {
        let _span = info_span!("stage", stage = Stage::Startup.name()).entered();
        let (density, mut particles, tracers) = load(&grid, inputs)?;
        if let Some(rsd) = &config.redshift_space {
            let axis = rsd.line_of_sight.axis();
            particles.shift_to_redshift_space(plan.layout.box_length(), axis, rsd.growth_rate);
            debug!(rank = comm.rank(), axis, growth_rate = rsd.growth_rate, "shifted to redshift space");
        }
        (density, particles, tracers)
    };
    stages.complete(comm, Stage::Startup)?;

    let fields = {
        let _span = info_span!("stage", stage = Stage::LagrangianFields.name()).entered();
        derive_fields(&grid, density, &plan.fields, &plan.field_options)?
    };
    stages.complete(comm, Stage::LagrangianFields)?;

    let painted = {
        let _span = info_span!("stage", stage = Stage::Painting.name()).entered();
        let painter = Painter::new(&grid, &config.painting)?;
        let mut painted = painter.paint_fields(&fields, &particles)?;
        drop(fields);
        if let Some(tracers) = tracers {
            painted.push(painter.paint_tracers(&tracers)?);
        }
        painted
    };
    stages.complete(comm, Stage::Painting)?;

    let table = {
        let _span = info_span!("stage", stage = Stage::Spectra.name()).entered();
        measure_spectra(&grid, painted, &plan.bins, &plan.spectrum_options)?
    };
    stages.complete(comm, Stage::Spectra)?;

    stages.complete(comm, Stage::Output)?;
    Ok(comm.is_root().then_some(table))
}

/// Runs the whole pipeline on `config.workers` workers.
///
/// Configuration problems are reported before any worker starts. Any worker
/// error aborts the group and is returned as is.
pub fn run(config: &RunConfig, inputs: &RunInputs) -> Result<RunOutcome, BasisError> {
    let plan = RunPlan::resolve(config)?;
    let config_hash = stable_hash_string(config)?;
    info!(
        nmesh = config.nmesh,
        workers = config.workers,
        fields = plan.fields.len(),
        bins = plan.bins.len(),
        config_hash = %config_hash,
        "starting basis spectra run"
    );

    let tables = launch(config.workers, |comm| run_worker(comm, config, &plan, inputs))?;
    let table = tables.into_iter().flatten().next().ok_or_else(|| {
        BasisError::protocol("missing-table", "root worker returned no spectrum table")
    })?;

    let provenance = RunProvenance {
        config_hash,
        inputs: inputs.describe(),
        workers: config.workers,
        seed: config.seed,
        tool_versions: Default::default(),
    }
    .with_tool("basis-pipe", env!("CARGO_PKG_VERSION"));
    info!(pairs = table.pairs.len(), table_hash = %table.table_hash, "run finished");
    Ok(RunOutcome { table, provenance })
}
