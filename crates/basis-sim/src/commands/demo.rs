use std::error::Error;
use std::path::PathBuf;

use basis_core::config::{MassAssignment, RunConfig, ShotNoiseMode};
use basis_grid::GridLayout;
use basis_pipe::{generate, run as run_pipeline, write_outputs, PowerLaw};
use clap::Args;
use tracing::info;

use super::run::RunSummary;

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Grid points per side; the particle lattice uses the same resolution.
    #[arg(long, default_value_t = 32)]
    pub nmesh: usize,
    /// Box side length.
    #[arg(long, default_value_t = 200.0)]
    pub box_length: f64,
    /// Number of workers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
    /// Seed for the Gaussian random field.
    #[arg(long, default_value_t = 2024)]
    pub seed: u64,
    /// Power-law amplitude of the initial spectrum.
    #[arg(long, default_value_t = 200.0)]
    pub amplitude: f64,
    /// Power-law index of the initial spectrum.
    #[arg(long, default_value_t = -1.0, allow_hyphen_values = true)]
    pub index: f64,
    /// Gaussian damping wavenumber of the initial spectrum.
    #[arg(long, default_value_t = 0.3)]
    pub damping_k: f64,
    /// Multiplier of the Zel'dovich displacement.
    #[arg(long, default_value_t = 1.0)]
    pub growth: f64,
    /// Deposit kernel.
    #[arg(long, value_enum, default_value_t = Kernel::Cic)]
    pub kernel: Kernel,
    /// Output directory; nothing is written when absent.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum Kernel {
    Ngp,
    Cic,
    Tsc,
}

impl From<Kernel> for MassAssignment {
    fn from(kernel: Kernel) -> Self {
        match kernel {
            Kernel::Ngp => MassAssignment::Ngp,
            Kernel::Cic => MassAssignment::Cic,
            Kernel::Tsc => MassAssignment::Tsc,
        }
    }
}

pub fn run(args: &DemoArgs) -> Result<(), Box<dyn Error>> {
    let mut config = RunConfig::new(args.nmesh, args.box_length);
    config.workers = args.workers;
    config.seed = args.seed;
    config.painting.kernel = args.kernel.into();
    config.shot_noise = ShotNoiseMode::Poisson;
    config.inputs.particles_per_side = Some(args.nmesh);
    config.output.directory = args.out.clone();
    config.validate()?;

    let power = PowerLaw {
        amplitude: args.amplitude,
        index: args.index,
        damping_k: args.damping_k,
    };
    let layout = GridLayout::from_config(&config)?;
    let synthetic = generate(layout, power, args.growth, args.seed)?;
    info!(particles = synthetic.final_positions.len(), "synthetic catalogue ready");

    let outcome = run_pipeline(&config, &synthetic.into_run_inputs()?)?;
    if let Some(out) = &args.out {
        write_outputs(out, &config, &outcome)?;
    }
    RunSummary::new(&outcome, args.out.as_deref()).print()
}
