use std::error::Error;
use std::path::PathBuf;

use basis_core::config::RunConfig;
use basis_core::serde::to_canonical_json_bytes;
use basis_pipe::RunPlan;
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// YAML configuration to check.
    #[arg(long)]
    pub config: PathBuf,
}

#[derive(Debug, Serialize)]
struct PlanReport {
    nmesh: usize,
    box_length: f64,
    workers: usize,
    process_grid: [usize; 2],
    fundamental_k: f64,
    nyquist_k: f64,
    fields: Vec<&'static str>,
    edges: Vec<f64>,
    line_of_sight: Option<usize>,
    multipoles: Vec<u32>,
    transfer_samples: Option<usize>,
}

pub fn run(args: &ValidateArgs) -> Result<(), Box<dyn Error>> {
    let config = RunConfig::load(&args.config)?;
    let plan = RunPlan::resolve(&config)?;
    let layout = plan.layout;
    let report = PlanReport {
        nmesh: layout.nmesh(),
        box_length: layout.box_length(),
        workers: layout.workers(),
        process_grid: layout.process_grid().dims(),
        fundamental_k: layout.fundamental_k(),
        nyquist_k: layout.nyquist_k(),
        fields: plan.fields.iter().map(|field| field.label()).collect(),
        edges: plan.bins.edges().to_vec(),
        line_of_sight: plan.spectrum_options.anisotropy.as_ref().map(|rsd| rsd.axis),
        multipoles: plan
            .spectrum_options
            .anisotropy
            .as_ref()
            .map(|rsd| rsd.multipoles.clone())
            .unwrap_or_default(),
        transfer_samples: plan.field_options.transfer.as_ref().map(|table| table.len()),
    };
    println!("{}", String::from_utf8(to_canonical_json_bytes(&report)?)?);
    Ok(())
}
