use std::error::Error;
use std::path::{Path, PathBuf};

use basis_core::config::RunConfig;
use basis_core::serde::to_canonical_json_bytes;
use basis_pipe::{run as run_pipeline, write_outputs, RunInputs, RunOutcome};
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML configuration describing the run and its raw inputs.
    #[arg(long)]
    pub config: PathBuf,
    /// Output directory; overrides `output.directory` from the configuration.
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Number of workers; overrides `workers` from the configuration.
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Printed after every completed run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub output: Option<String>,
    pub table_hash: String,
    pub config_hash: String,
    pub workers: usize,
    pub fields: Vec<String>,
    pub pairs: usize,
    pub bins: usize,
}

impl RunSummary {
    pub fn new(outcome: &RunOutcome, output: Option<&Path>) -> Self {
        Self {
            output: output.map(|dir| dir.display().to_string()),
            table_hash: outcome.table.table_hash.clone(),
            config_hash: outcome.provenance.config_hash.clone(),
            workers: outcome.provenance.workers,
            fields: outcome.table.fields.iter().map(|field| field.label.clone()).collect(),
            pairs: outcome.table.pairs.len(),
            bins: outcome.table.edges.len().saturating_sub(1),
        }
    }

    pub fn print(&self) -> Result<(), Box<dyn Error>> {
        println!("{}", String::from_utf8(to_canonical_json_bytes(self)?)?);
        Ok(())
    }
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = RunConfig::load(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    let out = args
        .out
        .clone()
        .or_else(|| config.output.directory.clone())
        .ok_or("no output directory: pass --out or set output.directory")?;

    let inputs = RunInputs::from_config(&config)?;
    let outcome = run_pipeline(&config, &inputs)?;
    write_outputs(&out, &config, &outcome)?;
    RunSummary::new(&outcome, Some(&out)).print()
}
