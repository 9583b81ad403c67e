use std::error::Error;

use basis_core::init_logging;
use clap::{Parser, Subcommand};
use commands::{
    demo::{self, DemoArgs},
    inspect::{self, InspectArgs},
    run::{self, RunArgs},
    validate::{self, ValidateArgs},
};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "basis-sim", about = "Lagrangian basis spectra pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure basis spectra from the raw inputs named in a configuration.
    Run(RunArgs),
    /// Generate seeded synthetic initial conditions and run the full pipeline on them.
    Demo(DemoArgs),
    /// Check a configuration and print the resolved layout, bins and fields.
    Validate(ValidateArgs),
    /// Verify a persisted spectrum table and print it.
    Inspect(InspectArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run::run(&args),
        Command::Demo(args) => demo::run(&args),
        Command::Validate(args) => validate::run(&args),
        Command::Inspect(args) => inspect::run(&args),
    }
}
