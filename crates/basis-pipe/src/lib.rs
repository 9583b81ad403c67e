#![deny(missing_docs)]
#![doc = "Input sources, stage orchestration and persistence for basis spectra runs."]

/// Persisted run artefacts.
pub mod manifest;
/// Stage sequencing for one run.
pub mod runner;
pub mod sources;
pub mod synthetic;
pub mod transfer;

pub use manifest::{
    load_table, write_outputs, RunManifest, CONFIG_FILE, CSV_FILE, MANIFEST_FILE, TABLE_FILE,
};
pub use runner::{run, RunOutcome, RunPlan};
pub use sources::{
    write_raw, DensitySource, InMemoryDensity, InMemoryParticles, InitialPositions,
    ParticleSource, RawDensityFile, RawParticleFile, RunInputs,
};
pub use synthetic::{generate, PowerLaw, SyntheticInputs};
pub use transfer::{load_transfer, read_transfer_file};
