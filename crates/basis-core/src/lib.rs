#![deny(missing_docs)]
#![doc = "Errors, configuration, provenance and serialization helpers shared by the basis spectra crates."]

/// Run configuration loaded from YAML.
pub mod config;
pub mod errors;
/// Canonical hashing helpers.
pub mod hash;
pub mod logging;
pub mod provenance;
pub mod rng;
pub mod serde;

pub use config::{
    BinConfig, BoundaryOwner, Dtype, InputConfig, LineOfSight, MassAssignment, OutputConfig,
    PaintingConfig, RedshiftSpaceConfig, RunConfig, SampleKernel, ShotNoiseMode, TransferConfig,
};
pub use errors::{try_alloc, BasisError, ErrorInfo};
pub use hash::stable_hash_string;
pub use logging::init_logging;
pub use provenance::{RunProvenance, SchemaVersion};
pub use rng::{derive_substream_seed, RngHandle};
pub use crate::serde::{from_json_slice, from_yaml_str, to_canonical_json_bytes, to_yaml_string};
