#![deny(missing_docs)]
#![doc = "Lagrangian bias fields built from the initial density on the distributed grid."]

pub mod catalogue;
pub mod derive;
pub mod transfer;

pub use catalogue::{BiasField, CATALOGUE_VERSION};
pub use derive::{
    derive_fields, laplacian, prepare_density, tidal_component, tidal_squared, FieldOptions,
    LagrangianFields,
};
pub use transfer::TransferFunction;
