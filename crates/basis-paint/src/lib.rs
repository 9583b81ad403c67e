#![deny(missing_docs)]
#![doc = "Particle painting: Lagrangian sampling, redistribution and mass assignment."]

pub mod kernel;
pub mod painter;
pub mod particles;

pub use kernel::{axis_stencil, halo_width, wrap_coordinate, wrap_position, AxisStencil, Stencil};
pub use painter::{PaintedField, PaintedKind, Painter};
pub use particles::{lattice_position, lattice_positions, partition, ParticleBatch};
