#![deny(missing_docs)]
#![doc = "Pencil-decomposed grids, distributed FFTs and halo exchange."]

pub mod fft;
pub mod halo;
pub mod layout;

pub use fft::{Complex64, DomainGrid, FourierField, LocalSlice, RealField};
pub use halo::{HaloField, HaloPlan, HaloWidth};
pub use layout::{Block, GridLayout, ProcessGrid, Region};
