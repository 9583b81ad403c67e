#![deny(missing_docs)]
#![doc = "Worker groups, blocking collectives and the stage protocol shared by every pipeline component."]

pub mod group;
pub mod stage;

pub use group::{launch, Communicator};
pub use stage::{Stage, StageTracker};
