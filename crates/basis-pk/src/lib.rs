#![deny(missing_docs)]
#![doc = "Binned auto and cross power spectra with shot-noise and window corrections."]

pub mod bins;
pub mod estimator;
pub mod table;

pub use bins::KBins;
pub use estimator::{
    legendre, measure_spectra, shot_noise, window_factor, Anisotropy, SpectrumOptions,
};
pub use table::{FieldSummary, Multipole, SpectrumPair, SpectrumRow, SpectrumTable, Wedge};
