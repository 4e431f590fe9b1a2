//! Peak filters, applied on either side of binarization: raw-peak filters
//! clean up a spectrum as it is loaded, the per-bin filter collapses an
//! integerized spectrum to at most one peak per m/z window.

pub mod binary;
pub mod raw;

pub use binary::HighestPeakPerBinFunction;
pub use raw::{
    default_loading_filter, KeepNHighestRawPeaks, RawFilterChain, RawPeakFilter,
    RemoveImpossiblyHighPeaks, RemovePrecursorPeaks,
};
