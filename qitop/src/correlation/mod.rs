//! Call/response correlation for the selected method
//!
//! - `call_record`: pairing of two trace halves into a [`CallRecord`]
//! - `series`: retention-backed series plotted for the selection
//! - `correlator`: per-slot state machine and its consumer task

pub mod call_record;
pub mod correlator;
pub mod series;

pub use call_record::{CallRecord, Outcome, PairingError};
pub use correlator::{
    CorrelatorHandle, CorrelatorOptions, CorrelatorState, CorrelatorStats, CorrelatorView,
    TraceCorrelator,
};
pub use series::{CallSeries, SeriesKind, SharedSeries};
