//! Input/output helpers for external data files.

/// CSV forecast and production series of a DER.
pub mod der_data;
/// CSV export of the real-time step records.
pub mod export;

pub use der_data::{DerSeries, read_der_series};
