//! Day-long signals: resampling raw tariffs and forecasts to the simulation
//! step, and cutting them to a planning horizon.

use thiserror::Error;

use crate::fault::Fault;
use crate::scheduler::Horizon;

pub const SECONDS_PER_DAY: u64 = 24 * 3600;

#[derive(Debug, Error, PartialEq)]
pub enum SignalError {
    #[error("signal is empty")]
    Empty,
    #[error("signal of {len} values cannot be stretched over {steps} steps per day")]
    Resolution { len: usize, steps: usize },
}

/// Stretches a day-long raw signal to the horizon's step and keeps the
/// horizon's slice.
///
/// Each raw value is repeated `steps_per_day / raw.len()` times, so value `i`
/// of the full-day result is `raw[i / ratio]`.
///
/// # Errors
///
/// Returns [`SignalError`] if `raw` is empty or its length does not divide
/// the number of steps in a day.
pub fn resample_signal(raw: &[f64], horizon: &Horizon) -> Result<Vec<f64>, SignalError> {
    let steps = (SECONDS_PER_DAY / horizon.step) as usize;
    if raw.is_empty() {
        return Err(SignalError::Empty);
    }
    if steps % raw.len() != 0 {
        return Err(SignalError::Resolution {
            len: raw.len(),
            steps,
        });
    }
    let ratio = steps / raw.len();
    let from = horizon.start_index();
    Ok((from..from + horizon.intervals())
        .map(|i| raw.get(i / ratio).copied().unwrap_or(0.0))
        .collect())
}

/// Cuts a full-day signal (sampled at `horizon.step`) to the horizon and
/// applies `fault` with the horizon start as origin.
///
/// Missing samples past the end of `signal` read as zero.
pub fn generate_forecast(signal: &[f64], horizon: &Horizon, fault: Option<&Fault>) -> Vec<f64> {
    let from = horizon.start_index();
    let slice: Vec<f64> = (from..from + horizon.intervals())
        .map(|i| signal.get(i).copied().unwrap_or(0.0))
        .collect();
    match fault {
        Some(fault) => fault.apply(horizon.start, horizon.step, &slice),
        None => slice,
    }
}
