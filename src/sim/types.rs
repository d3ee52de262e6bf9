//! Records produced by the round driver.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::Architecture;
use crate::forecast::SECONDS_PER_DAY;
use crate::protocol::{AgentId, ForecastSlice};

/// Community readings gathered during one real-time step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepRecord {
    /// Clock time of the step in seconds.
    pub time: u64,
    /// Price published by the manager.
    pub price: f64,
    /// Sum of building consumption (W).
    pub consumption_w: f64,
    /// Sum of DER generation (W).
    pub generation_w: f64,
    /// Whether a DER asked for a new planning phase.
    pub planning_requested: bool,
}

impl StepRecord {
    /// Draw on the main grid (W); negative when the community exports.
    pub fn net_w(&self) -> f64 {
        self.consumption_w - self.generation_w
    }
}

/// Result of one planning phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningOutcome {
    /// Clock time at which the phase started.
    pub time: u64,
    pub architecture: Architecture,
    /// DATA messages sent to buildings.
    pub messages: usize,
    /// Passes over the building list.
    pub rounds: usize,
    /// Every building reported an unchanged plan before the message budget ran out.
    pub converged: bool,
    /// Latest forecast announced by each building.
    pub consumption: BTreeMap<AgentId, ForecastSlice>,
    /// Latest forecast announced by each DER.
    pub generation: BTreeMap<AgentId, ForecastSlice>,
}

impl PlanningOutcome {
    /// Highest planned community consumption at a single timestamp (W).
    pub fn community_peak(&self) -> f64 {
        let mut per_time: BTreeMap<u64, f64> = BTreeMap::new();
        for slice in self.consumption.values() {
            let Some(data) = &slice.forecast_data else {
                continue;
            };
            for (&t, &p) in slice.timestamps.iter().zip(data) {
                *per_time.entry(t).or_default() += p;
            }
        }
        per_time.values().copied().fold(0.0, f64::max)
    }

    /// Energy cost of each announced building plan at the tariff.
    ///
    /// # Arguments
    ///
    /// * `energy_price` - Day-long tariff per kWh, any resolution
    /// * `step` - Sampling period of the forecasts in seconds
    pub fn building_costs(&self, energy_price: &[f64], step: u64) -> BTreeMap<AgentId, f64> {
        self.consumption
            .iter()
            .map(|(&id, slice)| (id, tariff_cost(slice, energy_price, step)))
            .collect()
    }
}

/// Cost of a power forecast (W) at a day-long tariff (per kWh).
pub fn tariff_cost(slice: &ForecastSlice, energy_price: &[f64], step: u64) -> f64 {
    let Some(data) = &slice.forecast_data else {
        return 0.0;
    };
    if energy_price.is_empty() {
        return 0.0;
    }
    let width = (SECONDS_PER_DAY / energy_price.len() as u64).max(1);
    let hours = step as f64 / 3600.0;
    slice
        .timestamps
        .iter()
        .zip(data)
        .map(|(&t, &w)| {
            let index = (((t % SECONDS_PER_DAY) / width) as usize).min(energy_price.len() - 1);
            energy_price[index] * w / 1000.0 * hours
        })
        .sum()
}

impl fmt::Display for PlanningOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "planning at {:>6}s ({:?}): {} messages, {} rounds, {}, community peak {:.0} W",
            self.time,
            self.architecture,
            self.messages,
            self.rounds,
            if self.converged { "converged" } else { "message budget exhausted" },
            self.community_peak()
        )
    }
}
