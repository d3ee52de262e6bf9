//! Shiftable loads and the catalog that tells each building which it owns.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::{LoadConfig, ScenarioConfig};
use crate::error::PlanningError;
use crate::protocol::AgentId;
use crate::scheduler::{Horizon, Schedule};

/// Resolution of catalog load profiles, in seconds.
pub const CATALOG_STEP_S: u64 = 900;

/// A shiftable load.
///
/// `power` is sampled at the simulation step; `earliest_start` and
/// `latest_end` are seconds from the start of the planning horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub id: u32,
    pub power: Vec<f64>,
    pub earliest_start: u64,
    pub latest_end: u64,
}

impl Load {
    pub fn new(id: u32, power: Vec<f64>, earliest_start: u64, latest_end: u64) -> Self {
        Self {
            id,
            power,
            earliest_start,
            latest_end,
        }
    }

    /// Profile length in seconds at sampling period `step`.
    pub fn duration(&self, step: u64) -> u64 {
        self.power.len() as u64 * step
    }

    pub fn peak(&self) -> f64 {
        self.power.iter().copied().fold(0.0, f64::max)
    }

    /// Whether the window can still hold the whole profile.
    pub fn fits(&self, step: u64) -> bool {
        self.earliest_start + self.duration(step) <= self.latest_end
    }

    /// The same window moved so that `cutoff` becomes time zero, clamped at 0.
    pub fn shifted(&self, cutoff: u64) -> Self {
        Self {
            id: self.id,
            power: self.power.clone(),
            earliest_start: self.earliest_start.saturating_sub(cutoff),
            latest_end: self.latest_end.saturating_sub(cutoff),
        }
    }
}

/// Resamples a profile from `from_step` to `to_step` by linear interpolation.
///
/// Sample `k` of the result is the source profile evaluated at
/// `(k + 1) · to_step` seconds, the source sample `j` sitting at
/// `(j + 1) · from_step`. Values beyond either end are held; results are
/// truncated to whole watts.
pub fn resample_profile(power: &[f64], from_step: u64, to_step: u64) -> Vec<f64> {
    let Some(&last) = power.last() else {
        return Vec::new();
    };
    if from_step == to_step {
        return power.iter().map(|w| w.trunc()).collect();
    }
    let samples = ((power.len() as u64 * from_step) / to_step).max(1) as usize;
    (0..samples)
        .map(|k| {
            let pos = ((k as u64 + 1) * to_step) as f64 / from_step as f64 - 1.0;
            let value = if pos <= 0.0 {
                power[0]
            } else if pos >= (power.len() - 1) as f64 {
                last
            } else {
                let lo = pos.floor() as usize;
                let frac = pos - lo as f64;
                power[lo] + (power[lo + 1] - power[lo]) * frac
            };
            value.trunc()
        })
        .collect()
}

/// Source of the loads each building has to schedule.
pub trait LoadCatalog {
    /// Every load of `building`, profile at `step`, window relative to midnight.
    fn building_loads(&self, building: AgentId, step: u64) -> Result<Vec<Load>, PlanningError>;

    /// Loads to schedule over `horizon`, windows relative to its start.
    fn get_loads(&self, building: AgentId, horizon: &Horizon) -> Result<Vec<Load>, PlanningError> {
        Ok(self
            .building_loads(building, horizon.step)?
            .into_iter()
            .map(|load| load.shifted(horizon.start))
            .filter(|load| still_possible(building, load, horizon))
            .collect())
    }

    /// Loads not yet started at `horizon.start` according to
    /// `current_schedule` (unscheduled loads included), windows shifted to
    /// the restart horizon.
    fn get_loads_in_progress(
        &self,
        building: AgentId,
        horizon: &Horizon,
        current_schedule: &Schedule,
    ) -> Result<Vec<Load>, PlanningError> {
        Ok(self
            .building_loads(building, horizon.step)?
            .into_iter()
            .filter(|load| {
                current_schedule
                    .get(&load.id)
                    .is_none_or(|&start| start >= horizon.start)
            })
            .map(|load| load.shifted(horizon.start))
            .filter(|load| still_possible(building, load, horizon))
            .collect())
    }
}

/// Drops, with a warning, a load whose shifted window closed before it could run.
fn still_possible(building: AgentId, load: &Load, horizon: &Horizon) -> bool {
    let fits = load.fits(horizon.step);
    if !fits {
        warn!(
            building,
            load = load.id,
            cutoff = horizon.start,
            "load window already closed, load missed"
        );
    }
    fits
}

/// Catalog shared read-only by every building.
pub type SharedCatalog = Arc<dyn LoadCatalog + Send + Sync>;

/// Catalog built from the `[[buildings]]` section of the scenario.
#[derive(Debug, Clone, Default)]
pub struct ConfigCatalog {
    buildings: BTreeMap<AgentId, Vec<LoadConfig>>,
}

impl ConfigCatalog {
    pub fn from_config(cfg: &ScenarioConfig) -> Self {
        Self {
            buildings: cfg
                .buildings
                .iter()
                .map(|b| (b.id, b.loads.clone()))
                .collect(),
        }
    }

    pub fn shared(cfg: &ScenarioConfig) -> SharedCatalog {
        Arc::new(Self::from_config(cfg))
    }
}

impl LoadCatalog for ConfigCatalog {
    fn building_loads(&self, building: AgentId, step: u64) -> Result<Vec<Load>, PlanningError> {
        let loads = self
            .buildings
            .get(&building)
            .ok_or_else(|| PlanningError::MissingForecastData {
                agent: building,
                what: "no catalog entry".into(),
            })?;
        Ok(loads
            .iter()
            .map(|l| {
                Load::new(
                    l.id,
                    resample_profile(&l.power, CATALOG_STEP_S, step),
                    l.earliest_start_s,
                    l.latest_end_s,
                )
            })
            .collect())
    }
}
