//! A building's committed day plan.

use crate::protocol::ForecastSlice;
use crate::scheduler::{Horizon, Schedule};

/// Full-day power vector of a building and the start time of each load.
///
/// Only replaced through [`EnergyPlan::commit`], after a successful solve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyPlan {
    pub timestamps: Vec<u64>,
    pub forecast_data: Vec<f64>,
    pub load_schedule: Schedule,
}

impl EnergyPlan {
    pub fn is_empty(&self) -> bool {
        self.forecast_data.is_empty()
    }

    /// Stores the outcome of an optimization over `horizon`.
    ///
    /// A horizon starting at midnight replaces the whole plan. A restart
    /// horizon keeps the samples before `horizon.start`, splices `power`
    /// after them and merges `schedule` into the existing load schedule.
    pub fn commit(&mut self, horizon: &Horizon, power: Vec<f64>, schedule: &Schedule) {
        self.timestamps = Horizon::day_ahead(horizon.step).timestamps();
        if horizon.start == 0 {
            self.forecast_data = power;
            self.load_schedule = schedule.clone();
        } else {
            let keep = horizon.start_index();
            self.forecast_data.resize(keep, 0.0);
            self.forecast_data.extend(power);
            self.load_schedule
                .extend(schedule.iter().map(|(&id, &start)| (id, start)));
        }
    }

    /// Planned power at a time of day; zero outside the plan.
    pub fn sample_at(&self, time_of_day: u64) -> f64 {
        self.timestamps
            .iter()
            .rposition(|&t| t <= time_of_day)
            .and_then(|i| self.forecast_data.get(i))
            .copied()
            .unwrap_or(0.0)
    }

    /// The plan restricted to `horizon`.
    pub fn tail(&self, horizon: &Horizon) -> Vec<f64> {
        let from = horizon.start_index();
        (from..from + horizon.intervals())
            .map(|i| self.forecast_data.get(i).copied().unwrap_or(0.0))
            .collect()
    }

    /// The plan restricted to `horizon`, ready to announce.
    pub fn slice(&self, horizon: &Horizon) -> ForecastSlice {
        ForecastSlice::new(horizon.timestamps(), self.tail(horizon))
    }

    /// The whole day, ready to announce.
    pub fn full(&self) -> ForecastSlice {
        ForecastSlice::new(self.timestamps.clone(), self.forecast_data.clone())
    }

    pub fn peak(&self) -> f64 {
        self.forecast_data.iter().copied().fold(0.0, f64::max)
    }
}
