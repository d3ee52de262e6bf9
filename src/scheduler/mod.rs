//! Per-building load scheduling.
//!
//! A [`LoadScheduler`] turns a set of shiftable [`Load`]s, a planning
//! [`Horizon`] and an [`ObjectiveInputs`] bundle into a [`Schedule`]
//! (load id to absolute start time) by solving a small mixed-integer program.
//! Two formulations exist: [`SchedulerVariant::PriceOnly`] reacts to the
//! energy price alone, [`SchedulerVariant::Interactive`] also accounts for the
//! consumption and generation announced by the rest of the community.

pub mod interactive;
pub mod model;
pub mod price_only;
pub mod solver;
mod starts;

use std::collections::BTreeMap;

use tracing::debug;

use crate::catalog::Load;
use crate::error::ScheduleError;
use crate::forecast::SECONDS_PER_DAY;

use self::solver::{GoodLpSolver, MilpSolver};

/// Load id to absolute start time in seconds.
pub type Schedule = BTreeMap<u32, u64>;

/// Planning window `[start, end)` sampled every `step` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub start: u64,
    pub end: u64,
    pub step: u64,
}

impl Horizon {
    /// # Panics
    ///
    /// Panics if `step` is zero, `end <= start`, or the window is not a whole
    /// number of steps.
    pub fn new(start: u64, end: u64, step: u64) -> Self {
        assert!(step > 0, "step must be positive");
        assert!(end > start, "horizon end must be after its start");
        assert!(
            (end - start) % step == 0,
            "horizon length must be a multiple of the step"
        );
        Self { start, end, step }
    }

    /// A whole day starting at midnight.
    pub fn day_ahead(step: u64) -> Self {
        Self::new(0, SECONDS_PER_DAY, step)
    }

    /// From `now` (time of day, rounded down to the step) to the end of the day.
    pub fn remaining_day(now: u64, step: u64) -> Self {
        let time_of_day = now % SECONDS_PER_DAY;
        let start = time_of_day - time_of_day % step;
        Self::new(start, SECONDS_PER_DAY, step)
    }

    pub fn intervals(&self) -> usize {
        ((self.end - self.start) / self.step) as usize
    }

    pub fn timestamps(&self) -> Vec<u64> {
        (0..self.intervals() as u64)
            .map(|i| self.start + i * self.step)
            .collect()
    }

    /// Index of the first interval within a full-day vector.
    pub fn start_index(&self) -> usize {
        (self.start / self.step) as usize
    }
}

/// Signals the objective is built from. Every vector, when present, must
/// cover the horizon interval by interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveInputs {
    pub price_energy: Option<Vec<f64>>,
    pub price_quadratic: Option<Vec<f64>>,
    pub price_local: Option<Vec<f64>>,
    pub external_consumption: Option<Vec<f64>>,
    pub external_generation: Option<Vec<f64>>,
    /// Cap on the building's own draw in watts.
    pub max_power: Option<f64>,
    /// Draw already committed on the horizon (W), such as loads started
    /// before it and still running. It counts toward the cap and the bill.
    pub running_draw: Option<Vec<f64>>,
}

impl ObjectiveInputs {
    fn check_lengths(&self, horizon: &Horizon) -> Result<(), ScheduleError> {
        let n = horizon.intervals();
        let named = [
            ("price_energy", &self.price_energy),
            ("price_quadratic", &self.price_quadratic),
            ("price_local", &self.price_local),
            ("external_consumption", &self.external_consumption),
            ("external_generation", &self.external_generation),
            ("running_draw", &self.running_draw),
        ];
        for (name, vector) in named {
            if let Some(v) = vector
                && v.len() != n
            {
                return Err(ScheduleError::InvalidInput(format!(
                    "{name} has {} values, horizon has {n} intervals",
                    v.len()
                )));
            }
        }
        Ok(())
    }

    /// Committed draw at interval `i`.
    pub(crate) fn running_at(&self, i: usize) -> f64 {
        self.running_draw.as_ref().map_or(0.0, |v| v[i])
    }

    /// `draw` plus the committed draw, interval by interval.
    pub(crate) fn with_running(&self, mut draw: Vec<f64>) -> Vec<f64> {
        for (i, d) in draw.iter_mut().enumerate() {
            *d += self.running_at(i);
        }
        draw
    }
}

/// Numeric knobs shared by both formulations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    /// Watts are divided by this before entering the objective.
    pub power_scale: f64,
    /// Weight `R` of the peak-excess slack; `None` makes `max_power` a hard cap.
    pub peak_penalty: Option<f64>,
    pub quadratic_segments: usize,
    /// Cost added per interval of delay, so the earliest of equal-cost starts wins.
    pub tie_break_weight: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            power_scale: 1000.0,
            peak_penalty: None,
            quadratic_segments: 8,
            tie_break_weight: 1e-6,
        }
    }
}

/// A schedule together with its exact objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOutcome {
    pub schedule: Schedule,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerVariant {
    PriceOnly,
    Interactive,
}

/// Builds and solves the scheduling program for one building.
#[derive(Debug, Clone)]
pub struct LoadScheduler<S: MilpSolver = GoodLpSolver> {
    variant: SchedulerVariant,
    settings: SchedulerSettings,
    solver: S,
}

impl LoadScheduler<GoodLpSolver> {
    pub fn new(variant: SchedulerVariant, settings: SchedulerSettings) -> Self {
        let solver = GoodLpSolver::new(settings.quadratic_segments);
        Self::with_solver(variant, settings, solver)
    }
}

impl<S: MilpSolver> LoadScheduler<S> {
    pub fn with_solver(variant: SchedulerVariant, settings: SchedulerSettings, solver: S) -> Self {
        Self {
            variant,
            settings,
            solver,
        }
    }

    pub fn variant(&self) -> SchedulerVariant {
        self.variant
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Chooses a start time for every load.
    ///
    /// # Arguments
    ///
    /// * `loads` - Shiftable loads, windows relative to `horizon.start`
    /// * `horizon` - Planning window
    /// * `inputs` - Prices, externalities and the power cap
    ///
    /// # Returns
    ///
    /// The schedule and its exact cost, or [`ScheduleError::Infeasible`] when
    /// some load cannot be placed. An empty load set yields an empty schedule
    /// without calling the solver.
    pub fn schedule(
        &self,
        loads: &[Load],
        horizon: &Horizon,
        inputs: &ObjectiveInputs,
    ) -> Result<ScheduleOutcome, ScheduleError> {
        inputs.check_lengths(horizon)?;
        debug!(
            loads = loads.len(),
            intervals = horizon.intervals(),
            variant = ?self.variant,
            "building scheduling model"
        );
        if loads.is_empty() {
            let draw = inputs.with_running(vec![0.0; horizon.intervals()]);
            let cost = match self.variant {
                SchedulerVariant::PriceOnly => price_only::exact_cost(&draw, &self.settings, inputs),
                SchedulerVariant::Interactive => {
                    interactive::exact_cost(&draw, &self.settings, inputs)
                }
            };
            return Ok(ScheduleOutcome {
                schedule: Schedule::new(),
                cost,
            });
        }
        match self.variant {
            SchedulerVariant::PriceOnly => {
                price_only::schedule(&self.solver, &self.settings, loads, horizon, inputs)
            }
            SchedulerVariant::Interactive => {
                interactive::schedule(&self.solver, &self.settings, loads, horizon, inputs)
            }
        }
    }
}

/// Solves `model` and checks the assignment against every constraint.
///
/// # Errors
///
/// Solver failures, or [`ScheduleError::Solver`] when the backend returns an
/// assignment that breaks a constraint.
pub(crate) fn solve_checked<S: MilpSolver>(
    solver: &S,
    model: &model::MilpModel,
) -> Result<model::Assignment, ScheduleError> {
    let assignment = solver.solve(model)?;
    if let Some(broken) = model.first_violation(&assignment, 1e-6) {
        return Err(ScheduleError::Solver(format!(
            "assignment breaks a {} constraint",
            broken.name
        )));
    }
    debug!(
        objective = model.objective().evaluate(assignment.values()),
        "solver assignment checked"
    );
    Ok(assignment)
}

/// Superposes each load profile at its scheduled start.
///
/// The result has one sample per horizon interval. Loads missing from the
/// schedule contribute nothing; profiles running past the horizon end are
/// truncated.
pub fn to_power_vector(schedule: &Schedule, loads: &[Load], horizon: &Horizon) -> Vec<f64> {
    let mut power = vec![0.0; horizon.intervals()];
    for load in loads {
        let Some(&start) = schedule.get(&load.id) else {
            continue;
        };
        if start < horizon.start {
            continue;
        }
        let offset = ((start - horizon.start) / horizon.step) as usize;
        for (k, sample) in load.power.iter().enumerate() {
            if let Some(slot) = power.get_mut(offset + k) {
                *slot += sample;
            }
        }
    }
    power
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(id: u32, power: Vec<f64>, earliest: u64, latest: u64) -> Load {
        Load::new(id, power, earliest, latest)
    }

    #[test]
    fn horizon_counts_intervals_from_its_start() {
        let horizon = Horizon::new(7200, SECONDS_PER_DAY, 3600);
        assert_eq!(horizon.intervals(), 22);
        assert_eq!(horizon.start_index(), 2);
        assert_eq!(horizon.timestamps()[..2], [7200, 10800]);
    }

    #[test]
    fn remaining_day_rounds_down_to_step() {
        let horizon = Horizon::remaining_day(SECONDS_PER_DAY + 3700, 900);
        assert_eq!(horizon.start, 3600);
        assert_eq!(horizon.end, SECONDS_PER_DAY);
    }

    #[test]
    fn power_vector_superposes_overlapping_loads() {
        let horizon = Horizon::new(0, 6 * 3600, 3600);
        let loads = vec![
            load(1, vec![100.0, 100.0], 0, 6 * 3600),
            load(2, vec![50.0, 50.0, 50.0], 0, 6 * 3600),
        ];
        let schedule = Schedule::from([(1, 3600), (2, 7200)]);

        let power = to_power_vector(&schedule, &loads, &horizon);
        assert_eq!(power, vec![0.0, 100.0, 150.0, 50.0, 50.0, 0.0]);
    }

    #[test]
    fn power_vector_truncates_at_horizon_end() {
        let horizon = Horizon::new(0, 3 * 3600, 3600);
        let loads = vec![load(1, vec![10.0, 20.0, 30.0], 0, 3 * 3600)];
        let schedule = Schedule::from([(1, 7200)]);

        let power = to_power_vector(&schedule, &loads, &horizon);
        assert_eq!(power, vec![0.0, 0.0, 10.0]);
    }

    #[test]
    fn mismatched_price_length_is_invalid_input() {
        let horizon = Horizon::new(0, 4 * 3600, 3600);
        let scheduler = LoadScheduler::new(SchedulerVariant::PriceOnly, SchedulerSettings::default());
        let inputs = ObjectiveInputs {
            price_energy: Some(vec![1.0; 3]),
            ..ObjectiveInputs::default()
        };
        let loads = vec![load(1, vec![1.0], 0, 4 * 3600)];

        let err = scheduler.schedule(&loads, &horizon, &inputs).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidInput(_)));
    }

    #[test]
    fn no_loads_means_empty_schedule() {
        let horizon = Horizon::day_ahead(3600);
        let scheduler =
            LoadScheduler::new(SchedulerVariant::Interactive, SchedulerSettings::default());
        let outcome = scheduler
            .schedule(&[], &horizon, &ObjectiveInputs::default())
            .expect("trivially feasible");
        assert!(outcome.schedule.is_empty());
        assert_eq!(outcome.cost, 0.0);
    }
}
