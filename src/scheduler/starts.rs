//! Start-time binaries shared by both scheduling formulations.

use std::collections::BTreeSet;

use crate::catalog::Load;
use crate::error::ScheduleError;

use super::model::{Assignment, LinearExpr, MilpModel, Relation, VarId};
use super::{Horizon, Schedule};

/// Candidate start binaries of one load, keyed by interval index.
#[derive(Debug)]
struct LoadStarts {
    id: u32,
    power: Vec<f64>,
    peak: f64,
    candidates: Vec<(usize, VarId)>,
}

/// The `x[j, i]` block of the program: one binary per load and interval
/// where the profile fits before the horizon end.
#[derive(Debug)]
pub(crate) struct StartGrid {
    loads: Vec<LoadStarts>,
    intervals: usize,
}

impl StartGrid {
    /// Adds the start binaries with their one-start and time-window
    /// constraints, plus the earliest-start tie-break, to `model`.
    pub(crate) fn build(
        model: &mut MilpModel,
        loads: &[Load],
        horizon: &Horizon,
        tie_break_weight: f64,
    ) -> Result<Self, ScheduleError> {
        let mut seen = BTreeSet::new();
        for load in loads {
            if !seen.insert(load.id) {
                return Err(ScheduleError::InvalidInput(format!(
                    "load id {} appears twice",
                    load.id
                )));
            }
        }

        let intervals = horizon.intervals();
        let mut grid = Vec::with_capacity(loads.len());
        for load in loads {
            let len = load.power.len();
            if len == 0 || len > intervals {
                return Err(ScheduleError::Infeasible(format!(
                    "load {} ({len} intervals) does not fit in a {intervals}-interval horizon",
                    load.id
                )));
            }

            let mut one_start = LinearExpr::new();
            let mut outside_window = LinearExpr::new();
            let mut candidates = Vec::with_capacity(intervals - len + 1);
            for i in 0..=intervals - len {
                let x = model.add_binary();
                one_start.add(x, 1.0);
                if !in_window(load, i, horizon.step) {
                    outside_window.add(x, 1.0);
                }
                model.minimise_linear(x, tie_break_weight * i as f64);
                candidates.push((i, x));
            }

            if outside_window.terms.len() == candidates.len() {
                return Err(ScheduleError::Infeasible(format!(
                    "load {} has no admissible start in [{}, {}]",
                    load.id, load.earliest_start, load.latest_end
                )));
            }

            model.add_constraint("one_start", one_start, Relation::Eq, 1.0);
            if !outside_window.is_empty() {
                model.add_constraint("time_window", outside_window, Relation::Eq, 0.0);
            }
            grid.push(LoadStarts {
                id: load.id,
                power: load.power.clone(),
                peak: load.peak(),
                candidates,
            });
        }

        Ok(Self {
            loads: grid,
            intervals,
        })
    }

    /// `Σ_j Σ_k power_j[k] · x[j, i−k]`, the building's own draw at interval `i`.
    pub(crate) fn demand(&self, i: usize) -> LinearExpr {
        let mut expr = LinearExpr::new();
        for load in &self.loads {
            for &(start, x) in &load.candidates {
                if start <= i
                    && let Some(&p) = load.power.get(i - start)
                {
                    expr.add(x, p);
                }
            }
        }
        expr
    }

    /// Largest draw any single interval can see.
    pub(crate) fn peak_bound(&self) -> f64 {
        self.loads.iter().map(|load| load.peak).sum()
    }

    pub(crate) fn intervals(&self) -> usize {
        self.intervals
    }

    /// Reads the chosen start of each load back out of a solver assignment.
    pub(crate) fn decode(
        &self,
        assignment: &Assignment,
        horizon: &Horizon,
    ) -> Result<Schedule, ScheduleError> {
        let mut schedule = Schedule::new();
        for load in &self.loads {
            let start = load
                .candidates
                .iter()
                .find(|&&(_, x)| assignment.value(x) > 0.5)
                .map(|&(i, _)| i)
                .ok_or_else(|| {
                    ScheduleError::Solver(format!("no start selected for load {}", load.id))
                })?;
            schedule.insert(load.id, horizon.start + start as u64 * horizon.step);
        }
        Ok(schedule)
    }
}

fn in_window(load: &Load, interval: usize, step: u64) -> bool {
    let start = interval as u64 * step;
    let end = start + load.power.len() as u64 * step;
    start >= load.earliest_start && end <= load.latest_end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fitting_intervals_get_binaries() {
        let horizon = Horizon::new(0, 4 * 3600, 3600);
        let loads = vec![Load::new(1, vec![1.0, 1.0, 1.0], 0, 4 * 3600)];
        let mut model = MilpModel::new();
        let grid = StartGrid::build(&mut model, &loads, &horizon, 0.0).expect("fits");
        assert_eq!(model.binary_count(), 2);
        assert_eq!(grid.intervals(), 4);
        assert!(model.constraints().iter().all(|c| c.name != "time_window"));
    }

    #[test]
    fn window_excludes_late_starts() {
        let horizon = Horizon::new(0, 4 * 3600, 3600);
        let loads = vec![Load::new(1, vec![1.0], 0, 2 * 3600)];
        let mut model = MilpModel::new();
        StartGrid::build(&mut model, &loads, &horizon, 0.0).expect("fits");
        let window = model
            .constraints()
            .iter()
            .find(|c| c.name == "time_window")
            .expect("window constraint");
        assert_eq!(window.expr.terms.len(), 2);
    }

    #[test]
    fn empty_window_is_infeasible_before_solving() {
        let horizon = Horizon::new(0, 4 * 3600, 3600);
        let loads = vec![Load::new(1, vec![1.0, 1.0], 3600, 2 * 3600)];
        let err = StartGrid::build(&mut MilpModel::new(), &loads, &horizon, 0.0).unwrap_err();
        assert!(matches!(err, ScheduleError::Infeasible(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let horizon = Horizon::new(0, 4 * 3600, 3600);
        let loads = vec![
            Load::new(1, vec![1.0], 0, 4 * 3600),
            Load::new(1, vec![2.0], 0, 4 * 3600),
        ];
        let err = StartGrid::build(&mut MilpModel::new(), &loads, &horizon, 0.0).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidInput(_)));
    }

    #[test]
    fn demand_shifts_profile_by_start() {
        let horizon = Horizon::new(0, 3 * 3600, 3600);
        let loads = vec![Load::new(1, vec![5.0, 7.0], 0, 3 * 3600)];
        let mut model = MilpModel::new();
        let grid = StartGrid::build(&mut model, &loads, &horizon, 0.0).expect("fits");
        // interval 1 sees sample 1 of a start at 0 and sample 0 of a start at 1
        let coefs: Vec<f64> = grid.demand(1).terms.iter().map(|&(_, c)| c).collect();
        assert_eq!(coefs, vec![7.0, 5.0]);
        assert_eq!(grid.peak_bound(), 7.0);
    }
}
