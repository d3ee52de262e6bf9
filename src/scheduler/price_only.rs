//! Price-only formulation: the building minimises its energy bill under a
//! power cap, ignoring what the rest of the community does.

use tracing::debug;

use crate::catalog::Load;
use crate::error::ScheduleError;

use super::model::{LinearExpr, MilpModel, Relation};
use super::solver::MilpSolver;
use super::starts::StartGrid;
use super::{
    Horizon, ObjectiveInputs, ScheduleOutcome, SchedulerSettings, solve_checked, to_power_vector,
};

pub(super) fn schedule<S: MilpSolver>(
    solver: &S,
    settings: &SchedulerSettings,
    loads: &[Load],
    horizon: &Horizon,
    inputs: &ObjectiveInputs,
) -> Result<ScheduleOutcome, ScheduleError> {
    let mut model = MilpModel::new();
    let grid = StartGrid::build(&mut model, loads, horizon, settings.tie_break_weight)?;
    let scale = settings.power_scale;

    for i in 0..grid.intervals() {
        let y = model.add_continuous(0.0, None);
        let mut balance = grid.demand(i);
        balance.add(y, -1.0);
        model.add_constraint("balance", balance, Relation::Eq, -inputs.running_at(i));

        if let Some(price) = &inputs.price_energy {
            model.minimise_linear(y, price[i] / scale);
        }

        if let Some(cap) = inputs.max_power {
            match settings.peak_penalty {
                Some(penalty) => {
                    let slack = model.add_continuous(0.0, None);
                    model.add_constraint(
                        "max_power",
                        LinearExpr::new().with(y, 1.0).with(slack, -1.0),
                        Relation::Le,
                        cap,
                    );
                    model.minimise_linear(slack, penalty);
                }
                None => {
                    model.add_constraint("max_power", LinearExpr::new().with(y, 1.0), Relation::Le, cap)
                }
            }
        }
    }

    let assignment = solve_checked(solver, &model)?;
    let schedule = grid.decode(&assignment, horizon)?;
    let draw = inputs.with_running(to_power_vector(&schedule, loads, horizon));
    let cost = exact_cost(&draw, settings, inputs);
    debug!(cost, binaries = model.binary_count(), "price-only schedule solved");
    Ok(ScheduleOutcome { schedule, cost })
}

/// Energy bill of `draw` plus the peak penalty on any excess over the cap.
pub fn exact_cost(draw: &[f64], settings: &SchedulerSettings, inputs: &ObjectiveInputs) -> f64 {
    draw.iter()
        .enumerate()
        .map(|(i, &d)| {
            let energy = inputs
                .price_energy
                .as_ref()
                .map_or(0.0, |price| price[i] * d / settings.power_scale);
            let excess = match (inputs.max_power, settings.peak_penalty) {
                (Some(cap), Some(penalty)) => penalty * (d - cap).max(0.0),
                _ => 0.0,
            };
            energy + excess
        })
        .sum()
}
