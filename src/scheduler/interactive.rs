//! Interactive formulation.
//!
//! Besides the energy price, the building sees what the rest of the community
//! consumes and generates. Surplus community generation can cover part of the
//! building's draw at the local price; the rest is bought from the main grid,
//! where a quadratic price term makes stacking on top of the community's
//! residual demand progressively more expensive.

use tracing::debug;

use crate::catalog::Load;
use crate::error::ScheduleError;

use super::model::{LinearExpr, MilpModel, Relation};
use super::solver::MilpSolver;
use super::starts::StartGrid;
use super::{
    Horizon, ObjectiveInputs, ScheduleOutcome, SchedulerSettings, solve_checked, to_power_vector,
};

/// Per-interval community figures derived from the externalities.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityBalance {
    /// `max(ext_cons − ext_gen, 0)`: what the others already buy from the grid.
    pub external_grid_consumption: Vec<f64>,
    /// `max(ext_gen − ext_cons, 0)`: generation nobody else uses.
    pub remaining_generation: Vec<f64>,
}

impl CommunityBalance {
    pub fn from_inputs(inputs: &ObjectiveInputs, intervals: usize) -> Self {
        let zeros = vec![0.0; intervals];
        let consumption = inputs.external_consumption.as_deref().unwrap_or(&zeros);
        let generation = inputs.external_generation.as_deref().unwrap_or(&zeros);
        let (external_grid_consumption, remaining_generation) = consumption
            .iter()
            .zip(generation)
            .map(|(c, g)| ((c - g).max(0.0), (g - c).max(0.0)))
            .unzip();
        Self {
            external_grid_consumption,
            remaining_generation,
        }
    }
}

/// Price coefficients at one interval, already divided by the power scale.
struct Prices {
    energy: f64,
    quadratic: f64,
    local: f64,
}

impl Prices {
    fn at(inputs: &ObjectiveInputs, i: usize, scale: f64) -> Self {
        let pick = |v: &Option<Vec<f64>>| v.as_ref().map_or(0.0, |v| v[i]);
        Self {
            energy: pick(&inputs.price_energy) / scale,
            quadratic: pick(&inputs.price_quadratic) / (scale * scale),
            local: pick(&inputs.price_local) / scale,
        }
    }

    fn cost(&self, grid_share: f64, local_share: f64, egc: f64) -> f64 {
        self.energy * (grid_share + egc)
            + self.local * local_share
            + self.quadratic * (grid_share * grid_share + 2.0 * grid_share * egc)
    }
}

pub(super) fn schedule<S: MilpSolver>(
    solver: &S,
    settings: &SchedulerSettings,
    loads: &[Load],
    horizon: &Horizon,
    inputs: &ObjectiveInputs,
) -> Result<ScheduleOutcome, ScheduleError> {
    let mut model = MilpModel::new();
    let grid = StartGrid::build(&mut model, loads, horizon, settings.tie_break_weight)?;
    let balance = CommunityBalance::from_inputs(inputs, grid.intervals());
    let committed_peak = (0..grid.intervals())
        .map(|i| inputs.running_at(i))
        .fold(0.0, f64::max);
    let peak = grid.peak_bound() + committed_peak;
    debug!(
        grid_consumption = ?balance.external_grid_consumption,
        remaining_generation = ?balance.remaining_generation,
        "externalities"
    );

    for i in 0..grid.intervals() {
        let egc = balance.external_grid_consumption[i];
        let running = inputs.running_at(i);
        let prices = Prices::at(inputs, i, settings.power_scale);

        let y = model.add_continuous(0.0, None);
        let y_main = model.add_continuous(0.0, Some(peak));
        let y_res = model.add_continuous(0.0, None);
        let demand = grid.demand(i);

        let mut split = demand.clone();
        split.add(y_main, -1.0).add(y_res, -1.0);
        model.add_constraint("balance", split, Relation::Eq, -running);
        model.add_constraint(
            "local_generation",
            LinearExpr::new().with(y_res, 1.0),
            Relation::Le,
            balance.remaining_generation[i],
        );
        model.add_constraint(
            "grid_draw",
            LinearExpr::new().with(y, 1.0).with(y_main, -1.0),
            Relation::Eq,
            egc,
        );
        if let Some(cap) = inputs.max_power {
            model.add_constraint("max_power", demand, Relation::Le, cap - running);
        }

        model.minimise_linear(y, prices.energy);
        model.minimise_linear(y_res, prices.local);
        model.minimise_linear(y_main, 2.0 * prices.quadratic * egc);
        model.minimise_quadratic(y_main, prices.quadratic);
    }

    let assignment = solve_checked(solver, &model)?;
    let schedule = grid.decode(&assignment, horizon)?;
    let draw = inputs.with_running(to_power_vector(&schedule, loads, horizon));
    let cost = exact_cost(&draw, settings, inputs);
    debug!(cost, binaries = model.binary_count(), "interactive schedule solved");
    Ok(ScheduleOutcome { schedule, cost })
}

/// True objective value of `draw`, with the cheapest split of each interval's
/// draw between the main grid and the community surplus.
pub fn exact_cost(draw: &[f64], settings: &SchedulerSettings, inputs: &ObjectiveInputs) -> f64 {
    let balance = CommunityBalance::from_inputs(inputs, draw.len());
    draw.iter()
        .enumerate()
        .map(|(i, &d)| {
            let prices = Prices::at(inputs, i, settings.power_scale);
            let egc = balance.external_grid_consumption[i];
            let local_cap = d.min(balance.remaining_generation[i]);
            let local = if prices.quadratic > 0.0 {
                // the marginal grid price 2q(m + egc) + p meets the local price
                let grid_target = (prices.local - prices.energy) / (2.0 * prices.quadratic) - egc;
                (d - grid_target).clamp(0.0, local_cap)
            } else if prices.local < prices.energy {
                local_cap
            } else {
                0.0
            };
            prices.cost(d - local, local, egc)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{LoadScheduler, SchedulerVariant};

    fn scheduler() -> LoadScheduler {
        LoadScheduler::new(SchedulerVariant::Interactive, SchedulerSettings::default())
    }

    #[test]
    fn balance_clips_at_zero() {
        let inputs = ObjectiveInputs {
            external_consumption: Some(vec![3.0, 1.0]),
            external_generation: Some(vec![1.0, 4.0]),
            ..ObjectiveInputs::default()
        };
        let balance = CommunityBalance::from_inputs(&inputs, 2);
        assert_eq!(balance.external_grid_consumption, vec![2.0, 0.0]);
        assert_eq!(balance.remaining_generation, vec![0.0, 3.0]);
    }

    #[test]
    fn quadratic_price_avoids_community_peak() {
        let horizon = Horizon::new(0, 4 * 3600, 3600);
        let loads = vec![Load::new(1, vec![1000.0], 0, 4 * 3600)];
        let inputs = ObjectiveInputs {
            price_energy: Some(vec![1.0; 4]),
            price_quadratic: Some(vec![1.0; 4]),
            external_consumption: Some(vec![3000.0, 2000.0, 0.0, 1000.0]),
            ..ObjectiveInputs::default()
        };

        let outcome = scheduler().schedule(&loads, &horizon, &inputs).expect("feasible");
        assert_eq!(outcome.schedule[&1], 2 * 3600);
    }

    #[test]
    fn cheap_local_surplus_attracts_the_load() {
        let horizon = Horizon::new(0, 4 * 3600, 3600);
        let loads = vec![Load::new(1, vec![500.0, 500.0], 0, 4 * 3600)];
        let inputs = ObjectiveInputs {
            price_energy: Some(vec![1.0; 4]),
            price_local: Some(vec![0.1; 4]),
            external_generation: Some(vec![0.0, 0.0, 600.0, 600.0]),
            ..ObjectiveInputs::default()
        };

        let outcome = scheduler().schedule(&loads, &horizon, &inputs).expect("feasible");
        assert_eq!(outcome.schedule[&1], 2 * 3600);
        // 2 × 500 W from the surplus: 1000 W × 0.1 / 1000 = 0.1
        assert!((outcome.cost - 0.1).abs() < 1e-9);
    }

    #[test]
    fn running_draw_counts_against_the_cap() {
        let horizon = Horizon::new(0, 3 * 3600, 3600);
        let loads = vec![Load::new(1, vec![1000.0], 0, 3 * 3600)];
        let inputs = ObjectiveInputs {
            price_energy: Some(vec![0.0, 1.0, 2.0]),
            max_power: Some(1000.0),
            running_draw: Some(vec![1000.0, 0.0, 0.0]),
            ..ObjectiveInputs::default()
        };

        let outcome = scheduler().schedule(&loads, &horizon, &inputs).expect("feasible");
        assert_eq!(outcome.schedule[&1], 3600);
        assert!((outcome.cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_inputs_give_identical_cost() {
        let horizon = Horizon::new(0, 6 * 3600, 3600);
        let loads = vec![
            Load::new(1, vec![800.0, 400.0], 0, 6 * 3600),
            Load::new(2, vec![300.0, 300.0, 300.0], 3600, 6 * 3600),
        ];
        let inputs = ObjectiveInputs {
            price_energy: Some(vec![2.0, 1.0, 1.0, 3.0, 1.0, 2.0]),
            price_quadratic: Some(vec![0.5; 6]),
            price_local: Some(vec![0.5; 6]),
            external_consumption: Some(vec![500.0, 0.0, 900.0, 0.0, 100.0, 0.0]),
            external_generation: Some(vec![0.0, 700.0, 0.0, 0.0, 300.0, 0.0]),
            max_power: Some(1500.0),
            running_draw: None,
        };

        let first = scheduler().schedule(&loads, &horizon, &inputs).expect("feasible");
        let second = scheduler().schedule(&loads, &horizon, &inputs).expect("feasible");
        assert_eq!(first.cost, second.cost);
        assert_eq!(first.schedule, second.schedule);
    }

    #[test]
    fn exact_cost_splits_draw_at_marginal_price() {
        // p = 1, q = 1, l = 3 (per kW): grid share grows until 2q(m + egc) + p = l
        let inputs = ObjectiveInputs {
            price_energy: Some(vec![1.0]),
            price_quadratic: Some(vec![1.0]),
            price_local: Some(vec![3.0]),
            external_generation: Some(vec![5000.0]),
            ..ObjectiveInputs::default()
        };
        let cost = exact_cost(&[2000.0], &SchedulerSettings::default(), &inputs);
        // m = 1 kW, r = 1 kW: 1 + 1 + 3
        assert!((cost - 5.0).abs() < 1e-9);
    }
}
