use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, warn};

use crate::catalog::{Load, SharedCatalog};
use crate::config::Architecture;
use crate::error::PlanningError;
use crate::forecast::resample_signal;
use crate::negotiation::{Externalities, Negotiator, Phase, Replanner};
use crate::plan::EnergyPlan;
use crate::protocol::{
    AgentId, PlanningPayload, PlanningReply, PriceSignal, RealTimePayload, RealTimeReport,
};
use crate::scheduler::{
    Horizon, LoadScheduler, ObjectiveInputs, Schedule, SchedulerSettings, SchedulerVariant,
    to_power_vector,
};
use crate::sim::clock::SimClock;

use super::types::{EntityKind, SmartGridEntity, noisy_reading};

/// The optimizing half of a smart building: loads, optimizer settings and
/// the committed plan.
#[derive(Clone)]
pub struct BuildingPlanner {
    id: AgentId,
    clock: SimClock,
    catalog: SharedCatalog,
    settings: SchedulerSettings,
    max_power: Option<f64>,
    plan: EnergyPlan,
    last_cost: Option<f64>,
}

impl std::fmt::Debug for BuildingPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildingPlanner")
            .field("id", &self.id)
            .field("clock", &self.clock)
            .field("plan", &self.plan)
            .field("last_cost", &self.last_cost)
            .finish_non_exhaustive()
    }
}

impl BuildingPlanner {
    pub fn new(
        id: AgentId,
        clock: SimClock,
        catalog: SharedCatalog,
        settings: SchedulerSettings,
        max_power: Option<f64>,
    ) -> Self {
        Self {
            id,
            clock,
            catalog,
            settings,
            max_power,
            plan: EnergyPlan::default(),
            last_cost: None,
        }
    }

    /// Exact objective value of the last successful optimization.
    pub fn last_cost(&self) -> Option<f64> {
        self.last_cost
    }

    /// Loads to place on `horizon`.
    ///
    /// A midnight horizon takes every load; a restart horizon only those not
    /// started yet. A building absent from the catalog has nothing to place.
    fn loads_for(&self, horizon: &Horizon) -> Result<Vec<Load>, PlanningError> {
        let loads = if horizon.start == 0 {
            self.catalog.get_loads(self.id, horizon)
        } else {
            self.catalog
                .get_loads_in_progress(self.id, horizon, &self.plan.load_schedule)
        };
        match loads {
            Ok(loads) => Ok(loads),
            Err(e @ PlanningError::MissingForecastData { .. }) => {
                warn!(building = self.id, error = %e, "planning without loads");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Power of the loads that started before a restart horizon and are
    /// still running inside it.
    fn running_tail(&self, horizon: &Horizon) -> Vec<f64> {
        let started: Schedule = self
            .plan
            .load_schedule
            .iter()
            .filter(|&(_, &start)| start < horizon.start)
            .map(|(&id, &start)| (id, start))
            .collect();
        if horizon.start == 0 || started.is_empty() {
            return vec![0.0; horizon.intervals()];
        }
        let day = Horizon::day_ahead(horizon.step);
        let loads = self.catalog.building_loads(self.id, horizon.step).unwrap_or_default();
        let day_power = to_power_vector(&started, &loads, &day);
        day_power[horizon.start_index()..].to_vec()
    }

    fn objective_inputs(
        &self,
        price: &PriceSignal,
        externalities: Option<&Externalities>,
        horizon: &Horizon,
    ) -> Result<ObjectiveInputs, PlanningError> {
        let stretch = |name: &str, raw: Option<&[f64]>| -> Result<Option<Vec<f64>>, PlanningError> {
            raw.map(|raw| {
                resample_signal(raw, horizon)
                    .map_err(|e| PlanningError::MalformedMessage(format!("{name}: {e}")))
            })
            .transpose()
        };
        let (quadratic, local) = match price {
            PriceSignal::Vector(_) => (None, None),
            PriceSignal::Components(c) => (c.quad_price.as_deref(), c.local_price.as_deref()),
        };
        Ok(ObjectiveInputs {
            price_energy: stretch("energy_price", price.energy())?,
            price_quadratic: stretch("quad_price", quadratic)?,
            price_local: stretch("local_price", local)?,
            external_consumption: externalities.map(|e| e.consumption.clone()),
            external_generation: externalities.map(|e| e.generation.clone()),
            max_power: self.max_power,
            running_draw: None,
        })
    }
}

impl Replanner for BuildingPlanner {
    fn horizon(&self) -> Horizon {
        Horizon::remaining_day(self.clock.now(), self.clock.step())
    }

    fn replan(
        &mut self,
        price: &PriceSignal,
        externalities: Option<&Externalities>,
    ) -> Result<(), PlanningError> {
        let horizon = self.horizon();
        let loads = self.loads_for(&horizon)?;
        let running = self.running_tail(&horizon);
        let mut inputs = self.objective_inputs(price, externalities, &horizon)?;
        if running.iter().any(|&w| w > 0.0) {
            inputs.running_draw = Some(running.clone());
        }
        let variant = match externalities {
            Some(_) => SchedulerVariant::Interactive,
            None => SchedulerVariant::PriceOnly,
        };

        let outcome = LoadScheduler::new(variant, self.settings)
            .schedule(&loads, &horizon, &inputs)
            .map_err(|source| PlanningError::Schedule {
                agent: self.id,
                source,
            })?;

        let mut power = to_power_vector(&outcome.schedule, &loads, &horizon);
        for (p, running) in power.iter_mut().zip(running) {
            *p += running;
        }
        debug!(
            building = self.id,
            start = horizon.start,
            cost = outcome.cost,
            schedule = ?outcome.schedule,
            "plan committed"
        );
        self.plan.commit(&horizon, power, &outcome.schedule);
        self.last_cost = Some(outcome.cost);
        Ok(())
    }

    fn plan(&self) -> &EnergyPlan {
        &self.plan
    }
}

/// A smart building: shiftable loads scheduled against the tariff and,
/// in decentralized mode, against what its peers announce.
#[derive(Debug, Clone)]
pub struct SmartBuilding {
    architecture: Architecture,
    negotiator: Negotiator,
    planner: BuildingPlanner,
    rng: StdRng,
}

impl SmartBuilding {
    pub fn new(architecture: Architecture, planner: BuildingPlanner, seed: u64) -> Self {
        Self {
            architecture,
            negotiator: Negotiator::new(planner.id),
            planner,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn plan(&self) -> &EnergyPlan {
        self.planner.plan()
    }

    pub fn last_cost(&self) -> Option<f64> {
        self.planner.last_cost()
    }

    pub fn phase(&self) -> Phase {
        self.negotiator.phase()
    }
}

impl SmartGridEntity for SmartBuilding {
    fn id(&self) -> AgentId {
        self.planner.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Building
    }

    fn clock(&self) -> &SimClock {
        &self.planner.clock
    }

    fn advance_time(&mut self) {
        self.planner.clock.tick();
    }

    fn real_time_step(&mut self, _payload: &RealTimePayload) -> RealTimeReport {
        let plan = self.planner.plan();
        let planned = plan.sample_at(self.planner.clock.time_of_day());
        let consumption = noisy_reading(&mut self.rng, planned, plan.peak());
        RealTimeReport {
            consumption: Some(consumption),
            ..RealTimeReport::default()
        }
    }

    fn planning_step(
        &mut self,
        payload: &PlanningPayload,
    ) -> Result<Option<PlanningReply>, PlanningError> {
        let reply = match self.architecture {
            Architecture::Decentralized => self.negotiator.handle(payload, &mut self.planner)?,
            Architecture::Centralized => {
                self.negotiator.handle_centralized(payload, &mut self.planner)?
            }
        };
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::ConfigCatalog;
    use crate::config::{BuildingConfig, LoadConfig, ScenarioConfig};
    use crate::error::ScheduleError;
    use crate::forecast::SECONDS_PER_DAY;
    use crate::protocol::PlanningSignal;

    fn scenario(loads: Vec<LoadConfig>) -> ScenarioConfig {
        ScenarioConfig {
            buildings: vec![BuildingConfig { id: 1, loads }],
            ..ScenarioConfig::default()
        }
    }

    fn load(id: u32, quarters: usize, earliest_h: u64, latest_h: u64) -> LoadConfig {
        LoadConfig {
            id,
            power: vec![1000.0; quarters],
            earliest_start_s: earliest_h * 3600,
            latest_end_s: latest_h * 3600,
        }
    }

    fn building(cfg: &ScenarioConfig, start: u64, architecture: Architecture) -> SmartBuilding {
        let planner = BuildingPlanner::new(
            1,
            SimClock::new(start, 3600, SECONDS_PER_DAY),
            Arc::new(ConfigCatalog::from_config(cfg)),
            SchedulerSettings::default(),
            None,
        );
        SmartBuilding::new(architecture, planner, 5)
    }

    fn flat_price() -> PriceSignal {
        PriceSignal::Vector(vec![0.1; 24])
    }

    #[test]
    fn start_schedules_every_load_in_its_window() {
        let cfg = scenario(vec![load(1, 4, 3, 6), load(2, 8, 20, 24)]);
        let mut sb = building(&cfg, 0, Architecture::Decentralized);
        let reply = sb
            .planning_step(&PlanningPayload::start(flat_price()))
            .unwrap()
            .unwrap();
        assert_eq!(reply.signal, PlanningSignal::Start);
        assert_eq!(sb.plan().load_schedule, Schedule::from([(1, 3 * 3600), (2, 20 * 3600)]));
        assert_eq!(sb.plan().forecast_data[3], 1000.0);
        assert_eq!(sb.plan().forecast_data[21], 1000.0);
        assert!(sb.last_cost().is_some());
        assert_eq!(sb.phase(), Phase::AwaitingPrice);
    }

    #[test]
    fn real_time_follows_the_plan() {
        let cfg = scenario(vec![load(1, 4, 0, 1)]);
        let mut sb = building(&cfg, 0, Architecture::Centralized);
        sb.planning_step(&PlanningPayload::data().with_price(flat_price()))
            .unwrap();
        assert_eq!(sb.plan().forecast_data[0], 1000.0);

        let busy = sb.real_time_step(&RealTimePayload::default()).consumption.unwrap();
        assert!((busy - 1000.0).abs() < 500.0);
        sb.advance_time();
        let idle = sb.real_time_step(&RealTimePayload::default()).consumption.unwrap();
        assert!((0.0..500.0).contains(&idle));
    }

    #[test]
    fn unknown_building_plans_nothing() {
        let mut sb = building(&ScenarioConfig::default(), 0, Architecture::Decentralized);
        let reply = sb
            .planning_step(&PlanningPayload::start(flat_price()))
            .unwrap()
            .unwrap();
        let slice = reply.consumption.unwrap();
        assert_eq!(slice.forecast_data, Some(vec![0.0; 24]));
    }

    #[test]
    fn restart_keeps_running_loads() {
        let cfg = scenario(vec![load(1, 16, 8, 12), load(2, 4, 9, 18)]);
        let mut sb = building(&cfg, 0, Architecture::Centralized);
        let cheap_early = PriceSignal::Vector((0..24).map(f64::from).collect());
        sb.planning_step(&PlanningPayload::data().with_price(cheap_early.clone()))
            .unwrap();
        assert_eq!(sb.plan().load_schedule, Schedule::from([(1, 8 * 3600), (2, 9 * 3600)]));

        for _ in 0..10 {
            sb.advance_time();
        }
        // both loads started before 10:00; nothing left to move
        sb.planning_step(&PlanningPayload::data().with_price(cheap_early))
            .unwrap();
        let plan = sb.plan();
        assert_eq!(plan.forecast_data.len(), 24);
        assert_eq!(plan.forecast_data[9], 2000.0);
        assert_eq!(plan.forecast_data[10], 1000.0);
        assert_eq!(plan.forecast_data[11], 1000.0);
        assert_eq!(plan.forecast_data[12], 0.0);
    }

    #[test]
    fn restart_respects_the_cap_next_to_running_loads() {
        let cfg = scenario(vec![load(1, 16, 8, 12), load(2, 4, 8, 20)]);
        let planner = BuildingPlanner::new(
            1,
            SimClock::new(0, 3600, SECONDS_PER_DAY),
            Arc::new(ConfigCatalog::from_config(&cfg)),
            SchedulerSettings::default(),
            Some(1000.0),
        );
        let mut sb = SmartBuilding::new(Architecture::Centralized, planner, 5);
        let cheap_early = PriceSignal::Vector((0..24).map(f64::from).collect());
        sb.planning_step(&PlanningPayload::data().with_price(cheap_early))
            .unwrap();
        assert_eq!(sb.plan().load_schedule, Schedule::from([(1, 8 * 3600), (2, 12 * 3600)]));

        for _ in 0..9 {
            sb.advance_time();
        }
        let mut cheap_ten = vec![1.0; 24];
        cheap_ten[10] = 0.0;
        sb.planning_step(&PlanningPayload::data().with_price(PriceSignal::Vector(cheap_ten)))
            .unwrap();
        let plan = sb.plan();
        assert!(plan.load_schedule[&2] >= 12 * 3600);
        assert!(plan.forecast_data.iter().all(|&w| w <= 1000.0));
        assert_eq!(plan.forecast_data[10], 1000.0);
    }

    #[test]
    fn restart_moves_pending_loads_only() {
        let cfg = scenario(vec![load(1, 4, 0, 24), load(2, 4, 12, 24)]);
        let mut sb = building(&cfg, 0, Architecture::Centralized);
        let mut price = vec![1.0; 24];
        price[2] = 0.0;
        price[20] = 0.5;
        sb.planning_step(&PlanningPayload::data().with_price(PriceSignal::Vector(price)))
            .unwrap();
        assert_eq!(sb.plan().load_schedule, Schedule::from([(1, 2 * 3600), (2, 20 * 3600)]));

        for _ in 0..6 {
            sb.advance_time();
        }
        let mut later = vec![1.0; 24];
        later[15] = 0.0;
        sb.planning_step(&PlanningPayload::data().with_price(PriceSignal::Vector(later)))
            .unwrap();
        let schedule = &sb.plan().load_schedule;
        assert_eq!(schedule[&1], 2 * 3600);
        assert_eq!(schedule[&2], 15 * 3600);
        let plan = &sb.plan().forecast_data;
        assert_eq!(plan[2], 1000.0);
        assert_eq!(plan[15], 1000.0);
        assert_eq!(plan[20], 0.0);
    }

    #[test]
    fn infeasible_cap_keeps_previous_plan() {
        let cfg = scenario(vec![load(1, 4, 0, 24)]);
        let catalog: SharedCatalog = Arc::new(ConfigCatalog::from_config(&cfg));
        let planner = BuildingPlanner::new(
            1,
            SimClock::new(0, 3600, SECONDS_PER_DAY),
            catalog,
            SchedulerSettings::default(),
            Some(10.0),
        );
        let mut sb = SmartBuilding::new(Architecture::Decentralized, planner, 0);
        let err = sb
            .planning_step(&PlanningPayload::start(flat_price()))
            .unwrap_err();
        assert!(matches!(
            err,
            PlanningError::Schedule {
                agent: 1,
                source: ScheduleError::Infeasible(_)
            }
        ));
        assert!(sb.plan().is_empty());
        assert_eq!(sb.phase(), Phase::Idle);
    }

    #[test]
    fn misaligned_price_is_malformed() {
        let cfg = scenario(vec![load(1, 4, 0, 24)]);
        let mut sb = building(&cfg, 0, Architecture::Decentralized);
        let err = sb
            .planning_step(&PlanningPayload::start(PriceSignal::Vector(vec![1.0; 7])))
            .unwrap_err();
        assert!(matches!(err, PlanningError::MalformedMessage(_)));
    }
}
