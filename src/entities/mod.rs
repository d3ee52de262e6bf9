//! Grid entities driven by the coordinator: the microgrid manager,
//! distributed energy resources and smart buildings.

/// Smart building: load scheduling and negotiation.
pub mod building;
/// Distributed energy resource with a faultable forecast.
pub mod der;
/// Microgrid manager publishing the tariff.
pub mod manager;
pub mod types;

pub use building::{BuildingPlanner, SmartBuilding};
pub use der::DistributedEnergyResource;
pub use manager::MicrogridManager;
pub use types::{EntityKind, SmartGridEntity};

use crate::catalog::SharedCatalog;
use crate::config::ScenarioConfig;
use crate::error::PlanningError;
use crate::protocol::{AgentId, PlanningPayload, PlanningReply, RealTimePayload, RealTimeReport};
use crate::sim::clock::SimClock;

/// Any entity of the community.
#[derive(Debug, Clone)]
pub enum Entity {
    Manager(MicrogridManager),
    Der(DistributedEnergyResource),
    Building(SmartBuilding),
}

impl Entity {
    fn inner(&self) -> &dyn SmartGridEntity {
        match self {
            Self::Manager(e) => e,
            Self::Der(e) => e,
            Self::Building(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SmartGridEntity {
        match self {
            Self::Manager(e) => e,
            Self::Der(e) => e,
            Self::Building(e) => e,
        }
    }
}

impl SmartGridEntity for Entity {
    fn id(&self) -> AgentId {
        self.inner().id()
    }

    fn kind(&self) -> EntityKind {
        self.inner().kind()
    }

    fn clock(&self) -> &SimClock {
        self.inner().clock()
    }

    fn advance_time(&mut self) {
        self.inner_mut().advance_time();
    }

    fn real_time_step(&mut self, payload: &RealTimePayload) -> RealTimeReport {
        self.inner_mut().real_time_step(payload)
    }

    fn planning_step(
        &mut self,
        payload: &PlanningPayload,
    ) -> Result<Option<PlanningReply>, PlanningError> {
        self.inner_mut().planning_step(payload)
    }
}

/// Instantiates the manager, every DER and every building of a scenario.
///
/// Entities are returned manager first, then DERs, then buildings, each
/// group in configuration order. Every entity gets its own clock and a
/// noise seed derived from the scenario seed and its id.
pub fn build_community(cfg: &ScenarioConfig, catalog: &SharedCatalog) -> Vec<Entity> {
    let sim = &cfg.simulation;
    let clock = || SimClock::new(sim.start_time_s, sim.step_s, sim.duration_s);

    let mut entities = vec![Entity::Manager(MicrogridManager::new(
        sim.manager_id,
        clock(),
        cfg.price.energy_price.clone(),
    ))];
    entities.extend(
        cfg.ders
            .iter()
            .map(|der| Entity::Der(DistributedEnergyResource::from_config(der, sim))),
    );
    entities.extend(cfg.buildings.iter().map(|b| {
        let planner = BuildingPlanner::new(
            b.id,
            clock(),
            SharedCatalog::clone(catalog),
            cfg.scheduler_settings(),
            cfg.scheduler.max_power_w,
        );
        Entity::Building(SmartBuilding::new(
            sim.architecture,
            planner,
            sim.seed.wrapping_add(u64::from(b.id)),
        ))
    }));
    entities
}
