//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use microgrid_sim::catalog::{ConfigCatalog, Load};
use microgrid_sim::config::{BuildingConfig, LoadConfig, ScenarioConfig};
use microgrid_sim::entities::{Entity, build_community};
use microgrid_sim::scheduler::Horizon;
use microgrid_sim::sim::clock::SimClock;
use microgrid_sim::sim::coordinator::{Coordinator, CoordinatorSettings};
use microgrid_sim::sim::runtime::InlineLink;

pub const HOUR: u64 = 3600;

/// A catalog load of `hours` whole hours at constant `watts`.
pub fn hourly_load(id: u32, watts: f64, hours: usize, earliest_h: u64, latest_h: u64) -> LoadConfig {
    LoadConfig {
        id,
        power: vec![watts; hours * 4],
        earliest_start_s: earliest_h * HOUR,
        latest_end_s: latest_h * HOUR,
    }
}

/// A scheduler load already at the hourly step.
pub fn load(id: u32, power: Vec<f64>, earliest_h: u64, latest_h: u64) -> Load {
    Load::new(id, power, earliest_h * HOUR, latest_h * HOUR)
}

/// One day at the hourly step.
pub fn day() -> Horizon {
    Horizon::day_ahead(HOUR)
}

/// Two identical buildings, two 4-hour loads each, flat tariff with a
/// quadratic grid price and no DER.
pub fn symmetric_pair() -> ScenarioConfig {
    let mut cfg = ScenarioConfig::default();
    cfg.simulation.max_messages_per_building = 10;
    cfg.price.energy_price = vec![0.1; 24];
    cfg.price.quad_price = Some(vec![0.05; 24]);
    cfg.buildings = vec![
        BuildingConfig {
            id: 1,
            loads: vec![
                hourly_load(11, 2000.0, 4, 0, 24),
                hourly_load(12, 2000.0, 4, 0, 24),
            ],
        },
        BuildingConfig {
            id: 2,
            loads: vec![
                hourly_load(21, 2000.0, 4, 0, 24),
                hourly_load(22, 2000.0, 4, 0, 24),
            ],
        },
    ];
    cfg
}

/// A deterministic coordinator with every agent running inline.
pub fn inline_coordinator(cfg: &ScenarioConfig) -> Coordinator<InlineLink<Entity>> {
    let entities = build_community(cfg, &ConfigCatalog::shared(cfg));
    let sim = &cfg.simulation;
    Coordinator::new(
        CoordinatorSettings::from_config(cfg),
        SimClock::new(sim.start_time_s, sim.step_s, sim.duration_s),
        entities.into_iter().map(InlineLink::new),
    )
    .expect("scenario has a manager")
}
