//! Builds a community from a scenario and runs it to completion.

use crate::catalog::{ConfigCatalog, SharedCatalog};
use crate::config::ScenarioConfig;
use crate::entities::{Entity, build_community};
use crate::error::SimError;
use crate::sim::clock::SimClock;
use crate::sim::coordinator::{Coordinator, CoordinatorSettings, RunSummary};
use crate::sim::runtime::{AgentLink, InlineLink, ThreadedLink};

/// How agents are hosted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hosting {
    /// One OS thread per agent.
    #[default]
    Threaded,
    /// Every agent on the caller's thread, deterministic interleaving.
    Inline,
}

/// Runs a scenario with the configuration's own load catalog.
///
/// # Errors
///
/// Returns a `SimError` if the run fails; see [`Coordinator::run`].
pub fn run_scenario(cfg: &ScenarioConfig, hosting: Hosting) -> Result<RunSummary, SimError> {
    run_with_catalog(cfg, &ConfigCatalog::shared(cfg), hosting)
}

/// Runs a scenario whose buildings read their loads from `catalog`.
///
/// # Errors
///
/// Returns a `SimError` if the run fails.
pub fn run_with_catalog(
    cfg: &ScenarioConfig,
    catalog: &SharedCatalog,
    hosting: Hosting,
) -> Result<RunSummary, SimError> {
    let entities = build_community(cfg, catalog);
    match hosting {
        Hosting::Threaded => drive(cfg, entities.into_iter().map(ThreadedLink::spawn)),
        Hosting::Inline => drive(cfg, entities.into_iter().map(InlineLink::<Entity>::new)),
    }
}

fn drive<L: AgentLink>(
    cfg: &ScenarioConfig,
    links: impl IntoIterator<Item = L>,
) -> Result<RunSummary, SimError> {
    let sim = &cfg.simulation;
    let clock = SimClock::new(sim.start_time_s, sim.step_s, sim.duration_s);
    let mut coordinator = Coordinator::new(CoordinatorSettings::from_config(cfg), clock, links)?;
    coordinator.run()
}
