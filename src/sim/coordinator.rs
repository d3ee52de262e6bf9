//! The round driver: paces the simulation, cascades real-time steps and
//! runs planning phases over the agent links.
//!
//! Every step the manager is asked for the price first, then the DERs, then
//! the buildings. A planning phase runs before the step whenever the clock
//! is a multiple of the planning frequency, at the very first step, and in
//! decentralized mode after a DER asked for one.

use std::collections::{BTreeMap, BTreeSet};

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tracing::{debug, info, warn};

use crate::config::{Architecture, PlanningOrder, ScenarioConfig};
use crate::entities::EntityKind;
use crate::error::{PlanningError, SimError};
use crate::protocol::{
    AgentId, AgentMessage, CoordinatorMessage, Envelope, ForecastSlice, PlanningPayload,
    PlanningReply, PlanningSignal, PriceSignal, RealTimePayload, RealTimeReport,
};

use super::clock::SimClock;
use super::kpi::KpiReport;
use super::runtime::{AgentLink, AgentOutput};
use super::types::{PlanningOutcome, StepRecord};

/// Parameters of the round driver.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub architecture: Architecture,
    pub planning_order: PlanningOrder,
    pub max_messages_per_building: usize,
    pub planning_frequency: u64,
    /// Tariff broadcast with decentralized START messages.
    pub price: PriceSignal,
    pub seed: u64,
}

impl CoordinatorSettings {
    pub fn from_config(cfg: &ScenarioConfig) -> Self {
        let sim = &cfg.simulation;
        Self {
            architecture: sim.architecture,
            planning_order: sim.planning_order,
            max_messages_per_building: sim.max_messages_per_building,
            planning_frequency: sim.planning_frequency_s,
            price: cfg.price_signal(),
            seed: sim.seed,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub planning: Vec<PlanningOutcome>,
    pub steps: Vec<StepRecord>,
    pub kpis: KpiReport,
}

/// Drives a community of agents through real-time steps and planning phases.
#[derive(Debug)]
pub struct Coordinator<L: AgentLink> {
    settings: CoordinatorSettings,
    clock: SimClock,
    manager: L,
    ders: Vec<L>,
    buildings: Vec<L>,
    rng: StdRng,
    planning_requested: bool,
    planning: Vec<PlanningOutcome>,
    steps: Vec<StepRecord>,
}

impl<L: AgentLink> Coordinator<L> {
    /// Sorts the links by role. Buildings are kept in ascending id order.
    ///
    /// # Errors
    ///
    /// [`SimError::NoManager`] if no link leads to a manager.
    pub fn new(
        settings: CoordinatorSettings,
        clock: SimClock,
        links: impl IntoIterator<Item = L>,
    ) -> Result<Self, SimError> {
        let mut manager = None;
        let mut ders = Vec::new();
        let mut buildings = Vec::new();
        for link in links {
            match link.kind() {
                EntityKind::Manager if manager.is_none() => manager = Some(link),
                EntityKind::Manager => warn!(agent = link.id(), "ignoring extra manager"),
                EntityKind::Der => ders.push(link),
                EntityKind::Building => buildings.push(link),
            }
        }
        let manager = manager.ok_or(SimError::NoManager)?;
        buildings.sort_by_key(|b| b.id());
        let rng = StdRng::seed_from_u64(settings.seed);
        Ok(Self {
            settings,
            clock,
            manager,
            ders,
            buildings,
            rng,
            planning_requested: false,
            planning: Vec::new(),
            steps: Vec::new(),
        })
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn buildings(&self) -> &[L] {
        &self.buildings
    }

    pub fn ders(&self) -> &[L] {
        &self.ders
    }

    pub fn planning_outcomes(&self) -> &[PlanningOutcome] {
        &self.planning
    }

    /// Asks every agent to announce itself and returns how many did.
    ///
    /// # Errors
    ///
    /// [`PlanningError::AgentGone`] if an agent cannot be reached.
    pub fn connect(&mut self) -> Result<usize, SimError> {
        let mut registered = 0;
        for link in self.all_links() {
            if let AgentOutput::Reply(envelope) = link.request(CoordinatorMessage::NewConnection)? {
                debug!(agent = envelope.sender, "new connection");
                registered += 1;
            }
        }
        info!(registered, "community connected");
        Ok(registered)
    }

    /// Runs one step: an optional planning phase, then the real-time cascade.
    ///
    /// # Returns
    ///
    /// The step's record, or `None` once the clock has reached its end.
    ///
    /// # Errors
    ///
    /// Optimizer failures end the planning phase and are returned.
    pub fn step(&mut self) -> Result<Option<StepRecord>, SimError> {
        if self.clock.is_finished() {
            return Ok(None);
        }
        let time = self.clock.now();
        if self.should_plan(time) {
            let outcome = self.plan(time)?;
            info!("{outcome}");
            self.planning.push(outcome);
        }
        let record = self.real_time_step(time)?;
        self.planning_requested = record.planning_requested;
        self.steps.push(record.clone());
        self.clock.tick();
        Ok(Some(record))
    }

    /// Connects the agents, steps until the end of the clock, then stops
    /// every agent.
    ///
    /// # Errors
    ///
    /// The first planning failure or unreachable agent.
    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        self.connect()?;
        while self.step()?.is_some() {}
        self.stop();
        let dt_hours = self.clock.step() as f64 / 3600.0;
        Ok(RunSummary {
            planning: self.planning.clone(),
            steps: self.steps.clone(),
            kpis: KpiReport::from_records(&self.steps, dt_hours),
        })
    }

    /// Sends `STOP` to every agent.
    pub fn stop(&mut self) {
        for link in self.all_links() {
            let id = link.id();
            if let Err(e) = link.request(CoordinatorMessage::Stop) {
                debug!(agent = id, error = %e, "agent already gone");
            }
        }
    }

    fn all_links(&mut self) -> impl Iterator<Item = &mut L> {
        std::iter::once(&mut self.manager)
            .chain(self.ders.iter_mut())
            .chain(self.buildings.iter_mut())
    }

    fn should_plan(&self, time: u64) -> bool {
        if self.steps.is_empty() || time % self.settings.planning_frequency.max(1) == 0 {
            return true;
        }
        if self.planning_requested {
            match self.settings.architecture {
                Architecture::Decentralized => {
                    info!(time, "explicit planning request");
                    return true;
                }
                Architecture::Centralized => {
                    debug!(time, "planning request ignored in centralized mode");
                }
            }
        }
        false
    }

    /// Runs a planning phase now, whatever the schedule.
    ///
    /// # Errors
    ///
    /// Optimizer failures and unreachable agents.
    pub fn plan(&mut self, time: u64) -> Result<PlanningOutcome, SimError> {
        match self.settings.architecture {
            Architecture::Decentralized => self.plan_decentralized(time),
            Architecture::Centralized => self.plan_centralized(time),
        }
    }

    fn real_time_step(&mut self, time: u64) -> Result<StepRecord, SimError> {
        let price = real_time(&mut self.manager, RealTimePayload::default())?.and_then(|r| r.price);
        let payload = RealTimePayload { price };
        let mut record = StepRecord {
            time,
            price: price.unwrap_or(0.0),
            ..StepRecord::default()
        };
        for der in &mut self.ders {
            if let Some(report) = real_time(der, payload.clone())? {
                record.generation_w += report.generation.unwrap_or(0.0);
                record.planning_requested |= report.planning_request;
            }
        }
        for sb in &mut self.buildings {
            if let Some(report) = real_time(sb, payload.clone())? {
                record.consumption_w += report.consumption.unwrap_or(0.0);
            }
        }
        debug!(
            time,
            price = record.price,
            consumption = record.consumption_w,
            generation = record.generation_w,
            "real-time step"
        );
        Ok(record)
    }

    /// Indices of the buildings in visiting order.
    fn visit_order(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.buildings.len()).collect();
        match self.settings.planning_order {
            PlanningOrder::Asc => {}
            PlanningOrder::Desc => order.reverse(),
            PlanningOrder::Random => order.shuffle(&mut self.rng),
        }
        order
    }

    fn plan_decentralized(&mut self, time: u64) -> Result<PlanningOutcome, SimError> {
        let mut generation = BTreeMap::new();
        for der in &mut self.ders {
            let reply = planning(der, PlanningPayload::new(PlanningSignal::Start))?;
            if let Some(slice) = reply.and_then(|r| r.generation) {
                generation.insert(der.id(), slice);
            }
        }

        let mut start = PlanningPayload::start(self.settings.price.clone());
        if !generation.is_empty() {
            start = start.with_generation(generation.clone());
        }
        let mut consumption = BTreeMap::new();
        for sb in &mut self.buildings {
            let reply = planning(sb, start.clone())?;
            if let Some(slice) = reply.and_then(|r| r.consumption) {
                consumption.insert(sb.id(), slice);
            }
        }

        let n = self.buildings.len();
        let budget = n * self.settings.max_messages_per_building;
        let order = self.visit_order();
        let mut ready: BTreeSet<AgentId> = BTreeSet::new();
        let mut messages = 0;
        while ready.len() < n && messages < budget {
            let sb = &mut self.buildings[order[messages % n]];
            let id = sb.id();
            let payload = PlanningPayload::data()
                .with_consumption(consumption.clone())
                .with_generation(generation.clone());
            messages += 1;
            match planning(sb, payload)?.and_then(|r| r.consumption) {
                Some(slice) if !slice.is_quiescent() => {
                    debug!(building = id, "plan changed, peers must re-check");
                    ready.clear();
                    consumption.insert(id, slice);
                }
                _ => {
                    ready.insert(id);
                }
            }
        }
        let converged = ready.len() >= n;
        if !converged {
            warn!(time, messages, "negotiation cut off by the message budget");
        }

        for sb in &mut self.buildings {
            expect_end(sb, PlanningPayload::end())?;
        }

        Ok(PlanningOutcome {
            time,
            architecture: Architecture::Decentralized,
            messages,
            rounds: if n == 0 { 0 } else { messages.div_ceil(n) },
            converged,
            consumption,
            generation,
        })
    }

    fn plan_centralized(&mut self, time: u64) -> Result<PlanningOutcome, SimError> {
        let mut consumption: BTreeMap<AgentId, ForecastSlice> = BTreeMap::new();
        let mut generation: BTreeMap<AgentId, ForecastSlice> = BTreeMap::new();
        let mut messages = 0;
        let mut rounds = 0;
        let mut converged = false;

        let mut manager_reply =
            planning(&mut self.manager, PlanningPayload::new(PlanningSignal::Start))?;
        while let Some(reply) = manager_reply.take() {
            if reply.signal == PlanningSignal::End {
                converged = true;
                break;
            }
            if rounds >= self.settings.max_messages_per_building {
                warn!(time, rounds, "manager kept pricing, closing the phase");
                break;
            }
            let price = reply
                .price
                .and_then(|p| p.forecast_data)
                .map(PriceSignal::Vector)
                .ok_or_else(|| {
                    PlanningError::MalformedMessage("manager DATA without a price".into())
                })?;
            rounds += 1;

            let relay = PlanningPayload::data().with_price(price);
            for der in &mut self.ders {
                if let Some(slice) = planning(der, relay.clone())?.and_then(|r| r.generation) {
                    generation.insert(der.id(), slice);
                }
            }
            for sb in &mut self.buildings {
                messages += 1;
                if let Some(slice) = planning(sb, relay.clone())?.and_then(|r| r.consumption) {
                    consumption.insert(sb.id(), slice);
                }
            }

            let plans = PlanningPayload::data()
                .with_consumption(consumption.clone())
                .with_generation(generation.clone());
            manager_reply = planning(&mut self.manager, plans)?;
        }

        for link in self.buildings.iter_mut().chain(self.ders.iter_mut()) {
            expect_end(link, PlanningPayload::end())?;
        }

        Ok(PlanningOutcome {
            time,
            architecture: Architecture::Centralized,
            messages,
            rounds,
            converged,
            consumption,
            generation,
        })
    }
}

fn real_time<L: AgentLink>(
    link: &mut L,
    payload: RealTimePayload,
) -> Result<Option<RealTimeReport>, SimError> {
    match link.request(CoordinatorMessage::NextSimuStep(payload))? {
        AgentOutput::Reply(Envelope {
            data: AgentMessage::RealTime(report),
            ..
        }) => Ok(Some(report)),
        other => {
            warn!(agent = link.id(), ?other, "no real-time report");
            Ok(None)
        }
    }
}

fn planning<L: AgentLink>(
    link: &mut L,
    payload: PlanningPayload,
) -> Result<Option<PlanningReply>, SimError> {
    match link.request(CoordinatorMessage::PlanningSignal(payload))? {
        AgentOutput::Reply(Envelope {
            data: AgentMessage::Planning(reply),
            ..
        }) => Ok(Some(reply)),
        AgentOutput::Reply(other) => {
            warn!(agent = link.id(), ?other, "unexpected answer to a planning message");
            Ok(None)
        }
        AgentOutput::Silent | AgentOutput::Stopped => Ok(None),
    }
}

fn expect_end<L: AgentLink>(link: &mut L, payload: PlanningPayload) -> Result<(), SimError> {
    let ack = planning(link, payload)?;
    if ack.as_ref().is_some_and(|r| r.signal != PlanningSignal::End) {
        warn!(agent = link.id(), "END answered with something else");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ConfigCatalog;
    use crate::entities::{Entity, build_community};
    use crate::sim::runtime::InlineLink;

    fn coordinator(cfg: &ScenarioConfig) -> Coordinator<InlineLink<Entity>> {
        let entities = build_community(cfg, &ConfigCatalog::shared(cfg));
        let sim = &cfg.simulation;
        Coordinator::new(
            CoordinatorSettings::from_config(cfg),
            SimClock::new(sim.start_time_s, sim.step_s, sim.duration_s),
            entities.into_iter().map(InlineLink::new),
        )
        .expect("community has a manager")
    }

    #[test]
    fn missing_manager_is_rejected() {
        let cfg = ScenarioConfig::baseline();
        let entities = build_community(&cfg, &ConfigCatalog::shared(&cfg));
        let result = Coordinator::new(
            CoordinatorSettings::from_config(&cfg),
            SimClock::new(0, 3600, 3600),
            entities
                .into_iter()
                .filter(|e| !matches!(e, Entity::Manager(_)))
                .map(InlineLink::new),
        );
        assert!(matches!(result, Err(SimError::NoManager)));
    }

    #[test]
    fn visit_order_follows_configuration() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.planning_order = PlanningOrder::Desc;
        let mut coord = coordinator(&cfg);
        assert_eq!(coord.visit_order(), vec![2, 1, 0]);

        cfg.simulation.planning_order = PlanningOrder::Random;
        let mut coord = coordinator(&cfg);
        let mut order = coord.visit_order();
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn first_step_plans_then_steps_do_not() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.duration_s = 3 * 3600;
        let mut coord = coordinator(&cfg);
        assert_eq!(coord.connect().unwrap(), 5);
        coord.step().unwrap();
        coord.step().unwrap();
        assert_eq!(coord.planning_outcomes().len(), 1);
        assert_eq!(coord.clock().now(), 7200);
    }

    #[test]
    fn buildings_without_loads_converge_at_once() {
        let mut cfg = ScenarioConfig::baseline();
        for b in &mut cfg.buildings {
            b.loads.clear();
        }
        let mut coord = coordinator(&cfg);
        let outcome = coord.plan(0).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.messages, 3);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.community_peak(), 0.0);
        assert_eq!(outcome.generation.len(), 1);
    }

    #[test]
    fn centralized_phase_is_one_pricing_round() {
        let cfg = ScenarioConfig::centralized();
        let mut coord = coordinator(&cfg);
        let outcome = coord.plan(0).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.messages, 3);
        assert_eq!(outcome.consumption.len(), 3);
        for slice in outcome.consumption.values() {
            assert_eq!(slice.timestamps.len(), 24);
        }
    }
}
