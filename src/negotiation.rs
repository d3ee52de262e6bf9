//! Day-ahead negotiation seen from one building.
//!
//! A planning phase runs `START → DATA* → END`. On START the building records
//! the tariff and announces a first plan; each DATA carries the latest
//! forecasts of its peers, which the building folds into its view of the
//! community before re-optimizing. A DATA reply without forecast data means
//! the plan did not move: the building is quiescent. END closes the phase.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::PlanningError;
use crate::plan::EnergyPlan;
use crate::protocol::{AgentId, ForecastSlice, PlanningPayload, PlanningReply, PlanningSignal, PriceSignal};
use crate::scheduler::Horizon;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingPrice,
    Exchanging,
    Done,
}

/// What a building knows during one planning phase.
#[derive(Debug, Clone, Default)]
pub struct NegotiationState {
    pub phase: Phase,
    pub electricity_price: Option<PriceSignal>,
    /// Latest consumption forecast per building, last write wins.
    pub peer_consumption: BTreeMap<AgentId, Vec<f64>>,
    /// Latest generation forecast per DER, last write wins.
    pub peer_generation: BTreeMap<AgentId, Vec<f64>>,
    pub previous_plan: Option<Vec<f64>>,
}

/// Aggregate consumption and generation of everyone but the building itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Externalities {
    pub consumption: Vec<f64>,
    pub generation: Vec<f64>,
}

/// Sums the peers' forecasts over `intervals` samples.
///
/// Building vectors contribute their positive part as consumption and their
/// negative part as generation; DER vectors count as generation. Vectors of
/// the wrong length and the building's own entry are skipped.
pub fn aggregate_externalities(
    own_id: AgentId,
    peer_consumption: &BTreeMap<AgentId, Vec<f64>>,
    peer_generation: &BTreeMap<AgentId, Vec<f64>>,
    intervals: usize,
) -> Externalities {
    let mut consumption = vec![0.0; intervals];
    let mut generation = vec![0.0; intervals];
    for (&peer, forecast) in peer_consumption {
        if peer == own_id {
            continue;
        }
        if forecast.len() != intervals {
            debug!(peer, len = forecast.len(), intervals, "ignoring misaligned peer forecast");
            continue;
        }
        for (i, &p) in forecast.iter().enumerate() {
            consumption[i] += p.max(0.0);
            generation[i] -= p.min(0.0);
        }
    }
    for (&der, forecast) in peer_generation {
        if forecast.len() != intervals {
            debug!(der, len = forecast.len(), intervals, "ignoring misaligned generation forecast");
            continue;
        }
        for (g, &p) in generation.iter_mut().zip(forecast) {
            *g += p;
        }
    }
    Externalities {
        consumption,
        generation,
    }
}

/// The building side of the protocol: whatever can re-optimize and hold a plan.
pub trait Replanner {
    /// Horizon of the next optimization (the rest of the current day).
    fn horizon(&self) -> Horizon;

    /// Re-optimizes against `price` and commits the result.
    ///
    /// `externalities` is `None` for the price-only formulation.
    fn replan(
        &mut self,
        price: &PriceSignal,
        externalities: Option<&Externalities>,
    ) -> Result<(), PlanningError>;

    fn plan(&self) -> &EnergyPlan;
}

/// Drives one building through planning phases.
#[derive(Debug, Clone)]
pub struct Negotiator {
    id: AgentId,
    state: NegotiationState,
}

impl Negotiator {
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            state: NegotiationState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    /// Decentralized handling of one planning message.
    ///
    /// # Errors
    ///
    /// [`PlanningError::MalformedMessage`] for a START without price or a DATA
    /// outside a phase; the state is left unchanged. Optimizer failures are
    /// propagated and the previous plan stays committed.
    pub fn handle<R: Replanner>(
        &mut self,
        payload: &PlanningPayload,
        planner: &mut R,
    ) -> Result<PlanningReply, PlanningError> {
        match payload.signal {
            PlanningSignal::Start => self.start(payload, planner),
            PlanningSignal::Data => self.exchange(payload, planner),
            PlanningSignal::End => Ok(self.end()),
        }
    }

    fn start<R: Replanner>(
        &mut self,
        payload: &PlanningPayload,
        planner: &mut R,
    ) -> Result<PlanningReply, PlanningError> {
        let price = payload
            .price
            .clone()
            .ok_or_else(|| PlanningError::MalformedMessage("START without price".into()))?;
        info!(building = self.id, "planning phase started");

        let mut state = NegotiationState::default();
        merge(&mut state.peer_generation, payload.generation.as_ref());

        let horizon = planner.horizon();
        let externalities = aggregate_externalities(
            self.id,
            &state.peer_consumption,
            &state.peer_generation,
            horizon.intervals(),
        );
        planner.replan(&price, Some(&externalities))?;

        state.electricity_price = Some(price);
        state.previous_plan = Some(planner.plan().forecast_data.clone());
        state.phase = Phase::AwaitingPrice;
        self.state = state;
        Ok(PlanningReply::new(PlanningSignal::Start).with_consumption(planner.plan().slice(&horizon)))
    }

    fn exchange<R: Replanner>(
        &mut self,
        payload: &PlanningPayload,
        planner: &mut R,
    ) -> Result<PlanningReply, PlanningError> {
        let Some(price) = self.state.electricity_price.clone() else {
            return Err(PlanningError::MalformedMessage(
                "DATA received outside a planning phase".into(),
            ));
        };
        merge(&mut self.state.peer_consumption, payload.consumption.as_ref());
        merge(&mut self.state.peer_generation, payload.generation.as_ref());

        let horizon = planner.horizon();
        let externalities = aggregate_externalities(
            self.id,
            &self.state.peer_consumption,
            &self.state.peer_generation,
            horizon.intervals(),
        );
        debug!(building = self.id, ?externalities, "re-optimizing against peers");
        planner.replan(&price, Some(&externalities))?;

        let plan = planner.plan();
        let changed = self.state.previous_plan.as_ref() != Some(&plan.forecast_data);
        self.state.previous_plan = Some(plan.forecast_data.clone());
        self.state.phase = Phase::Exchanging;

        let slice = if changed {
            debug!(building = self.id, "plan changed");
            plan.slice(&horizon)
        } else {
            debug!(building = self.id, "plan unchanged, quiescent");
            ForecastSlice::quiescent(horizon.timestamps())
        };
        Ok(PlanningReply::new(PlanningSignal::Data).with_consumption(slice))
    }

    /// Closes the phase. The building stays `Done` until the next START.
    fn end(&mut self) -> PlanningReply {
        info!(building = self.id, "planning phase finished");
        self.state = NegotiationState {
            phase: Phase::Done,
            ..NegotiationState::default()
        };
        PlanningReply::new(PlanningSignal::End)
    }

    /// Centralized handling: the grid manager prices, the building answers
    /// DATA with its whole price-only plan.
    ///
    /// # Errors
    ///
    /// [`PlanningError::MalformedMessage`] for a START or DATA without price.
    pub fn handle_centralized<R: Replanner>(
        &mut self,
        payload: &PlanningPayload,
        planner: &mut R,
    ) -> Result<PlanningReply, PlanningError> {
        match payload.signal {
            PlanningSignal::Start | PlanningSignal::Data => {
                let price = payload.price.clone().ok_or_else(|| {
                    PlanningError::MalformedMessage(format!("{:?} without price", payload.signal))
                })?;
                planner.replan(&price, None)?;
                self.state.electricity_price = Some(price);
                self.state.phase = Phase::Exchanging;
                Ok(PlanningReply::new(PlanningSignal::Data).with_consumption(planner.plan().full()))
            }
            PlanningSignal::End => Ok(self.end()),
        }
    }
}

fn merge(target: &mut BTreeMap<AgentId, Vec<f64>>, update: Option<&BTreeMap<AgentId, ForecastSlice>>) {
    for (&id, slice) in update.into_iter().flatten() {
        if let Some(data) = &slice.forecast_data {
            target.insert(id, data.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Schedule;

    /// Puts all its demand at the interval where the community is quietest.
    struct Valley {
        horizon: Horizon,
        plan: EnergyPlan,
        calls: usize,
        last_externalities: Option<Externalities>,
    }

    impl Valley {
        fn new() -> Self {
            Self {
                horizon: Horizon::new(0, 4 * 3600, 3600),
                plan: EnergyPlan::default(),
                calls: 0,
                last_externalities: None,
            }
        }
    }

    impl Replanner for Valley {
        fn horizon(&self) -> Horizon {
            self.horizon
        }

        fn replan(
            &mut self,
            _price: &PriceSignal,
            externalities: Option<&Externalities>,
        ) -> Result<(), PlanningError> {
            self.calls += 1;
            let n = self.horizon.intervals();
            let net: Vec<f64> = match externalities {
                Some(e) => e.consumption.iter().zip(&e.generation).map(|(c, g)| c - g).collect(),
                None => vec![0.0; n],
            };
            let mut best = 0;
            for i in 1..n {
                if net[i] < net[best] {
                    best = i;
                }
            }
            let mut power = vec![0.0; n];
            power[best] = 100.0;
            self.plan.commit(&self.horizon, power, &Schedule::from([(1, best as u64 * 3600)]));
            self.last_externalities = externalities.cloned();
            Ok(())
        }

        fn plan(&self) -> &EnergyPlan {
            &self.plan
        }
    }

    fn peers(entries: &[(AgentId, Option<Vec<f64>>)]) -> BTreeMap<AgentId, ForecastSlice> {
        entries
            .iter()
            .map(|(id, data)| {
                (
                    *id,
                    ForecastSlice {
                        timestamps: vec![0, 3600, 7200, 10_800],
                        forecast_data: data.clone(),
                    },
                )
            })
            .collect()
    }

    fn start() -> PlanningPayload {
        PlanningPayload::start(PriceSignal::Vector(vec![1.0; 24]))
    }

    #[test]
    fn aggregation_splits_signs_and_skips_self() {
        let consumption = BTreeMap::from([
            (1, vec![5.0, 5.0]),
            (2, vec![3.0, -2.0]),
            (3, vec![1.0, 1.0, 1.0]),
        ]);
        let generation = BTreeMap::from([(10, vec![4.0, 4.0])]);
        let ext = aggregate_externalities(1, &consumption, &generation, 2);
        assert_eq!(ext.consumption, vec![3.0, 0.0]);
        assert_eq!(ext.generation, vec![4.0, 6.0]);
    }

    #[test]
    fn start_records_price_and_announces_plan() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        let reply = negotiator.handle(&start(), &mut planner).expect("start");

        assert_eq!(reply.signal, PlanningSignal::Start);
        let slice = reply.consumption.expect("forecast");
        assert_eq!(slice.forecast_data, Some(vec![100.0, 0.0, 0.0, 0.0]));
        assert_eq!(negotiator.phase(), Phase::AwaitingPrice);
        assert!(negotiator.state().electricity_price.is_some());
        assert_eq!(
            planner.last_externalities.map(|e| e.consumption),
            Some(vec![0.0; 4])
        );
    }

    #[test]
    fn start_seeds_der_generation() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        let payload = start().with_generation(peers(&[(10, Some(vec![0.0, 0.0, 50.0, 0.0]))]));
        let reply = negotiator.handle(&payload, &mut planner).expect("start");
        let slice = reply.consumption.expect("forecast");
        assert_eq!(slice.forecast_data, Some(vec![0.0, 0.0, 100.0, 0.0]));
        assert_eq!(negotiator.state().peer_generation.len(), 1);
    }

    #[test]
    fn data_outside_phase_is_malformed() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        let err = negotiator.handle(&PlanningPayload::data(), &mut planner).unwrap_err();
        assert!(matches!(err, PlanningError::MalformedMessage(_)));
        assert_eq!(planner.calls, 0);
        assert_eq!(negotiator.phase(), Phase::Idle);
    }

    #[test]
    fn start_without_price_is_malformed() {
        let mut negotiator = Negotiator::new(1);
        let err = negotiator
            .handle(&PlanningPayload::new(PlanningSignal::Start), &mut Valley::new())
            .unwrap_err();
        assert!(matches!(err, PlanningError::MalformedMessage(_)));
    }

    #[test]
    fn data_reply_is_quiescent_when_plan_is_stable() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        negotiator.handle(&start(), &mut planner).expect("start");

        let nothing_new = PlanningPayload::data();
        let reply = negotiator.handle(&nothing_new, &mut planner).expect("data");
        assert_eq!(reply.signal, PlanningSignal::Data);
        assert!(reply.consumption.expect("slice").is_quiescent());
        assert_eq!(planner.calls, 2);
        assert_eq!(negotiator.phase(), Phase::Exchanging);
    }

    #[test]
    fn data_reply_carries_changed_plan() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        negotiator.handle(&start(), &mut planner).expect("start");

        let busy_morning = PlanningPayload::data().with_consumption(peers(&[
            (1, Some(vec![100.0, 0.0, 0.0, 0.0])),
            (2, Some(vec![300.0, 200.0, 0.0, 100.0])),
        ]));
        let reply = negotiator.handle(&busy_morning, &mut planner).expect("data");
        let slice = reply.consumption.expect("slice");
        assert_eq!(slice.forecast_data, Some(vec![0.0, 0.0, 100.0, 0.0]));

        // a quiescent peer entry does not erase what is known about it
        let quiet = PlanningPayload::data().with_consumption(peers(&[(2, None)]));
        let reply = negotiator.handle(&quiet, &mut planner).expect("data");
        assert!(reply.consumption.expect("slice").is_quiescent());
        assert_eq!(negotiator.state().peer_consumption[&2], vec![300.0, 200.0, 0.0, 100.0]);
    }

    #[test]
    fn end_acknowledges_and_resets() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        negotiator.handle(&start(), &mut planner).expect("start");
        let reply = negotiator.handle(&PlanningPayload::end(), &mut planner).expect("end");
        assert_eq!(reply.signal, PlanningSignal::End);
        assert_eq!(negotiator.phase(), Phase::Done);
        assert!(negotiator.state().electricity_price.is_none());
        assert_eq!(planner.calls, 1);
    }

    #[test]
    fn done_lasts_until_the_next_start() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        negotiator.handle(&start(), &mut planner).expect("start");
        negotiator.handle(&PlanningPayload::end(), &mut planner).expect("end");

        let err = negotiator.handle(&PlanningPayload::data(), &mut planner).unwrap_err();
        assert!(matches!(err, PlanningError::MalformedMessage(_)));
        assert_eq!(negotiator.phase(), Phase::Done);

        negotiator.handle(&start(), &mut planner).expect("next day");
        assert_eq!(negotiator.phase(), Phase::AwaitingPrice);
    }

    #[test]
    fn centralized_answers_with_whole_plan() {
        let mut negotiator = Negotiator::new(1);
        let mut planner = Valley::new();
        let payload = PlanningPayload::data().with_price(PriceSignal::Vector(vec![1.0; 4]));
        let reply = negotiator.handle_centralized(&payload, &mut planner).expect("data");
        assert_eq!(reply.signal, PlanningSignal::Data);
        assert!(planner.last_externalities.is_none());
        let full = reply.consumption.expect("plan");
        assert_eq!(full.timestamps.len(), 24);

        let err = negotiator
            .handle_centralized(&PlanningPayload::data(), &mut planner)
            .unwrap_err();
        assert!(matches!(err, PlanningError::MalformedMessage(_)));
    }
}
