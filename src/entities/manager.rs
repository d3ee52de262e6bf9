use tracing::debug;

use crate::error::PlanningError;
use crate::forecast::{SECONDS_PER_DAY, resample_signal};
use crate::protocol::{
    AgentId, ForecastSlice, PlanningPayload, PlanningReply, PlanningSignal, RealTimePayload,
    RealTimeReport,
};
use crate::scheduler::Horizon;
use crate::sim::clock::SimClock;

use super::types::{EntityKind, SmartGridEntity};

/// The microgrid manager: publishes the tariff.
///
/// In real time it reports the energy price of the current raw interval. In
/// a centralized planning phase it answers START with the day's price
/// (DATA) and closes the phase (END) once it has seen everyone's plans.
#[derive(Debug, Clone)]
pub struct MicrogridManager {
    id: AgentId,
    clock: SimClock,
    energy_price: Vec<f64>,
}

impl MicrogridManager {
    /// # Panics
    ///
    /// Panics if `energy_price` is empty.
    pub fn new(id: AgentId, clock: SimClock, energy_price: Vec<f64>) -> Self {
        assert!(!energy_price.is_empty(), "energy price must not be empty");
        Self {
            id,
            clock,
            energy_price,
        }
    }

    /// Price at a time of day: `price[(t mod day) / (day / len)]`.
    pub fn price_at(&self, time: u64) -> f64 {
        let width = SECONDS_PER_DAY / self.energy_price.len() as u64;
        let index = ((time % SECONDS_PER_DAY) / width.max(1)) as usize;
        self.energy_price[index.min(self.energy_price.len() - 1)]
    }

    /// The whole day's price at the simulation step.
    pub fn price_forecast(&self) -> Result<ForecastSlice, PlanningError> {
        let horizon = Horizon::day_ahead(self.clock.step());
        let price = resample_signal(&self.energy_price, &horizon)
            .map_err(|e| PlanningError::MalformedMessage(format!("manager tariff: {e}")))?;
        Ok(ForecastSlice::new(horizon.timestamps(), price))
    }
}

impl SmartGridEntity for MicrogridManager {
    fn id(&self) -> AgentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Manager
    }

    fn clock(&self) -> &SimClock {
        &self.clock
    }

    fn advance_time(&mut self) {
        self.clock.tick();
    }

    fn real_time_step(&mut self, _payload: &RealTimePayload) -> RealTimeReport {
        RealTimeReport {
            price: Some(self.price_at(self.clock.now())),
            ..RealTimeReport::default()
        }
    }

    fn planning_step(
        &mut self,
        payload: &PlanningPayload,
    ) -> Result<Option<PlanningReply>, PlanningError> {
        let next = match payload.signal {
            PlanningSignal::Start => PlanningSignal::Data,
            PlanningSignal::Data => {
                let plans = payload.consumption.as_ref().map_or(0, |c| c.len());
                debug!(manager = self.id, plans, "received community plans");
                PlanningSignal::End
            }
            PlanningSignal::End => return Ok(None),
        };
        Ok(Some(PlanningReply::new(next).with_price(self.price_forecast()?)))
    }
}
