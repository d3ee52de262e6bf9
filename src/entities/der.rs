use rand::{SeedableRng, rngs::StdRng};
use tracing::{info, warn};

use crate::config::{Architecture, DerConfig, SimulationConfig};
use crate::error::PlanningError;
use crate::fault::{FaultQueue, ScheduledFault};
use crate::forecast::{generate_forecast, resample_signal};
use crate::io::read_der_series;
use crate::protocol::{
    AgentId, ForecastSlice, PlanningPayload, PlanningReply, PlanningSignal, RealTimePayload,
    RealTimeReport,
};
use crate::scheduler::Horizon;
use crate::sim::clock::SimClock;

use super::types::{EntityKind, SmartGridEntity, noisy_reading};

/// A distributed energy resource (typically a PV plant).
///
/// Holds a day-long generation forecast and the production that actually
/// happens, both at the simulation step. Scheduled faults perturb the
/// forecast; when one is triggered the DER asks for a new planning phase.
#[derive(Debug, Clone)]
pub struct DistributedEnergyResource {
    id: AgentId,
    clock: SimClock,
    architecture: Architecture,
    /// Generation forecast (W), one sample per step of the day.
    forecast: Vec<f64>,
    /// Realised generation (W), one sample per step of the day.
    production: Vec<f64>,
    max_production: f64,
    faults: FaultQueue,
    rng: StdRng,
}

impl DistributedEnergyResource {
    /// Creates a DER from raw day-long series.
    ///
    /// # Arguments
    ///
    /// * `id` - Agent id
    /// * `clock` - The DER's own clock
    /// * `architecture` - Planning protocol the DER answers
    /// * `forecast` - Raw generation forecast, any length dividing the steps of a day
    /// * `production` - Raw realised generation, same convention
    /// * `faults` - Upcoming forecast faults
    /// * `seed` - Random seed for production noise
    ///
    /// Series that cannot be stretched over the day are logged and replaced
    /// by zeros.
    pub fn new(
        id: AgentId,
        clock: SimClock,
        architecture: Architecture,
        forecast: &[f64],
        production: &[f64],
        faults: FaultQueue,
        seed: u64,
    ) -> Self {
        let day = Horizon::day_ahead(clock.step());
        let stretch = |name: &str, raw: &[f64]| {
            resample_signal(raw, &day).unwrap_or_else(|e| {
                warn!(der = id, series = name, error = %e, "unusable series, using zeros");
                vec![0.0; day.intervals()]
            })
        };
        let forecast = stretch("forecast", forecast);
        let production = stretch("production", production);
        let max_production = production.iter().copied().fold(0.0, f64::max);
        Self {
            id,
            clock,
            architecture,
            forecast,
            production,
            max_production,
            faults,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Builds a DER from its scenario entry, reading `data_file` if set.
    ///
    /// A data file that cannot be read is logged and the DER proceeds with
    /// an all-zero forecast.
    pub fn from_config(cfg: &DerConfig, sim: &SimulationConfig) -> Self {
        let (forecast, production) = match &cfg.data_file {
            Some(path) => match read_der_series(path) {
                Ok(series) => (series.forecast, series.production),
                Err(e) => {
                    let missing = PlanningError::MissingForecastData {
                        agent: cfg.id,
                        what: format!("{}: {e}", path.display()),
                    };
                    warn!(error = %missing, "DER proceeds with an all-zero forecast");
                    let zeros = vec![0.0; sim.steps_per_day()];
                    (zeros.clone(), zeros)
                }
            },
            None => (cfg.forecast.clone(), cfg.production.clone()),
        };
        Self::new(
            cfg.id,
            SimClock::new(sim.start_time_s, sim.step_s, sim.duration_s),
            sim.architecture,
            &forecast,
            &production,
            FaultQueue::new(cfg.faults.iter().map(ScheduledFault::from)),
            sim.seed.wrapping_add(u64::from(cfg.id)),
        )
    }

    /// Generation forecast over the rest of the day, perturbed by the active fault.
    pub fn generation_forecast(&self) -> ForecastSlice {
        let horizon = Horizon::remaining_day(self.clock.now(), self.clock.step());
        let data = generate_forecast(&self.forecast, &horizon, self.faults.current());
        ForecastSlice::new(horizon.timestamps(), data)
    }

    pub fn faults(&self) -> &FaultQueue {
        &self.faults
    }
}

impl SmartGridEntity for DistributedEnergyResource {
    fn id(&self) -> AgentId {
        self.id
    }

    fn kind(&self) -> EntityKind {
        EntityKind::Der
    }

    fn clock(&self) -> &SimClock {
        &self.clock
    }

    fn advance_time(&mut self) {
        self.clock.tick();
    }

    fn real_time_step(&mut self, _payload: &RealTimePayload) -> RealTimeReport {
        let now = self.production.get(self.clock.step_in_day()).copied().unwrap_or(0.0);
        let generation = noisy_reading(&mut self.rng, now, self.max_production);
        let planning_request = self.faults.poll(self.clock.now());
        if planning_request {
            info!(der = self.id, now = self.clock.now(), "requesting a new planning phase");
        }
        RealTimeReport {
            generation: Some(generation),
            planning_request,
            ..RealTimeReport::default()
        }
    }

    fn planning_step(
        &mut self,
        payload: &PlanningPayload,
    ) -> Result<Option<PlanningReply>, PlanningError> {
        let next = match (self.architecture, payload.signal) {
            (Architecture::Decentralized, PlanningSignal::Start) => PlanningSignal::Start,
            (Architecture::Decentralized, _) => return Ok(None),
            (Architecture::Centralized, PlanningSignal::End) => {
                return Ok(Some(PlanningReply::new(PlanningSignal::End)));
            }
            (Architecture::Centralized, _) => PlanningSignal::Data,
        };
        Ok(Some(
            PlanningReply::new(next).with_generation(self.generation_forecast()),
        ))
    }
}
