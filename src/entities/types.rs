//! Common types and traits for the grid entities.

use std::fmt;

use rand::{Rng, rngs::StdRng};
use serde::Serialize;

use crate::error::PlanningError;
use crate::protocol::{AgentId, PlanningPayload, PlanningReply, RealTimePayload, RealTimeReport};
use crate::sim::clock::SimClock;

/// Role of an agent in the community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Manager,
    Der,
    Building,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manager => "mgm",
            Self::Der => "der",
            Self::Building => "sb",
        };
        f.write_str(name)
    }
}

/// The reactive surface every grid entity exposes to the coordinator.
///
/// Entities are driven one message at a time; they own their state and
/// never share it.
pub trait SmartGridEntity {
    fn id(&self) -> AgentId;

    fn kind(&self) -> EntityKind;

    fn clock(&self) -> &SimClock;

    /// Moves the entity's clock one step forward.
    fn advance_time(&mut self);

    /// Answers a `NEXT_SIMU_STEP` message with the entity's current reading.
    ///
    /// # Arguments
    ///
    /// * `payload` - Real-time data forwarded by the coordinator
    ///
    /// # Returns
    ///
    /// The entity's report for the current step.
    fn real_time_step(&mut self, payload: &RealTimePayload) -> RealTimeReport;

    /// Answers a planning message. `Ok(None)` means the message needs no reply.
    fn planning_step(
        &mut self,
        payload: &PlanningPayload,
    ) -> Result<Option<PlanningReply>, PlanningError>;
}

/// Utility function to generate Gaussian noise using Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
///
/// # Returns
///
/// Random value from a Gaussian distribution with mean 0 and specified standard deviation
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

/// A reading with noise of a tenth of `scale`, clamped at zero.
pub fn noisy_reading(rng: &mut StdRng, value: f64, scale: f64) -> f64 {
    (value + gaussian_noise(rng, scale / 10.0)).max(0.0)
}
