//! Error types shared by the scheduler, the negotiation layer, and data loading.

use thiserror::Error;

use crate::protocol::AgentId;
use crate::scheduler::solver::SolveError;

/// Failure of one optimizer invocation.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// No assignment satisfies the constraints. Fatal for the planning round.
    #[error("infeasible schedule: {0}")]
    Infeasible(String),
    /// Inputs inconsistent with the horizon (vector lengths, duplicate ids).
    #[error("invalid optimizer input: {0}")]
    InvalidInput(String),
    /// The solver backend failed for a reason other than infeasibility.
    #[error("solver failure: {0}")]
    Solver(String),
}

impl From<SolveError> for ScheduleError {
    fn from(err: SolveError) -> Self {
        match err {
            SolveError::Infeasible => Self::Infeasible("solver proved the model infeasible".into()),
            other => Self::Solver(other.to_string()),
        }
    }
}

/// Errors surfaced by an entity's reactive layer.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The local optimizer failed; the previous plan is left untouched.
    #[error("agent {agent}: {source}")]
    Schedule {
        agent: AgentId,
        #[source]
        source: ScheduleError,
    },
    /// A catalog or data entry is absent for this entity.
    #[error("missing forecast data for agent {agent}: {what}")]
    MissingForecastData { agent: AgentId, what: String },
    /// Payload lacks a field the current transition needs.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// The agent's channel closed before it answered.
    #[error("agent {0} is no longer reachable")]
    AgentGone(AgentId),
}

/// Errors reading external data files.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("data file {0} has no rows")]
    Empty(String),
}

/// Errors that stop a community run.
#[derive(Debug, Error)]
pub enum SimError {
    /// Real-time prices and centralized planning need a manager.
    #[error("the community has no microgrid manager")]
    NoManager,
    /// A planning round failed; the run stops with it.
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),
}
