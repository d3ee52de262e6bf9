//! Community microgrid simulator: per-building load scheduling and
//! day-ahead negotiation between autonomous agents.

pub mod catalog;
pub mod config;
pub mod entities;
pub mod error;
pub mod fault;
pub mod forecast;
pub mod io;
pub mod negotiation;
pub mod plan;
pub mod protocol;
pub mod runner;
/// Mixed-integer load scheduling and the solver seam.
pub mod scheduler;
/// Agent runtime, simulation clock, and the in-process round driver.
pub mod sim;
