/// Simulation clock owned by every agent and the round driver.
pub mod clock;
/// Round driver: real-time cascade and planning phases.
pub mod coordinator;
pub mod kpi;
/// Message handling around an entity, inline or on its own thread.
pub mod runtime;
pub mod types;
