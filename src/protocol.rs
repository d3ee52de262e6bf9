//! Typed messages exchanged between the coordinator and the grid entities.
//!
//! Incoming messages follow the `{type, data}` shape; every optional payload
//! field is explicit and absent means "no-op".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Integer identifier of an agent in the community.
pub type AgentId = u32;

/// Message sent by the coordinator to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorMessage {
    /// Advance the real-time simulation by one step.
    NextSimuStep(RealTimePayload),
    /// A day-ahead planning message.
    PlanningSignal(PlanningPayload),
    /// Terminate the agent loop.
    Stop,
    /// Ask the agent to (re-)announce itself.
    NewConnection,
}

/// Type tag carried by outgoing envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    NextSimuStep,
    PlanningSignal,
    Stop,
    NewConnection,
}

/// Step of the day-ahead protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanningSignal {
    Start,
    Data,
    End,
}

/// Real-time data forwarded by the coordinator (the manager's current price).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealTimePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Real-time answer of an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealTimeReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<f64>,
    /// Set by a DER when a new forecast fault has been triggered.
    #[serde(default)]
    pub planning_request: bool,
}

/// A forecast over the remaining horizon.
///
/// `forecast_data == None` in a DATA reply signals quiescence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSlice {
    pub timestamps: Vec<u64>,
    pub forecast_data: Option<Vec<f64>>,
}

impl ForecastSlice {
    pub fn new(timestamps: Vec<u64>, forecast_data: Vec<f64>) -> Self {
        Self {
            timestamps,
            forecast_data: Some(forecast_data),
        }
    }

    /// A slice with no data, announcing that the sender's plan did not change.
    pub fn quiescent(timestamps: Vec<u64>) -> Self {
        Self {
            timestamps,
            forecast_data: None,
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.forecast_data.is_none()
    }
}

/// Named price components of a day-ahead tariff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceComponents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_price: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quad_price: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_price: Option<Vec<f64>>,
}

/// Day-ahead price signal: a plain energy price vector or named components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceSignal {
    Vector(Vec<f64>),
    Components(PriceComponents),
}

impl PriceSignal {
    /// The linear energy price, whichever shape the signal has.
    pub fn energy(&self) -> Option<&[f64]> {
        match self {
            Self::Vector(v) => Some(v),
            Self::Components(c) => c.energy_price.as_deref(),
        }
    }
}

/// Payload of a `PLANNING_SIGNAL` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningPayload {
    pub signal: PlanningSignal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceSignal>,
    /// Latest consumption forecast announced by each building.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<BTreeMap<AgentId, ForecastSlice>>,
    /// Latest generation forecast announced by each DER.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<BTreeMap<AgentId, ForecastSlice>>,
}

impl PlanningPayload {
    pub fn new(signal: PlanningSignal) -> Self {
        Self {
            signal,
            price: None,
            consumption: None,
            generation: None,
        }
    }

    pub fn start(price: PriceSignal) -> Self {
        Self::new(PlanningSignal::Start).with_price(price)
    }

    pub fn data() -> Self {
        Self::new(PlanningSignal::Data)
    }

    pub fn end() -> Self {
        Self::new(PlanningSignal::End)
    }

    pub fn with_price(mut self, price: PriceSignal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_consumption(mut self, consumption: BTreeMap<AgentId, ForecastSlice>) -> Self {
        self.consumption = Some(consumption);
        self
    }

    pub fn with_generation(mut self, generation: BTreeMap<AgentId, ForecastSlice>) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// An entity's answer to a planning message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningReply {
    pub signal: PlanningSignal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<ForecastSlice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumption: Option<ForecastSlice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<ForecastSlice>,
}

impl PlanningReply {
    pub fn new(signal: PlanningSignal) -> Self {
        Self {
            signal,
            price: None,
            consumption: None,
            generation: None,
        }
    }

    pub fn with_price(mut self, price: ForecastSlice) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_consumption(mut self, consumption: ForecastSlice) -> Self {
        self.consumption = Some(consumption);
        self
    }

    pub fn with_generation(mut self, generation: ForecastSlice) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// Body of an outgoing envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentMessage {
    RealTime(RealTimeReport),
    Planning(PlanningReply),
    Registration {},
}

/// Outgoing `{data, timestamp}` envelope tagged with sender and message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: AgentId,
    pub kind: MessageKind,
    pub timestamp: u64,
    pub data: AgentMessage,
}
