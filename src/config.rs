//! TOML-based scenario configuration and preset definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::CATALOG_STEP_S;
use crate::forecast::SECONDS_PER_DAY;
use crate::protocol::{AgentId, PriceComponents, PriceSignal};
use crate::scheduler::SchedulerSettings;

/// Top-level scenario configuration parsed from TOML.
///
/// All sections have defaults; buildings and DERs default to none. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in community.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and negotiation parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Optimizer knobs shared by every building.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Day-ahead tariff published to the community.
    #[serde(default)]
    pub price: PriceConfig,
    /// Smart buildings and their shiftable loads.
    #[serde(default)]
    pub buildings: Vec<BuildingConfig>,
    /// Distributed energy resources.
    #[serde(default)]
    pub ders: Vec<DerConfig>,
}

/// Negotiation architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Buildings negotiate peer to peer, coordinated round-robin.
    #[default]
    Decentralized,
    /// The grid manager prices, buildings answer with price-only plans.
    Centralized,
}

/// Order in which buildings are visited during a decentralized round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanningOrder {
    #[default]
    Asc,
    Desc,
    Random,
}

/// Simulation timing and negotiation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Simulation step in seconds (must divide one day).
    pub step_s: u64,
    /// Starting date in seconds.
    pub start_time_s: u64,
    /// Simulated duration in seconds.
    pub duration_s: u64,
    /// Master random seed.
    pub seed: u64,
    pub architecture: Architecture,
    pub planning_order: PlanningOrder,
    /// DATA messages per building before a decentralized round is cut off.
    pub max_messages_per_building: usize,
    /// A planning phase starts whenever the clock is a multiple of this.
    pub planning_frequency_s: u64,
    /// Agent id of the microgrid manager.
    pub manager_id: AgentId,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_s: 3600,
            start_time_s: 0,
            duration_s: SECONDS_PER_DAY,
            seed: 42,
            architecture: Architecture::Decentralized,
            planning_order: PlanningOrder::Asc,
            max_messages_per_building: 5,
            planning_frequency_s: SECONDS_PER_DAY,
            manager_id: 0,
        }
    }
}

impl SimulationConfig {
    pub fn steps_per_day(&self) -> usize {
        (SECONDS_PER_DAY / self.step_s.max(1)) as usize
    }
}

/// Optimizer knobs shared by every building.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Watts per objective unit.
    pub power_scale: f64,
    /// Per-building draw cap (W). Absent means uncapped.
    pub max_power_w: Option<f64>,
    /// Weight of the excess over `max_power_w`. Absent makes the cap hard.
    pub peak_penalty: Option<f64>,
    /// Segments of the piecewise-linear quadratic price term.
    pub quadratic_segments: usize,
    /// Cost per interval of delay breaking ties toward early starts.
    pub tie_break_weight: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let settings = SchedulerSettings::default();
        Self {
            power_scale: settings.power_scale,
            max_power_w: None,
            peak_penalty: settings.peak_penalty,
            quadratic_segments: settings.quadratic_segments,
            tie_break_weight: settings.tie_break_weight,
        }
    }
}

/// Day-ahead tariff, one value per raw interval (hourly by default).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriceConfig {
    /// Energy price per kWh.
    pub energy_price: Vec<f64>,
    /// Quadratic price on main-grid draw.
    pub quad_price: Option<Vec<f64>>,
    /// Price of community surplus generation.
    pub local_price: Option<Vec<f64>>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        let mut energy_price = vec![0.12; 7];
        energy_price.extend([0.25; 3]);
        energy_price.extend([0.18; 6]);
        energy_price.extend([0.30; 4]);
        energy_price.extend([0.15; 4]);
        Self {
            energy_price,
            quad_price: None,
            local_price: None,
        }
    }
}

/// One smart building.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildingConfig {
    pub id: AgentId,
    #[serde(default)]
    pub loads: Vec<LoadConfig>,
}

/// A shiftable load, profile sampled every 15 minutes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    pub id: u32,
    /// Power samples (W).
    pub power: Vec<f64>,
    /// Earliest start, seconds after midnight.
    pub earliest_start_s: u64,
    /// Latest end, seconds after midnight.
    pub latest_end_s: u64,
}

/// One distributed energy resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerConfig {
    pub id: AgentId,
    /// Day-ahead generation forecast (W), one value per raw interval.
    #[serde(default)]
    pub forecast: Vec<f64>,
    /// Realised generation (W), same resolution as `forecast`.
    #[serde(default)]
    pub production: Vec<f64>,
    /// CSV file with `forecast` and `production` columns, used instead of
    /// the inline vectors.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    /// Forecast faults, in trigger order.
    #[serde(default)]
    pub faults: Vec<FaultConfig>,
}

/// A linear-coefficient forecast fault.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultConfig {
    /// Clock time at which the fault becomes known.
    pub trigger_s: u64,
    /// Time of day the faulty window starts.
    pub start_s: u64,
    /// Time of day the faulty window ends.
    pub end_s: u64,
    pub coefficient: f64,
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.step_s"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn error(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError {
        field: field.into(),
        message: message.into(),
    }
}

fn flat_load(id: u32, watts: f64, quarters: usize, earliest_h: u64, latest_h: u64) -> LoadConfig {
    LoadConfig {
        id,
        power: vec![watts; quarters],
        earliest_start_s: earliest_h * 3600,
        latest_end_s: latest_h * 3600,
    }
}

fn solar_profile(peak_w: f64) -> Vec<f64> {
    (0..24)
        .map(|h| {
            if (6..18).contains(&h) {
                let x = (h as f64 + 0.5 - 6.0) / 12.0 * std::f64::consts::PI;
                (peak_w * x.sin()).round()
            } else {
                0.0
            }
        })
        .collect()
}

impl ScenarioConfig {
    /// Three buildings, one PV plant, decentralized negotiation.
    pub fn baseline() -> Self {
        let mut washing = flat_load(101, 2000.0, 4, 6, 22);
        washing.power.extend([500.0; 4]);
        Self {
            simulation: SimulationConfig::default(),
            scheduler: SchedulerConfig {
                max_power_w: Some(8000.0),
                ..SchedulerConfig::default()
            },
            price: PriceConfig {
                quad_price: Some(vec![0.02; 24]),
                local_price: Some(vec![0.08; 24]),
                ..PriceConfig::default()
            },
            buildings: vec![
                BuildingConfig {
                    id: 1,
                    loads: vec![washing, flat_load(102, 1500.0, 4, 18, 24)],
                },
                BuildingConfig {
                    id: 2,
                    loads: vec![
                        flat_load(201, 3600.0, 16, 0, 8),
                        flat_load(202, 2500.0, 8, 8, 20),
                    ],
                },
                BuildingConfig {
                    id: 3,
                    loads: vec![
                        flat_load(301, 1800.0, 8, 7, 19),
                        flat_load(302, 1200.0, 4, 12, 22),
                    ],
                },
            ],
            ders: vec![DerConfig {
                id: 10,
                forecast: solar_profile(4000.0),
                production: solar_profile(3600.0),
                data_file: None,
                faults: Vec::new(),
            }],
        }
    }

    /// Baseline community priced by the grid manager.
    pub fn centralized() -> Self {
        let mut cfg = Self::baseline();
        cfg.simulation.architecture = Architecture::Centralized;
        cfg
    }

    /// Baseline community whose PV forecast collapses mid-day, forcing a
    /// second planning phase on the remaining horizon.
    pub fn solar_fault() -> Self {
        let mut cfg = Self::baseline();
        for der in &mut cfg.ders {
            der.faults.push(FaultConfig {
                trigger_s: 6 * 3600,
                start_s: 10 * 3600,
                end_s: 16 * 3600,
                coefficient: 0.2,
            });
        }
        cfg
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "centralized", "solar_fault"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "centralized" => Ok(Self::centralized()),
            "solar_fault" => Ok(Self::solar_fault()),
            _ => Err(error(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// Relative DER `data_file` paths are resolved against the file's
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            error("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        let mut cfg = Self::from_toml_str(&content)?;
        if let Some(dir) = path.parent() {
            for der in &mut cfg.ders {
                if let Some(file) = &der.data_file
                    && file.is_relative()
                {
                    der.data_file = Some(dir.join(file));
                }
            }
        }
        Ok(cfg)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| error("toml", e.to_string()))
    }

    /// Optimizer settings derived from the `[scheduler]` section.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            power_scale: self.scheduler.power_scale,
            peak_penalty: self.scheduler.peak_penalty,
            quadratic_segments: self.scheduler.quadratic_segments,
            tie_break_weight: self.scheduler.tie_break_weight,
        }
    }

    /// The tariff as broadcast in decentralized START messages.
    pub fn price_signal(&self) -> PriceSignal {
        PriceSignal::Components(PriceComponents {
            energy_price: Some(self.price.energy_price.clone()),
            quad_price: self.price.quad_price.clone(),
            local_price: self.price.local_price.clone(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if s.step_s == 0 || SECONDS_PER_DAY % s.step_s != 0 {
            errors.push(error("simulation.step_s", "must be > 0 and divide 86400"));
        }
        let step = s.step_s.max(1);
        if s.start_time_s % step != 0 {
            errors.push(error("simulation.start_time_s", "must be a multiple of step_s"));
        }
        if s.duration_s == 0 {
            errors.push(error("simulation.duration_s", "must be > 0"));
        }
        if s.planning_frequency_s == 0 || s.planning_frequency_s % step != 0 {
            errors.push(error(
                "simulation.planning_frequency_s",
                "must be > 0 and a multiple of step_s",
            ));
        }
        if s.max_messages_per_building == 0 {
            errors.push(error("simulation.max_messages_per_building", "must be > 0"));
        }

        let sc = &self.scheduler;
        if sc.power_scale <= 0.0 {
            errors.push(error("scheduler.power_scale", "must be > 0"));
        }
        if sc.quadratic_segments == 0 {
            errors.push(error("scheduler.quadratic_segments", "must be > 0"));
        }
        if sc.max_power_w.is_some_and(|p| p <= 0.0) {
            errors.push(error("scheduler.max_power_w", "must be > 0"));
        }
        if sc.peak_penalty.is_some_and(|r| r < 0.0) {
            errors.push(error("scheduler.peak_penalty", "must be >= 0"));
        }
        if sc.tie_break_weight < 0.0 {
            errors.push(error("scheduler.tie_break_weight", "must be >= 0"));
        }

        let steps_per_day = s.steps_per_day();
        let p = &self.price;
        check_signal(&mut errors, "price.energy_price", &p.energy_price, steps_per_day);
        for (field, v) in [("price.quad_price", &p.quad_price), ("price.local_price", &p.local_price)] {
            if let Some(v) = v
                && v.len() != p.energy_price.len()
            {
                errors.push(error(field, "must have the same length as price.energy_price"));
            }
        }

        let mut ids = BTreeSet::from([s.manager_id]);
        for (b_idx, building) in self.buildings.iter().enumerate() {
            if !ids.insert(building.id) {
                errors.push(error(format!("buildings[{b_idx}].id"), "agent ids must be unique"));
            }
            let mut load_ids = BTreeSet::new();
            for (l_idx, load) in building.loads.iter().enumerate() {
                let field = format!("buildings[{b_idx}].loads[{l_idx}]");
                if !load_ids.insert(load.id) {
                    errors.push(error(format!("{field}.id"), "must be unique within the building"));
                }
                if load.power.is_empty() {
                    errors.push(error(format!("{field}.power"), "must not be empty"));
                }
                if load.power.iter().any(|w| *w < 0.0) {
                    errors.push(error(format!("{field}.power"), "must be non-negative"));
                }
                if load.latest_end_s > SECONDS_PER_DAY {
                    errors.push(error(format!("{field}.latest_end_s"), "must be <= 86400"));
                }
                let duration = load.power.len() as u64 * CATALOG_STEP_S;
                if load.latest_end_s < load.earliest_start_s + duration {
                    errors.push(error(
                        format!("{field}.latest_end_s"),
                        "window must be at least as long as the load profile",
                    ));
                }
            }
        }

        for (d_idx, der) in self.ders.iter().enumerate() {
            let field = format!("ders[{d_idx}]");
            if !ids.insert(der.id) {
                errors.push(error(format!("{field}.id"), "agent ids must be unique"));
            }
            if der.data_file.is_none() {
                check_signal(&mut errors, &format!("{field}.forecast"), &der.forecast, steps_per_day);
                if der.production.len() != der.forecast.len() {
                    errors.push(error(
                        format!("{field}.production"),
                        "must have the same length as forecast",
                    ));
                }
            }
            for (f_idx, fault) in der.faults.iter().enumerate() {
                if fault.start_s >= fault.end_s {
                    errors.push(error(
                        format!("{field}.faults[{f_idx}].start_s"),
                        "must be < end_s",
                    ));
                }
            }
        }

        errors
    }
}

fn check_signal(errors: &mut Vec<ConfigError>, field: &str, signal: &[f64], steps_per_day: usize) {
    if signal.is_empty() {
        errors.push(error(field, "must not be empty"));
    } else if steps_per_day % signal.len() != 0 {
        errors.push(error(
            field,
            format!("length {} must divide the {steps_per_day} steps of a day", signal.len()),
        ));
    }
}
