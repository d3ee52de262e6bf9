//! Post-hoc KPI computation from real-time step records.

use std::fmt;

use super::types::StepRecord;

/// Aggregate key performance indicators of a community run.
///
/// Computed post-hoc from `Vec<StepRecord>` so the report always matches the
/// recorded steps.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiReport {
    /// Peak draw on the main grid (W, positive).
    pub peak_import_w: f64,
    /// Peak export to the main grid (W, positive magnitude).
    pub peak_export_w: f64,
    /// Energy consumed by the buildings (kWh).
    pub consumption_kwh: f64,
    /// Energy generated by the DERs (kWh).
    pub generation_kwh: f64,
    /// Share of consumption covered by local generation.
    pub self_sufficiency_pct: f64,
    /// Consumption valued at the manager's real-time price.
    pub energy_cost: f64,
}

impl KpiReport {
    /// Computes all KPIs from the complete step record vector.
    ///
    /// # Arguments
    ///
    /// * `records` - One record per simulated step
    /// * `dt_hours` - Step duration in hours
    ///
    /// # Returns
    ///
    /// A `KpiReport` with all fields populated; zeros for an empty run.
    pub fn from_records(records: &[StepRecord], dt_hours: f64) -> Self {
        let mut peak_import = 0.0_f64;
        let mut peak_export = 0.0_f64;
        let mut consumption_kwh = 0.0;
        let mut generation_kwh = 0.0;
        let mut covered_kwh = 0.0;
        let mut energy_cost = 0.0;

        for r in records {
            let net = r.net_w();
            peak_import = peak_import.max(net);
            peak_export = peak_export.max(-net);

            let consumed = r.consumption_w / 1000.0 * dt_hours;
            consumption_kwh += consumed;
            generation_kwh += r.generation_w / 1000.0 * dt_hours;
            covered_kwh += r.consumption_w.min(r.generation_w) / 1000.0 * dt_hours;
            energy_cost += consumed * r.price;
        }

        let self_sufficiency_pct = if consumption_kwh > 0.0 {
            100.0 * covered_kwh / consumption_kwh
        } else {
            0.0
        };

        Self {
            peak_import_w: peak_import,
            peak_export_w: peak_export,
            consumption_kwh,
            generation_kwh,
            self_sufficiency_pct,
            energy_cost,
        }
    }
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- KPI Report ---")?;
        writeln!(f, "Peak import:           {:.0} W", self.peak_import_w)?;
        writeln!(f, "Peak export:           {:.0} W", self.peak_export_w)?;
        writeln!(f, "Consumption:           {:.2} kWh", self.consumption_kwh)?;
        writeln!(f, "Generation:            {:.2} kWh", self.generation_kwh)?;
        writeln!(f, "Self-sufficiency:      {:.1}%", self.self_sufficiency_pct)?;
        write!(f, "Energy cost:           {:.3}", self.energy_cost)
    }
}
