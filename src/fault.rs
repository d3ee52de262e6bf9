//! Forecast faults: deterministic, time-windowed perturbations of a forecast.

use std::collections::VecDeque;

use tracing::info;

use crate::config::FaultConfig;

/// How a fault alters the samples inside its window.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultRule {
    /// Multiply the affected samples by a constant.
    LinearCoefficient(f64),
    /// Replace the affected samples by an external signal. Not applied yet:
    /// the forecast passes through unchanged.
    ReplacementSignal { source: String },
}

/// A perturbation active on `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub start_time: u64,
    pub end_time: u64,
    pub rule: FaultRule,
}

impl Fault {
    pub fn linear(start_time: u64, end_time: u64, coefficient: f64) -> Self {
        Self {
            start_time,
            end_time,
            rule: FaultRule::LinearCoefficient(coefficient),
        }
    }

    /// Applies the fault to a signal whose first sample is at `origin`.
    ///
    /// # Arguments
    ///
    /// * `origin` - Time of `signal[0]`
    /// * `step` - Sampling period of `signal`
    /// * `signal` - Forecast samples
    ///
    /// # Returns
    ///
    /// A vector of the same length. Samples whose index falls in
    /// `[⌊(start − origin)/step⌋, ⌊(end − origin)/step⌋)`, clamped to the
    /// signal, are scaled; everything else is copied.
    pub fn apply(&self, origin: u64, step: u64, signal: &[f64]) -> Vec<f64> {
        let mut out = signal.to_vec();
        match &self.rule {
            FaultRule::LinearCoefficient(coef) => {
                let (from, to) = self.window_indices(origin, step, signal.len());
                for value in &mut out[from..to] {
                    *value *= coef;
                }
            }
            FaultRule::ReplacementSignal { .. } => {}
        }
        out
    }

    fn window_indices(&self, origin: u64, step: u64, len: usize) -> (usize, usize) {
        let index = |t: u64| -> usize {
            let offset = (t as i128 - origin as i128).div_euclid(step.max(1) as i128);
            offset.clamp(0, len as i128) as usize
        };
        let from = index(self.start_time);
        let to = index(self.end_time).max(from);
        (from, to)
    }
}

/// A fault that becomes known at `trigger_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledFault {
    pub trigger_time: u64,
    pub fault: Fault,
}

impl From<&FaultConfig> for ScheduledFault {
    fn from(cfg: &FaultConfig) -> Self {
        Self {
            trigger_time: cfg.trigger_s,
            fault: Fault::linear(cfg.start_s, cfg.end_s, cfg.coefficient),
        }
    }
}

/// Ordered upcoming faults plus at most one active fault.
#[derive(Debug, Clone, Default)]
pub struct FaultQueue {
    upcoming: VecDeque<ScheduledFault>,
    current: Option<Fault>,
}

impl FaultQueue {
    pub fn new(faults: impl IntoIterator<Item = ScheduledFault>) -> Self {
        Self {
            upcoming: faults.into_iter().collect(),
            current: None,
        }
    }

    /// Polls the queue once per simulated step.
    ///
    /// Returns `true` when the head of the queue was triggered and became the
    /// current fault. Otherwise an expired current fault is cleared.
    pub fn poll(&mut self, now: u64) -> bool {
        if let Some(head) = self.upcoming.front()
            && now >= head.trigger_time
            && let Some(next) = self.upcoming.pop_front()
        {
            info!(
                now,
                start = next.fault.start_time,
                end = next.fault.end_time,
                "forecast fault triggered"
            );
            self.current = Some(next.fault);
            return true;
        }
        if self.current.as_ref().is_some_and(|f| now >= f.end_time) {
            self.current = None;
        }
        false
    }

    pub fn current(&self) -> Option<&Fault> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.upcoming.len()
    }
}
