use crate::forecast::SECONDS_PER_DAY;

/// Simulated wall time, advancing by a fixed step up to an end time.
///
/// Every agent owns one; the round driver uses another to pace the run.
///
/// # Examples
///
/// ```
/// use microgrid_sim::sim::clock::SimClock;
///
/// let mut clock = SimClock::new(0, 3600, 3 * 3600);
/// let mut times = Vec::new();
///
/// clock.run(|t| times.push(t));
/// assert_eq!(times, vec![0, 3600, 7200]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    /// Current time in seconds
    current: u64,
    /// Step in seconds
    step: u64,
    /// Time at which the clock stops
    end: u64,
}

impl SimClock {
    /// Creates a clock starting at `start` and running for `duration` seconds.
    ///
    /// # Arguments
    ///
    /// * `start` - Starting date in seconds
    /// * `step` - Simulation step in seconds
    /// * `duration` - Simulated duration in seconds
    ///
    /// # Panics
    ///
    /// Panics if `step` is zero.
    pub fn new(start: u64, step: u64, duration: u64) -> Self {
        assert!(step > 0, "clock step must be positive");
        Self {
            current: start,
            step,
            end: start + duration,
        }
    }

    pub fn now(&self) -> u64 {
        self.current
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn time_of_day(&self) -> u64 {
        self.current % SECONDS_PER_DAY
    }

    /// Index of the current step within its day.
    pub fn step_in_day(&self) -> usize {
        (self.time_of_day() / self.step) as usize
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.end
    }

    /// Advances the clock by one step.
    ///
    /// # Returns
    ///
    /// * `Some(time)` - The time before advancing
    /// * `None` - If the clock has reached its end
    pub fn tick(&mut self) -> Option<u64> {
        if self.is_finished() {
            return None;
        }
        let time = self.current;
        self.current += self.step;
        Some(time)
    }

    /// Runs a function for each remaining step of the clock.
    pub fn run(&mut self, mut f: impl FnMut(u64)) {
        while let Some(time) = self.tick() {
            f(time);
        }
    }
}
