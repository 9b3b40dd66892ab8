use std::time::Duration;

use pf_core::{CoreError, SimulationConfig};

/// One step of simulated time handed to every machine in a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    pub tick: u64,
    /// Simulated seconds elapsed since the previous tick.
    pub delta_secs: f64,
    /// Simulated "now" after applying the delta.
    pub now_ms: u64,
}

/// Maps wall-clock intervals onto simulated time.
///
/// `time_multiplier` scales how much simulated time a wall second represents;
/// `simulation_speed` compresses the sleep between ticks. The two are
/// independent, so a run can be fast-forwarded without changing the simulated
/// step, or vice versa.
#[derive(Debug, Clone)]
pub struct SimClock {
    tick_interval: Duration,
    sleep_interval: Duration,
    time_multiplier: f64,
    start_ms: u64,
    elapsed_secs: f64,
    ticks: u64,
}

impl SimClock {
    pub fn new(
        tick_interval: Duration,
        time_multiplier: f64,
        simulation_speed: f64,
        start_ms: u64,
    ) -> Result<Self, CoreError> {
        if tick_interval.is_zero() {
            return Err(CoreError::Configuration("tick interval must be positive".into()));
        }
        for (what, value) in [("time multiplier", time_multiplier), ("simulation speed", simulation_speed)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CoreError::Configuration(format!(
                    "{what} must be strictly positive, got {value}"
                )));
            }
        }
        let sleep_interval = Duration::try_from_secs_f64(
            tick_interval.as_secs_f64() / simulation_speed,
        )
        .map_err(|err| {
            CoreError::Configuration(format!(
                "pause between ticks out of range at speed {simulation_speed}: {err}"
            ))
        })?;
        if !(tick_interval.as_secs_f64() * time_multiplier).is_finite() {
            return Err(CoreError::Configuration(format!(
                "time multiplier {time_multiplier} overflows the simulated step"
            )));
        }
        Ok(Self {
            tick_interval,
            sleep_interval,
            time_multiplier,
            start_ms,
            elapsed_secs: 0.0,
            ticks: 0,
        })
    }

    pub fn from_config(cfg: &SimulationConfig, start_ms: u64) -> Result<Self, CoreError> {
        if !(cfg.tick_interval_secs.is_finite() && cfg.tick_interval_secs > 0.0) {
            return Err(CoreError::Configuration(format!(
                "tick interval must be strictly positive, got {}",
                cfg.tick_interval_secs
            )));
        }
        let tick_interval = Duration::try_from_secs_f64(cfg.tick_interval_secs).map_err(|err| {
            CoreError::Configuration(format!(
                "tick interval {} out of range: {err}",
                cfg.tick_interval_secs
            ))
        })?;
        Self::new(
            tick_interval,
            cfg.time_multiplier,
            cfg.simulation_speed,
            start_ms,
        )
    }

    pub fn simulated_delta(&self, wall: Duration) -> f64 {
        wall.as_secs_f64() * self.time_multiplier
    }

    /// Wall-clock pause before the next tick.
    pub fn sleep_interval(&self) -> Duration {
        self.sleep_interval
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Advances by one configured tick interval.
    pub fn advance(&mut self) -> ClockTick {
        self.advance_by(self.tick_interval)
    }

    pub fn advance_by(&mut self, wall: Duration) -> ClockTick {
        let delta_secs = self.simulated_delta(wall);
        self.elapsed_secs += delta_secs;
        self.ticks += 1;
        ClockTick {
            tick: self.ticks,
            delta_secs,
            now_ms: self.now_ms(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start_ms.saturating_add((self.elapsed_secs * 1_000.0) as u64)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_factors_reproduce_real_time() {
        let clock = SimClock::new(Duration::from_secs(5), 1.0, 1.0, 0).unwrap();
        assert_eq!(clock.simulated_delta(Duration::from_secs(5)), 5.0);
        assert_eq!(clock.sleep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn factors_scale_independently() {
        let mut clock = SimClock::new(Duration::from_secs(5), 60.0, 10.0, 1_000).unwrap();
        assert_eq!(clock.sleep_interval(), Duration::from_millis(500));

        let tick = clock.advance();
        assert_eq!(tick.tick, 1);
        assert_eq!(tick.delta_secs, 300.0);
        assert_eq!(tick.now_ms, 1_000 + 300_000);
    }

    #[test]
    fn simulated_time_never_goes_backwards() {
        let mut clock = SimClock::new(Duration::from_millis(250), 3.7, 1.0, 0).unwrap();
        let mut last = clock.now_ms();
        for _ in 0..1_000 {
            let tick = clock.advance();
            assert!(tick.now_ms >= last);
            last = tick.now_ms;
        }
    }

    #[test]
    fn rejects_non_positive_factors() {
        assert!(SimClock::new(Duration::from_secs(1), 0.0, 1.0, 0).is_err());
        assert!(SimClock::new(Duration::from_secs(1), 1.0, -2.0, 0).is_err());
        assert!(SimClock::new(Duration::from_secs(1), f64::NAN, 1.0, 0).is_err());
        assert!(SimClock::new(Duration::ZERO, 1.0, 1.0, 0).is_err());
    }

    #[test]
    fn out_of_range_settings_are_configuration_errors() {
        let crawl = SimulationConfig { simulation_speed: 1e-20, ..Default::default() };
        crawl.validate().unwrap();
        assert!(matches!(SimClock::from_config(&crawl, 0), Err(CoreError::Configuration(_))));

        let huge = SimulationConfig { tick_interval_secs: 1e20, ..Default::default() };
        huge.validate().unwrap();
        assert!(matches!(SimClock::from_config(&huge, 0), Err(CoreError::Configuration(_))));

        assert!(SimClock::new(Duration::from_secs(10), f64::MAX, 1.0, 0).is_err());
    }
}
