use serde::{Deserialize, Serialize};

use pf_core::{MachineState, SensorKind, WearParams};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WearState {
    /// Normalized degradation, always within [0, 1].
    pub wear_factor: f64,
    pub operating_hours: f64,
    pub cycles_completed: u64,
    pub quality_pass_count: u64,
    pub quality_fail_count: u64,
    pub last_maintenance_ms: Option<u64>,
}

/// Usage-driven degradation of one machine.
#[derive(Debug, Clone)]
pub struct WearModel {
    params: WearParams,
    state: WearState,
}

impl WearModel {
    pub fn new(params: WearParams) -> Self {
        Self { params, state: WearState::default() }
    }

    pub fn with_wear(params: WearParams, wear_factor: f64) -> Self {
        let mut model = Self::new(params);
        model.state.wear_factor = wear_factor.clamp(0.0, 1.0);
        model
    }

    pub fn state(&self) -> &WearState {
        &self.state
    }

    pub fn wear_factor(&self) -> f64 {
        self.state.wear_factor
    }

    pub fn params(&self) -> &WearParams {
        &self.params
    }

    /// Adds running time. Wear grows with elapsed running hours and
    /// compounds with the wear already present.
    pub fn accumulate(&mut self, delta_secs: f64, state: MachineState) {
        if state != MachineState::Running || delta_secs <= 0.0 {
            return;
        }
        let hours = delta_secs / 3_600.0;
        self.state.operating_hours += hours;
        let rate = (1.0 + self.params.compounding * self.state.wear_factor)
            / self.params.maintenance_interval_hours;
        self.state.wear_factor = (self.state.wear_factor + rate * hours).min(1.0);
    }

    /// Maintenance brings wear back down to the residual floor; baseline aging
    /// is not reversible.
    pub fn on_maintenance_complete(&mut self, now_ms: u64) {
        let floor = self.params.residual_floor;
        self.state.wear_factor = if self.state.wear_factor > floor {
            floor
        } else {
            self.state.wear_factor * 0.5
        };
        self.state.last_maintenance_ms = Some(now_ms);
    }

    pub fn needs_maintenance(&self) -> bool {
        self.state.wear_factor >= self.params.maintenance_threshold
    }

    pub fn defect_probability(&self) -> f64 {
        (self.params.base_defect_probability + self.params.defect_wear_gain * self.state.wear_factor)
            .clamp(0.0, 1.0)
    }

    /// Multiplicative drift applied to the nominal value of a channel.
    pub fn sensor_bias(&self, kind: SensorKind) -> f64 {
        match kind {
            SensorKind::Temperature => 1.0 + self.params.temperature_gain * self.state.wear_factor,
            SensorKind::Vibration => 1.0 + self.params.vibration_gain * self.state.wear_factor,
            SensorKind::Speed | SensorKind::Pressure | SensorKind::Power => 1.0,
        }
    }

    pub fn record_cycle(&mut self) -> u64 {
        self.state.cycles_completed += 1;
        self.state.cycles_completed
    }

    pub fn record_inspection(&mut self, passed: bool) {
        if passed {
            self.state.quality_pass_count += 1;
        } else {
            self.state.quality_fail_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn only_running_time_counts() {
        let mut model = WearModel::new(WearParams::default());
        model.accumulate(3_600.0, MachineState::Idle);
        model.accumulate(3_600.0, MachineState::Maintenance);
        assert_eq!(model.state().operating_hours, 0.0);
        assert_eq!(model.wear_factor(), 0.0);

        model.accumulate(3_600.0, MachineState::Running);
        assert!((model.state().operating_hours - 1.0).abs() < 1e-12);
        assert!((model.wear_factor() - 1.0 / 168.0).abs() < 1e-12);
    }

    #[test]
    fn worn_machine_wears_faster() {
        let mut fresh = WearModel::new(WearParams::default());
        let mut worn = WearModel::with_wear(WearParams::default(), 0.5);
        fresh.accumulate(7_200.0, MachineState::Running);
        worn.accumulate(7_200.0, MachineState::Running);
        assert!(worn.wear_factor() - 0.5 > fresh.wear_factor());
    }

    #[test]
    fn wear_saturates_at_one() {
        let mut model = WearModel::with_wear(WearParams::default(), 0.99);
        model.accumulate(1_000.0 * 3_600.0, MachineState::Running);
        assert_eq!(model.wear_factor(), 1.0);
        assert!(model.needs_maintenance());
    }

    #[test]
    fn maintenance_leaves_residual_floor() {
        let mut model = WearModel::with_wear(WearParams::default(), 0.8);
        let before = model.wear_factor();
        model.on_maintenance_complete(42);
        assert!(model.wear_factor() < before);
        assert!(model.wear_factor() > 0.0);
        assert_eq!(model.state().last_maintenance_ms, Some(42));

        let mut barely_worn = WearModel::with_wear(WearParams::default(), 0.01);
        barely_worn.on_maintenance_complete(1);
        assert!(barely_worn.wear_factor() < 0.01 && barely_worn.wear_factor() > 0.0);
    }

    #[test]
    fn bias_grows_only_for_thermal_and_vibration() {
        let model = WearModel::with_wear(WearParams::default(), 1.0);
        assert!((model.sensor_bias(SensorKind::Temperature) - 1.2).abs() < 1e-12);
        assert!((model.sensor_bias(SensorKind::Vibration) - 1.5).abs() < 1e-12);
        assert_eq!(model.sensor_bias(SensorKind::Power), 1.0);
        assert_eq!(model.sensor_bias(SensorKind::Speed), 1.0);
    }

    proptest! {
        #[test]
        fn wear_stays_in_unit_interval(
            start in 0.0f64..=1.0,
            steps in prop::collection::vec((0.0f64..100_000.0, 0usize..8), 0..64),
        ) {
            let mut model = WearModel::with_wear(WearParams::default(), start);
            let mut hours = 0.0;
            for (delta, state_idx) in steps {
                model.accumulate(delta, MachineState::ALL[state_idx]);
                prop_assert!((0.0..=1.0).contains(&model.wear_factor()));
                prop_assert!(model.state().operating_hours >= hours);
                hours = model.state().operating_hours;
            }
        }

        #[test]
        fn zero_delta_is_a_no_op(start in 0.0f64..=1.0, repeats in 1usize..50) {
            let mut model = WearModel::with_wear(WearParams::default(), start);
            let before = model.state().clone();
            for _ in 0..repeats {
                model.accumulate(0.0, MachineState::Running);
            }
            prop_assert_eq!(model.state(), &before);
        }

        #[test]
        fn defect_probability_is_monotone(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let low = WearModel::with_wear(WearParams::default(), lo);
            let high = WearModel::with_wear(WearParams::default(), hi);
            prop_assert!(low.defect_probability() <= high.defect_probability());
        }
    }
}
