use rand::Rng;

use pf_core::{MachineState, SensorKind, SensorProfile};

/// One raw set of channel values before it is stamped into a `SensorMetric`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub temperature: f64,
    pub vibration: f64,
    pub speed_rpm: f64,
    pub pressure: f64,
    pub power_kw: f64,
}

impl SensorReading {
    pub fn get(&self, kind: SensorKind) -> f64 {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Vibration => self.vibration,
            SensorKind::Speed => self.speed_rpm,
            SensorKind::Pressure => self.pressure,
            SensorKind::Power => self.power_kw,
        }
    }

    pub fn channel_mut(&mut self, kind: SensorKind) -> &mut f64 {
        match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Vibration => &mut self.vibration,
            SensorKind::Speed => &mut self.speed_rpm,
            SensorKind::Pressure => &mut self.pressure,
            SensorKind::Power => &mut self.power_kw,
        }
    }

    /// Applies `f` to every channel in place.
    pub fn map_channels(&mut self, mut f: impl FnMut(SensorKind, f64) -> f64) {
        for kind in SensorKind::ALL {
            let slot = self.channel_mut(kind);
            *slot = f(kind, *slot);
        }
    }
}

/// Nominal channel values for a machine in `state`.
///
/// `progress` is the state machine's progress fraction and drives the warmup
/// ramp and the cooldown decay. Jitter is bounded and uniform; no channel is
/// ever negative.
pub fn nominal_reading<R: Rng + ?Sized>(
    state: MachineState,
    progress: f64,
    profile: &SensorProfile,
    rated_rpm: f64,
    rng: &mut R,
) -> SensorReading {
    let p = progress.clamp(0.0, 1.0);
    let mut reading = match state {
        MachineState::Idle => SensorReading {
            temperature: profile.base_temperature + rng.gen_range(-2.0..=2.0),
            vibration: rng.gen_range(0.1..=0.5),
            speed_rpm: 0.0,
            pressure: rng.gen_range(0.0..=1.0),
            power_kw: rng.gen_range(0.5..=2.0),
        },
        MachineState::Warmup => SensorReading {
            temperature: profile.base_temperature * (0.5 + 0.5 * p) + rng.gen_range(-3.0..=3.0),
            vibration: 1.0 + p * (profile.base_vibration - 1.0).max(0.5) + rng.gen_range(-0.3..=0.3),
            speed_rpm: rated_rpm * p * 0.5,
            pressure: profile.base_pressure * (0.3 + 0.7 * p),
            power_kw: profile.running_power_kw * (0.33 + 0.67 * p),
        },
        MachineState::Running => SensorReading {
            temperature: profile.base_temperature + rng.gen_range(-5.0..=8.0),
            vibration: profile.base_vibration + rng.gen_range(-0.5..=0.5),
            speed_rpm: rated_rpm * rng.gen_range(0.90..=0.98),
            pressure: profile.base_pressure + rng.gen_range(-0.5..=0.5),
            power_kw: profile.running_power_kw + rng.gen_range(-3.0..=5.0),
        },
        MachineState::Setup => SensorReading {
            temperature: profile.base_temperature * 0.8 + rng.gen_range(-2.0..=2.0),
            vibration: rng.gen_range(0.5..=2.0),
            speed_rpm: rated_rpm * rng.gen_range(0.0..=0.3),
            pressure: profile.base_pressure * 0.5,
            power_kw: rng.gen_range(3.0..=8.0),
        },
        MachineState::PlannedDowntime | MachineState::UnplannedDowntime => SensorReading {
            temperature: profile.base_temperature * 0.6 + rng.gen_range(-5.0..=0.0),
            vibration: rng.gen_range(0.0..=0.2),
            speed_rpm: 0.0,
            pressure: rng.gen_range(0.0..=1.0),
            power_kw: rng.gen_range(0.2..=1.0),
        },
        MachineState::Maintenance => SensorReading {
            temperature: 25.0 + rng.gen_range(-2.0..=2.0),
            vibration: rng.gen_range(0.0..=0.1),
            speed_rpm: 0.0,
            pressure: 0.0,
            power_kw: rng.gen_range(0.0..=0.5),
        },
        MachineState::Cooldown => SensorReading {
            temperature: profile.base_temperature * (1.0 - p * 0.5) + rng.gen_range(-3.0..=3.0),
            vibration: (1.0 - p) * 2.0 + rng.gen_range(0.0..=0.2),
            speed_rpm: rated_rpm * (1.0 - p) * 0.3,
            pressure: profile.base_pressure * (1.0 - p * 0.7),
            power_kw: 5.0 * (1.0 - p),
        },
    };
    reading.map_channels(|_, v| v.max(0.0));
    reading
}
