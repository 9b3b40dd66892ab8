use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use pf_core::{AnomalyKind, DurationRange, SensorKind};

/// Sampling range for the magnitude of each anomaly kind.
///
/// Speed fluctuations use the range as an absolute RPM offset with a random
/// sign; every other kind scales the nominal value.
pub fn magnitude_range(kind: AnomalyKind) -> (f64, f64) {
    match kind {
        AnomalyKind::TemperatureSpike => (1.05, 1.25),
        AnomalyKind::VibrationAnomaly => (1.1, 1.5),
        AnomalyKind::PressureDrop => (0.3, 0.6),
        AnomalyKind::SpeedFluctuation => (200.0, 500.0),
        AnomalyKind::PowerSurge => (1.5, 2.5),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ActiveAnomaly {
    pub kind: AnomalyKind,
    pub magnitude: f64,
    pub duration_secs: f64,
    pub remaining_secs: f64,
    pub started_at_ms: u64,
}

impl ActiveAnomaly {
    fn apply(&self, value: f64) -> f64 {
        match self.kind {
            AnomalyKind::SpeedFluctuation => (value + self.magnitude).max(0.0),
            AnomalyKind::TemperatureSpike
            | AnomalyKind::VibrationAnomaly
            | AnomalyKind::PressureDrop
            | AnomalyKind::PowerSurge => value * self.magnitude,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyPhase {
    Injected,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRecord {
    pub machine_id: String,
    pub kind: AnomalyKind,
    pub phase: AnomalyPhase,
    pub duration_secs: f64,
    pub at_ms: u64,
}

/// Starts and expires labeled fault windows on one machine.
#[derive(Debug, Clone)]
pub struct AnomalyInjector {
    machine_id: String,
    enabled: bool,
    probability: f64,
    duration: DurationRange,
    active: Option<ActiveAnomaly>,
    injected: u64,
}

impl AnomalyInjector {
    pub fn new(
        machine_id: impl Into<String>,
        enabled: bool,
        probability: f64,
        duration: DurationRange,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            enabled,
            probability: probability.clamp(0.0, 1.0),
            duration,
            active: None,
            injected: 0,
        }
    }

    pub fn active(&self) -> Option<&ActiveAnomaly> {
        self.active.as_ref()
    }

    pub fn active_kind(&self) -> Option<AnomalyKind> {
        self.active.map(|a| a.kind)
    }

    pub fn injected_count(&self) -> u64 {
        self.injected
    }

    /// Advances the active window, or rolls for a new one when idle. At most
    /// one record is produced per step.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        delta_secs: f64,
        now_ms: u64,
        rng: &mut R,
    ) -> Option<AnomalyRecord> {
        if let Some(active) = self.active.as_mut() {
            if delta_secs > 0.0 {
                active.remaining_secs -= delta_secs;
            }
            if active.remaining_secs > 0.0 {
                return None;
            }
            let ended = *active;
            self.active = None;
            info!(
                machine_id = %self.machine_id,
                kind = %ended.kind,
                duration_secs = ended.duration_secs,
                "anomaly ended"
            );
            return Some(AnomalyRecord {
                machine_id: self.machine_id.clone(),
                kind: ended.kind,
                phase: AnomalyPhase::Ended,
                duration_secs: ended.duration_secs,
                at_ms: now_ms,
            });
        }

        if !self.enabled || self.probability <= 0.0 || !rng.gen_bool(self.probability) {
            return None;
        }
        let kind = *AnomalyKind::ALL.choose(rng)?;
        self.activate(kind, now_ms, rng)
    }

    /// Opens a window of `kind` immediately. Returns `None` while another
    /// window is still open, so every injection is paired with one end.
    pub fn activate<R: Rng + ?Sized>(
        &mut self,
        kind: AnomalyKind,
        now_ms: u64,
        rng: &mut R,
    ) -> Option<AnomalyRecord> {
        if self.active.is_some() {
            return None;
        }
        let (lo, hi) = magnitude_range(kind);
        let mut magnitude = rng.gen_range(lo..=hi);
        if kind == AnomalyKind::SpeedFluctuation && rng.gen_bool(0.5) {
            magnitude = -magnitude;
        }
        let duration_secs = rng.gen_range(self.duration.min_secs..=self.duration.max_secs);
        self.active = Some(ActiveAnomaly {
            kind,
            magnitude,
            duration_secs,
            remaining_secs: duration_secs,
            started_at_ms: now_ms,
        });
        self.injected += 1;
        info!(
            machine_id = %self.machine_id,
            kind = %kind,
            duration_secs,
            magnitude,
            "anomaly injected"
        );
        Some(AnomalyRecord {
            machine_id: self.machine_id.clone(),
            kind,
            phase: AnomalyPhase::Injected,
            duration_secs,
            at_ms: now_ms,
        })
    }

    /// Overrides `value` when the active anomaly targets `channel`.
    pub fn apply(&self, channel: SensorKind, value: f64) -> f64 {
        match &self.active {
            Some(active) if active.kind.channel() == channel => active.apply(value),
            _ => value,
        }
    }
}
