//! Core types and traits for the plant-floor telemetry simulator.

use serde::{Deserialize, Serialize};

pub mod config;
pub mod manufacturing;

pub use config::{
    DurationRange, MachineConfig, ReliabilityParams, SimulationConfig, StateTimings, WearParams,
};
pub use manufacturing::{
    AnomalyKind, DefectType, EventType, MachineEvent, MachineId, MachineState, MachineType,
    PlantRecord, QualityEvent, QualityResult, SensorKind, SensorMetric, SensorProfile, Stream,
};

/// Simulation tick counter; one epoch per orchestrator tick.
pub type Epoch = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMeta {
    pub domain: String,
    pub kind: String,
    pub epoch: Epoch,
    pub source: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope<T> {
    pub meta: EventMeta,
    pub payload: T,
}

impl EventEnvelope<PlantRecord> {
    /// Wraps a record for the stream it belongs to, keyed by machine id.
    pub fn plant(epoch: Epoch, payload: PlantRecord) -> Self {
        let machine_id = payload.machine_id().to_owned();
        Self {
            meta: EventMeta {
                domain: "plant".to_string(),
                kind: payload.stream().as_str().to_string(),
                epoch,
                source: "simulator".to_string(),
                key: Some(machine_id),
            },
            payload,
        }
    }

    pub fn to_json_line(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("degenerate sampling range for {what}: min {min} > max {max}")]
    SamplingDegeneracy { what: String, min: f64, max: f64 },
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: MachineState, to: MachineState },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
