//! Per-machine simulation engine: clock scaling, state machine, wear, anomaly
//! injection and sensor synthesis.

pub mod anomaly;
pub mod clock;
pub mod machine;
pub mod sensors;
pub mod state_machine;
pub mod wear;

pub use anomaly::{ActiveAnomaly, AnomalyInjector, AnomalyPhase, AnomalyRecord};
pub use clock::{ClockTick, SimClock};
pub use machine::{MachineSimulator, MachineSnapshot, TickOutput};
pub use sensors::SensorReading;
pub use state_machine::{MachineStateMachine, StateChange, TransitionReason};
pub use wear::{WearModel, WearState};

/// Random source owned by each machine.
pub type MachineRng = rand_chacha::ChaCha8Rng;
