use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use pf_core::{CoreError, MachineState, StateTimings};

/// Fixed vocabulary attached to every state change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    ShiftStart,
    ReadyForProduction,
    ToolChange,
    ScheduledBreak,
    DetectedFailure,
    PreventiveMaintenance,
    EndOfShift,
    SetupCompleted,
    ResumingProduction,
    RepairNeeded,
    IssueResolved,
    MaintenanceCompleted,
    MachineStopped,
    Other,
}

impl TransitionReason {
    /// Reason recorded for a timer-driven transition between two states.
    pub fn for_pair(from: MachineState, to: MachineState) -> Self {
        use MachineState::*;
        match (from, to) {
            (Idle, Warmup) => TransitionReason::ShiftStart,
            (Warmup, Running) => TransitionReason::ReadyForProduction,
            (Running, Setup) => TransitionReason::ToolChange,
            (Running, PlannedDowntime) => TransitionReason::ScheduledBreak,
            (_, UnplannedDowntime) => TransitionReason::DetectedFailure,
            (Running, Maintenance) => TransitionReason::PreventiveMaintenance,
            (Running, Cooldown) => TransitionReason::EndOfShift,
            (Setup, Running) => TransitionReason::SetupCompleted,
            (PlannedDowntime, Warmup) => TransitionReason::ResumingProduction,
            (UnplannedDowntime, Maintenance) => TransitionReason::RepairNeeded,
            (UnplannedDowntime, Warmup) => TransitionReason::IssueResolved,
            (Maintenance, Warmup) => TransitionReason::MaintenanceCompleted,
            (Cooldown, Idle) => TransitionReason::MachineStopped,
            _ => TransitionReason::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::ShiftStart => "Starting production shift",
            TransitionReason::ReadyForProduction => "Machine ready for production",
            TransitionReason::ToolChange => "Tool change required",
            TransitionReason::ScheduledBreak => "Scheduled break",
            TransitionReason::DetectedFailure => "Unexpected failure",
            TransitionReason::PreventiveMaintenance => "Preventive maintenance",
            TransitionReason::EndOfShift => "End of shift",
            TransitionReason::SetupCompleted => "Setup completed",
            TransitionReason::ResumingProduction => "Resuming production",
            TransitionReason::RepairNeeded => "Repair needed",
            TransitionReason::IssueResolved => "Issue resolved",
            TransitionReason::MaintenanceCompleted => "Maintenance completed",
            TransitionReason::MachineStopped => "Machine stopped",
            TransitionReason::Other => "State transition",
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateChange {
    pub from: MachineState,
    pub to: MachineState,
    pub reason: TransitionReason,
    pub at_ms: u64,
}

/// States reachable from `state`, whether by timer or by an external trigger.
pub fn allowed_successors(state: MachineState) -> &'static [MachineState] {
    use MachineState::*;
    match state {
        Idle => &[Warmup],
        Warmup => &[Running, UnplannedDowntime],
        Running => &[Setup, PlannedDowntime, UnplannedDowntime, Maintenance, Cooldown],
        Setup => &[Running, UnplannedDowntime],
        PlannedDowntime => &[Warmup],
        UnplannedDowntime => &[Maintenance, Warmup],
        Maintenance => &[Warmup],
        Cooldown => &[Idle],
    }
}

/// Weighted successors chosen when the dwell timer of `state` expires.
pub fn automatic_successors(state: MachineState) -> &'static [(MachineState, f64)] {
    use MachineState::*;
    match state {
        Idle => &[(Warmup, 1.0)],
        Warmup => &[(Running, 1.0)],
        Running => &[
            (Setup, 0.40),
            (PlannedDowntime, 0.25),
            (Cooldown, 0.25),
            (Maintenance, 0.10),
        ],
        Setup => &[(Running, 1.0)],
        PlannedDowntime => &[(Warmup, 1.0)],
        UnplannedDowntime => &[(Maintenance, 0.6), (Warmup, 0.4)],
        Maintenance => &[(Warmup, 1.0)],
        Cooldown => &[(Idle, 1.0)],
    }
}

/// Operational phase of one machine with timed dwell in each state.
#[derive(Debug, Clone)]
pub struct MachineStateMachine {
    timings: StateTimings,
    state: MachineState,
    time_in_state: f64,
    planned_secs: f64,
    entered_at_ms: u64,
}

impl MachineStateMachine {
    /// Starts in IDLE with an already-expired dwell, so the first positive
    /// advance begins the shift.
    pub fn new(timings: StateTimings) -> Self {
        Self::starting_in(timings, MachineState::Idle, 0.0)
    }

    pub fn starting_in(timings: StateTimings, state: MachineState, planned_secs: f64) -> Self {
        Self {
            timings,
            state,
            time_in_state: 0.0,
            planned_secs: planned_secs.max(0.0),
            entered_at_ms: 0,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn timings(&self) -> &StateTimings {
        &self.timings
    }

    pub fn time_in_state(&self) -> f64 {
        self.time_in_state
    }

    pub fn planned_secs(&self) -> f64 {
        self.planned_secs
    }

    pub fn remaining_secs(&self) -> f64 {
        (self.planned_secs - self.time_in_state).max(0.0)
    }

    pub fn entered_at_ms(&self) -> u64 {
        self.entered_at_ms
    }

    pub fn can_transition_to(&self, target: MachineState) -> bool {
        allowed_successors(self.state).contains(&target)
    }

    /// Elapsed share of the planned dwell, clamped to [0, 1].
    pub fn progress_fraction(&self) -> f64 {
        if self.planned_secs <= 0.0 {
            return 0.0;
        }
        (self.time_in_state / self.planned_secs).clamp(0.0, 1.0)
    }

    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        delta_secs: f64,
        now_ms: u64,
        rng: &mut R,
    ) -> Option<StateChange> {
        if delta_secs <= 0.0 {
            return None;
        }
        self.time_in_state += delta_secs;
        if self.time_in_state < self.planned_secs {
            return None;
        }
        let options = automatic_successors(self.state);
        let next = options
            .choose_weighted(rng, |(_, weight)| *weight)
            .map(|(state, _)| *state)
            .unwrap_or(options[0].0);
        let reason = TransitionReason::for_pair(self.state, next);
        Some(self.enter(next, reason, now_ms, rng))
    }

    pub fn force_transition<R: Rng + ?Sized>(
        &mut self,
        target: MachineState,
        reason: TransitionReason,
        now_ms: u64,
        rng: &mut R,
    ) -> Result<StateChange, CoreError> {
        if !self.can_transition_to(target) {
            return Err(CoreError::InvalidTransition { from: self.state, to: target });
        }
        Ok(self.enter(target, reason, now_ms, rng))
    }

    fn enter<R: Rng + ?Sized>(
        &mut self,
        next: MachineState,
        reason: TransitionReason,
        now_ms: u64,
        rng: &mut R,
    ) -> StateChange {
        let range = self.timings.get(next);
        let change = StateChange { from: self.state, to: next, reason, at_ms: now_ms };
        self.state = next;
        self.time_in_state = 0.0;
        self.planned_secs = rng.gen_range(range.min_secs..=range.max_secs);
        self.entered_at_ms = now_ms;
        change
    }
}
