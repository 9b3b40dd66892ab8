use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use pf_core::MachineState;
use pf_sim::MachineSnapshot;

/// Fleet-wide aggregate over per-machine snapshots.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FleetStatistics {
    pub tick: u64,
    pub simulated_secs: f64,
    pub total_cycles: u64,
    pub good_parts: u64,
    pub bad_parts: u64,
    /// Percentage of inspected parts that passed across the fleet.
    pub overall_quality_rate: f64,
    pub mean_wear: f64,
    pub machines_by_state: BTreeMap<&'static str, usize>,
    pub machines: Vec<MachineSnapshot>,
}

impl FleetStatistics {
    pub fn from_snapshots(tick: u64, simulated_secs: f64, machines: Vec<MachineSnapshot>) -> Self {
        let total_cycles = machines.iter().map(|m| m.total_cycles).sum();
        let good_parts: u64 = machines.iter().map(|m| m.good_parts).sum();
        let bad_parts: u64 = machines.iter().map(|m| m.bad_parts).sum();
        let inspected = good_parts + bad_parts;
        let overall_quality_rate = if inspected == 0 {
            100.0
        } else {
            good_parts as f64 * 100.0 / inspected as f64
        };
        let mean_wear = if machines.is_empty() {
            0.0
        } else {
            machines.iter().map(|m| m.wear_factor).sum::<f64>() / machines.len() as f64
        };
        let mut machines_by_state = BTreeMap::new();
        for state in MachineState::ALL {
            let count = machines.iter().filter(|m| m.state == state).count();
            if count > 0 {
                machines_by_state.insert(state.as_str(), count);
            }
        }
        Self {
            tick,
            simulated_secs,
            total_cycles,
            good_parts,
            bad_parts,
            overall_quality_rate,
            mean_wear,
            machines_by_state,
            machines,
        }
    }

    pub fn machine(&self, machine_id: &str) -> Option<&MachineSnapshot> {
        self.machines.iter().find(|m| m.machine_id == machine_id)
    }

    pub fn log(&self) {
        for m in &self.machines {
            info!(
                machine_id = %m.machine_id,
                state = %m.state,
                cycles = m.total_cycles,
                quality_rate = format_args!("{:.1}", m.quality_rate),
                wear = format_args!("{:.3}", m.wear_factor),
                operating_hours = format_args!("{:.2}", m.operating_hours),
                uptime = format_args!("{:.2}", m.uptime_ratio),
                target_uptime = m.target_uptime,
                anomaly = ?m.active_anomaly,
                "machine status"
            );
        }
        info!(
            tick = self.tick,
            simulated_secs = self.simulated_secs,
            cycles = self.total_cycles,
            good = self.good_parts,
            bad = self.bad_parts,
            quality_rate = format_args!("{:.1}", self.overall_quality_rate),
            mean_wear = format_args!("{:.3}", self.mean_wear),
            states = ?self.machines_by_state,
            "fleet status"
        );
    }
}
