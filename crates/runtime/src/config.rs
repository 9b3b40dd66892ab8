use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pf_core::{CoreError, MachineConfig, MachineType, SimulationConfig};

/// Simulation settings plus the machines to simulate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default = "default_machines")]
    pub machines: Vec<MachineConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            machines: default_machines(),
        }
    }
}

/// Five-machine reference line across day and night shifts.
pub fn default_machines() -> Vec<MachineConfig> {
    let machine = |id: &str, ty, rpm, cycle, operator: &str, shift: &str| MachineConfig {
        operator_id: operator.to_string(),
        shift: shift.to_string(),
        ..MachineConfig::new(id, ty, rpm, cycle)
    };
    vec![
        machine("machine_001", MachineType::CncMill, 3000, 45.0, "operator_001", "day"),
        machine("machine_002", MachineType::CncLathe, 2500, 60.0, "operator_002", "day"),
        machine("machine_003", MachineType::InjectionMold, 1500, 90.0, "operator_003", "day"),
        machine("machine_004", MachineType::Press, 800, 30.0, "operator_004", "night"),
        machine("machine_005", MachineType::AssemblyRobot, 1200, 25.0, "operator_005", "night"),
    ]
}

impl FleetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fleet config {}", path.display()))?;
        let config: FleetConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse fleet config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid fleet config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.simulation.validate()?;
        if self.machines.is_empty() {
            return Err(CoreError::Configuration("fleet has no machines".into()));
        }
        let mut seen = HashSet::new();
        for machine in &self.machines {
            machine.validate()?;
            if !seen.insert(machine.machine_id.as_str()) {
                return Err(CoreError::Configuration(format!(
                    "duplicate machine id {}",
                    machine.machine_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_fleet_is_valid() {
        let fleet = FleetConfig::default();
        fleet.validate().unwrap();
        assert_eq!(fleet.machines.len(), 5);
        assert_eq!(fleet.machines[3].shift, "night");
        assert_eq!(fleet.machines[0].nominal_rpm, 3000);
    }

    #[test]
    fn loads_partial_yaml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
simulation:
  tick_interval_secs: 1.0
  time_multiplier: 60.0
  seed: 9
machines:
  - machine_id: press_a
    machine_type: press
    nominal_rpm: 800
    cycle_duration_secs: 30.0
    shift: night
"#
        )
        .unwrap();

        let fleet = FleetConfig::load(file.path()).unwrap();
        assert_eq!(fleet.simulation.seed, 9);
        assert_eq!(fleet.simulation.time_multiplier, 60.0);
        assert_eq!(fleet.simulation.simulation_speed, 1.0);
        assert_eq!(fleet.machines.len(), 1);
        assert_eq!(fleet.machines[0].quality_inspection_probability, 0.15);
        assert_eq!(fleet.machines[0].shift, "night");
    }

    #[test]
    fn missing_machines_fall_back_to_reference_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "simulation:\n  seed: 3").unwrap();
        let fleet = FleetConfig::load(file.path()).unwrap();
        assert_eq!(fleet.machines, default_machines());
    }

    #[test]
    fn rejects_duplicates_and_bad_values() {
        let mut fleet = FleetConfig::default();
        fleet.machines[1].machine_id = "machine_001".into();
        assert!(matches!(fleet.validate(), Err(CoreError::Configuration(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "simulation:\n  time_multiplier: 0.0").unwrap();
        let err = FleetConfig::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("time multiplier"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = FleetConfig::load("/nonexistent/fleet.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fleet.yaml"));
    }
}
